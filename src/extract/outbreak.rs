//! Threshold classification into outbreak triples.

use std::collections::BTreeSet;

use super::latest::LatestRecord;
use crate::graph::{NamespacedId, Triple};

/// WHO continental and global roll-up codes. These report aggregates, not
/// countries, and never become outbreak subjects.
pub const AGGREGATE_REGION_CODES: &[&str] = &["GLOBAL", "AFR", "AMR", "SEAR", "EUR", "EMR", "WPR"];

/// Per-disease outbreak classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutbreakRule {
    /// Case count that must be strictly exceeded.
    pub threshold: i64,
    /// Entity codes that never produce triples.
    pub excluded: BTreeSet<String>,
}

impl OutbreakRule {
    /// Rule with the default aggregate-region exclusion list.
    pub fn new(threshold: i64) -> Self {
        Self::with_exclusions(threshold, AGGREGATE_REGION_CODES.iter().copied())
    }

    pub fn with_exclusions<I, S>(threshold: i64, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threshold,
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a latest record qualifies as an active outbreak.
    pub fn is_active(&self, record: &LatestRecord) -> bool {
        !self.excluded.contains(&record.entity_code)
            && record
                .case_count
                .is_some_and(|cases| cases > self.threshold as f64)
    }

    /// `(Country::<code>, has_active_outbreak, disease)` for every qualifying
    /// record, in input order.
    pub fn build(&self, latest: &[LatestRecord], disease: &NamespacedId) -> Vec<Triple> {
        latest
            .iter()
            .filter(|r| self.is_active(r))
            .map(|r| Triple::outbreak(&r.entity_code, disease))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::latest::select_latest;
    use crate::extract::normalize::Record;
    use crate::graph::HAS_ACTIVE_OUTBREAK;

    fn latest(code: &str, cases: Option<f64>) -> LatestRecord {
        LatestRecord {
            entity_code: code.into(),
            year: 2020,
            case_count: cases,
        }
    }

    fn disease() -> NamespacedId {
        NamespacedId::new("Disease::DOID:12365")
    }

    #[test]
    fn global_excluded_despite_exceeding_threshold() {
        let records = vec![
            Record {
                entity_code: Some("KE".into()),
                year: Some(2019),
                case_count: Some(1500.0),
            },
            Record {
                entity_code: Some("KE".into()),
                year: Some(2020),
                case_count: Some(2200.0),
            },
            Record {
                entity_code: Some("GLOBAL".into()),
                year: Some(2020),
                case_count: Some(500_000.0),
            },
        ];
        let selected = select_latest(&records, 2015);
        let triples = OutbreakRule::new(1000).build(&selected, &disease());
        assert_eq!(
            triples,
            vec![Triple::new("Country::KE", HAS_ACTIVE_OUTBREAK, disease())]
        );
    }

    #[test]
    fn threshold_is_strict() {
        let rule = OutbreakRule::new(1000);
        assert!(!rule.is_active(&latest("KE", Some(1000.0))));
        assert!(rule.is_active(&latest("KE", Some(1000.5))));
        assert!(!rule.is_active(&latest("KE", Some(999.0))));
    }

    #[test]
    fn missing_case_count_never_qualifies() {
        assert!(!OutbreakRule::new(0).is_active(&latest("KE", None)));
    }

    #[test]
    fn no_excluded_code_ever_becomes_subject() {
        let rule = OutbreakRule::new(0);
        let mut rows: Vec<LatestRecord> = AGGREGATE_REGION_CODES
            .iter()
            .map(|c| latest(c, Some(1e9)))
            .collect();
        rows.push(latest("NG", Some(1e9)));
        let triples = rule.build(&rows, &disease());
        assert_eq!(triples.len(), 1);
        for t in &triples {
            assert!(!AGGREGATE_REGION_CODES.contains(&t.subject.local_part()));
        }
    }

    #[test]
    fn custom_exclusions_replace_defaults() {
        let rule = OutbreakRule::with_exclusions(10, ["KE"]);
        let rows = vec![latest("KE", Some(50.0)), latest("GLOBAL", Some(50.0))];
        let triples = rule.build(&rows, &disease());
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject.as_str(), "Country::GLOBAL");
    }
}
