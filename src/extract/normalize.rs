//! Raw feed rows to typed records.
//!
//! Coercion never fails: a missing, empty or non-numeric field becomes `None`
//! and the row survives until selection drops it.

use serde_json::{Map, Value};

use crate::pipeline::RunContext;

/// Names of the raw fields carrying entity, time and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub entity: String,
    pub time: String,
    pub value: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            entity: "SpatialDim".into(),
            time: "TimeDim".into(),
            value: "NumericValue".into(),
        }
    }
}

/// One normalized feed row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entity_code: Option<String>,
    pub year: Option<i32>,
    pub case_count: Option<f64>,
}

impl Record {
    fn missing() -> Self {
        Self {
            entity_code: None,
            year: None,
            case_count: None,
        }
    }
}

/// Normalize a raw feed payload.
///
/// Anything other than a JSON array is treated as "no data": a warning is
/// logged on the run's span and the result is empty.
pub fn normalize(ctx: &RunContext, raw: &Value, fields: &FieldMap) -> Vec<Record> {
    let Value::Array(rows) = raw else {
        tracing::warn!(
            parent: ctx.span(),
            kind = value_kind(raw),
            "feed payload is not a list of records, treating as empty"
        );
        return Vec::new();
    };
    normalize_rows(rows, fields)
}

/// Normalize rows already known to be a list.
pub fn normalize_rows(rows: &[Value], fields: &FieldMap) -> Vec<Record> {
    rows.iter()
        .map(|row| match row {
            Value::Object(map) => normalize_object(map, fields),
            _ => Record::missing(),
        })
        .collect()
}

fn normalize_object(map: &Map<String, Value>, fields: &FieldMap) -> Record {
    Record {
        entity_code: map.get(&fields.entity).and_then(coerce_code),
        year: map.get(&fields.time).and_then(coerce_year),
        case_count: map.get(&fields.value).and_then(coerce_number),
    }
}

fn coerce_code(v: &Value) -> Option<String> {
    let code = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!code.is_empty()).then_some(code)
}

fn coerce_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_year(v: &Value) -> Option<i32> {
    let n = coerce_number(v)?;
    if n.fract() != 0.0 || n < i32::MIN as f64 || n > i32::MAX as f64 {
        return None;
    }
    Some(n as i32)
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RunDate;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::detached("2024-03-01".parse::<RunDate>().unwrap())
    }

    #[test]
    fn well_formed_rows_are_typed() {
        let raw = json!([
            {"SpatialDim": "KE", "TimeDim": 2020, "NumericValue": 2200.0, "Dim1": "BTSX"},
            {"SpatialDim": "UG", "TimeDim": "2019", "NumericValue": "15"}
        ]);
        let records = normalize(&ctx(), &raw, &FieldMap::default());
        assert_eq!(
            records,
            vec![
                Record {
                    entity_code: Some("KE".into()),
                    year: Some(2020),
                    case_count: Some(2200.0),
                },
                Record {
                    entity_code: Some("UG".into()),
                    year: Some(2019),
                    case_count: Some(15.0),
                },
            ]
        );
    }

    #[test]
    fn bad_fields_become_missing() {
        let raw = json!([
            {"SpatialDim": "", "TimeDim": "n/a", "NumericValue": null},
            {"TimeDim": 2019.5, "NumericValue": "lots"},
            {"SpatialDim": "KE", "TimeDim": 2020.0}
        ]);
        let records = normalize(&ctx(), &raw, &FieldMap::default());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], Record::missing());
        assert_eq!(records[1], Record::missing());
        assert_eq!(records[2].entity_code.as_deref(), Some("KE"));
        assert_eq!(records[2].year, Some(2020));
        assert_eq!(records[2].case_count, None);
    }

    #[test]
    fn non_object_rows_are_all_missing() {
        let raw = json!(["KE", 2020, null]);
        let records = normalize(&ctx(), &raw, &FieldMap::default());
        assert!(records.iter().all(|r| *r == Record::missing()));
    }

    #[test]
    fn non_list_payload_is_empty() {
        assert!(normalize(&ctx(), &json!({"value": []}), &FieldMap::default()).is_empty());
        assert!(normalize(&ctx(), &json!("oops"), &FieldMap::default()).is_empty());
    }

    #[test]
    fn custom_field_names() {
        let fields = FieldMap {
            entity: "Country".into(),
            time: "Year".into(),
            value: "Cases".into(),
        };
        let raw = json!([{"Country": "KE", "Year": 2021, "Cases": 10}]);
        let records = normalize(&ctx(), &raw, &fields);
        assert_eq!(records[0].year, Some(2021));
        assert_eq!(records[0].case_count, Some(10.0));
    }
}
