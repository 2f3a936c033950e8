//! Per-run logging context.
//!
//! A [`RunContext`] is created at the start of each pipeline run and handed
//! to every component that reports progress. Events are parented on the
//! run's span, so concurrent or nested runs never share logging state.

use tracing::Span;

use crate::cache::RunDate;

/// Logging handle scoped to one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_date: RunDate,
    span: Span,
}

impl RunContext {
    pub fn new(run_date: RunDate) -> Self {
        let span = tracing::info_span!("run", run_date = %run_date);
        Self { run_date, span }
    }

    /// Context whose events are discarded. Useful in tests and one-off calls.
    pub fn detached(run_date: RunDate) -> Self {
        Self {
            run_date,
            span: Span::none(),
        }
    }

    pub fn run_date(&self) -> RunDate {
        self.run_date
    }

    /// Span all events of this run are attached to.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Child span for one disease within the run.
    pub fn disease_span(&self, disease: &str) -> Span {
        tracing::info_span!(parent: &self.span, "disease", name = %disease)
    }
}
