use std::fmt;

/// Result of one unit of a batch operation (one id on one broker, one guest).
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: String,
    /// Alias of the broker the unit was attempted on, if one was resolved.
    pub broker: Option<String>,
    pub result: crate::Result<()>,
}

impl UnitOutcome {
    pub fn new(unit: impl Into<String>, broker: Option<&str>, result: crate::Result<()>) -> Self {
        Self {
            unit: unit.into(),
            broker: broker.map(|aka| aka.to_string()),
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(broker) = &self.broker {
            write!(f, "{broker}: ")?;
        }
        match &self.result {
            Ok(()) => write!(f, "{}: ok", self.unit),
            Err(error) => write!(f, "{}: {error}", self.unit),
        }
    }
}

/// Outcomes of every attempted unit of a batch, in attempt order.
///
/// Batches never stop at the first failure, so a report always has an
/// entry for each unit.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn push(&mut self, outcome: UnitOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[UnitOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(UnitOutcome::is_success)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl Extend<UnitOutcome> for BatchReport {
    fn extend<T: IntoIterator<Item = UnitOutcome>>(&mut self, iter: T) {
        self.outcomes.extend(iter);
    }
}

impl FromIterator<UnitOutcome> for BatchReport {
    fn from_iter<T: IntoIterator<Item = UnitOutcome>>(iter: T) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchReport, UnitOutcome};
    use crate::common::error::AllocError;

    #[test]
    fn report_collects_failures() {
        let report: BatchReport = vec![
            UnitOutcome::new("A1", Some("b1"), Ok(())),
            UnitOutcome::new("A2", None, Err(AllocError::NoBrokers)),
        ]
        .into_iter()
        .collect();
        assert!(!report.is_success());
        assert_eq!(report.len(), 2);
        let failures: Vec<_> = report.failures().map(|o| o.unit.as_str()).collect();
        assert_eq!(failures, vec!["A2"]);
        assert_eq!(report.outcomes()[0].to_string(), "b1: A1: ok");
    }

    #[test]
    fn empty_report_is_success() {
        assert!(BatchReport::default().is_success());
    }
}
