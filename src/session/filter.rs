//! Read-time projection of the event buffer.

use serde::{Deserialize, Serialize};

use crate::models::{RiskLevel, TransactionEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    /// Case-insensitive substring of the event id
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub fraud_only: bool,
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty()
            && self.risk_level.is_none()
            && !self.fraud_only
            && self.min_amount.is_none()
            && self.max_amount.is_none()
    }

    pub fn matches(&self, event: &TransactionEvent) -> bool {
        let needle = self.search.trim();
        if !needle.is_empty()
            && !event
                .id()
                .to_lowercase()
                .contains(&needle.to_lowercase())
        {
            return false;
        }
        if let Some(level) = self.risk_level {
            if event.risk_level() != level {
                return false;
            }
        }
        if self.fraud_only && !event.is_fraud() {
            return false;
        }
        if let Some(min) = self.min_amount {
            if event.amount() < min {
                return false;
            }
        }
        if let Some(max) = self.max_amount {
            if event.amount() > max {
                return false;
            }
        }
        true
    }

    pub fn apply<'a, I>(&self, events: I) -> Vec<TransactionEvent>
    where
        I: IntoIterator<Item = &'a TransactionEvent>,
    {
        events
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn events() -> Vec<TransactionEvent> {
        vec![
            TransactionEvent::new("LOCAL-1-100", Utc::now(), 25.0, 0.10, false),
            TransactionEvent::new("LOCAL-2-200", Utc::now(), 900.0, 0.85, true),
            TransactionEvent::new("REMOTE-3", Utc::now(), 300.0, 0.55, false),
        ]
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let f = FilterState::default();
        assert!(f.is_empty());
        assert_eq!(f.apply(&events()).len(), 3);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let f = FilterState {
            search: "remote".to_string(),
            ..Default::default()
        };
        let out = f.apply(&events());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "REMOTE-3");
    }

    #[test]
    fn test_combined_criteria() {
        let f = FilterState {
            risk_level: Some(RiskLevel::High),
            fraud_only: true,
            min_amount: Some(500.0),
            ..Default::default()
        };
        let out = f.apply(&events());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "LOCAL-2-200");

        let f = FilterState {
            max_amount: Some(300.0),
            ..Default::default()
        };
        assert_eq!(f.apply(&events()).len(), 2);
    }
}
