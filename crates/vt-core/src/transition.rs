//! Workflow transitions
//!
//! The tracker owns the workflow; this engine only lists the transitions
//! available on a ticket and picks the one reaching the configured target:
//! - an exact transition-name match when a name is configured
//! - otherwise a case-insensitive match on the resulting status
//!
//! No match and several matches are both reported and leave the ticket as is.

use crate::error::TransitionError;
use tracing::{debug, info};
use vt_model::TransitionConfig;
use vt_tracker::{TicketClient, Transition};

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Transition applied
    Applied(Transition),
    /// Transition resolved but not applied (dry run)
    Planned(Transition),
}

impl TransitionOutcome {
    /// The resolved transition
    #[inline]
    #[must_use]
    pub fn transition(&self) -> &Transition {
        match self {
            Self::Applied(t) | Self::Planned(t) => t,
        }
    }
}

/// Resolves and applies workflow transitions
#[derive(Debug, Clone, Copy)]
pub struct TransitionEngine<'a> {
    config: &'a TransitionConfig,
    dry_run: bool,
}

impl<'a> TransitionEngine<'a> {
    /// Create engine
    #[inline]
    #[must_use]
    pub fn new(config: &'a TransitionConfig, dry_run: bool) -> Self {
        Self { config, dry_run }
    }

    /// Pick the transition reaching the configured target
    ///
    /// # Errors
    /// `NotFound` when nothing matches, `Ambiguous` when several do.
    pub fn resolve<'t>(
        transitions: &'t [Transition],
        config: &TransitionConfig,
    ) -> Result<&'t Transition, TransitionError> {
        let mut candidates: Vec<&Transition> = match config.transition_name.as_deref() {
            Some(name) => transitions.iter().filter(|t| t.name == name).collect(),
            None => Vec::new(),
        };
        if candidates.is_empty() {
            if let Some(status) = config.target_status.as_deref() {
                candidates = transitions
                    .iter()
                    .filter(|t| t.to_status.trim().eq_ignore_ascii_case(status.trim()))
                    .collect();
            }
        }

        let target = config
            .transition_name
            .as_deref()
            .or(config.target_status.as_deref())
            .unwrap_or_default()
            .to_string();
        match candidates.as_slice() {
            [single] => Ok(single),
            [] => Err(TransitionError::NotFound {
                target,
                available: transitions
                    .iter()
                    .map(|t| format!("{} -> {}", t.name, t.to_status))
                    .collect(),
            }),
            many => Err(TransitionError::Ambiguous {
                target,
                candidates: many.iter().map(|t| t.name.clone()).collect(),
            }),
        }
    }

    /// List transitions for a ticket and apply the matching one
    ///
    /// Transitions are listed even in dry run; only the apply is skipped.
    ///
    /// # Errors
    /// Resolution failures, or the tracker error of either call.
    pub async fn apply(
        &self,
        client: &dyn TicketClient,
        ticket: &str,
    ) -> Result<TransitionOutcome, TransitionError> {
        let available = client.list_transitions(ticket).await?;
        debug!(ticket, available = available.len(), "listed transitions");
        let transition = Self::resolve(&available, self.config)?.clone();

        if self.dry_run {
            info!(
                ticket,
                transition = %transition.name,
                to_status = %transition.to_status,
                "dry run: would transition ticket"
            );
            return Ok(TransitionOutcome::Planned(transition));
        }

        client.apply_transition(ticket, &transition.id).await?;
        info!(
            ticket,
            transition = %transition.name,
            to_status = %transition.to_status,
            "transitioned ticket"
        );
        Ok(TransitionOutcome::Applied(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> Vec<Transition> {
        vec![
            Transition::new("11", "Start Progress", "In Progress"),
            Transition::new("21", "Resolve", "Done"),
            Transition::new("31", "Close", "Done"),
        ]
    }

    fn to_status(status: &str) -> TransitionConfig {
        TransitionConfig {
            enabled: true,
            target_status: Some(status.into()),
            transition_name: None,
        }
    }

    #[test]
    fn matches_status_case_insensitively() {
        let transitions = workflow();
        let found = TransitionEngine::resolve(&transitions, &to_status("in progress")).unwrap();
        assert_eq!(found.id, "11");
    }

    #[test]
    fn transition_name_wins_over_status() {
        let transitions = workflow();
        let config = TransitionConfig {
            transition_name: Some("Close".into()),
            ..to_status("Done")
        };
        assert_eq!(TransitionEngine::resolve(&transitions, &config).unwrap().id, "31");
    }

    #[test]
    fn transition_name_is_exact() {
        let transitions = workflow();
        let config = TransitionConfig {
            enabled: true,
            target_status: None,
            transition_name: Some("close".into()),
        };
        let err = TransitionEngine::resolve(&transitions, &config).unwrap_err();
        assert!(matches!(err, TransitionError::NotFound { ref target, .. } if target == "close"));
    }

    #[test]
    fn several_matches_are_ambiguous() {
        let transitions = workflow();
        let err = TransitionEngine::resolve(&transitions, &to_status("Done")).unwrap_err();
        match err {
            TransitionError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates, vec!["Resolve", "Close"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_target_lists_available() {
        let transitions = workflow();
        let err = TransitionEngine::resolve(&transitions, &to_status("Rejected")).unwrap_err();
        match err {
            TransitionError::NotFound { available, .. } => assert_eq!(available.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
