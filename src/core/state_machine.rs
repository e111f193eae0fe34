//! State machine tracking one image publication
//!
//! The orchestrator records every state change here; the history ends up in
//! the publication report. Nothing is persisted: a publication that dies is
//! simply re-run, and the idempotence check makes that safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Publication state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationState {
    Start,
    Checksummed,
    DedupChecked,
    Registering,
    Staging,
    Uploading,
    Importing,
    Active,
    RolledBack,
    Reconciled,
    Failed,
}

impl PublicationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reconciled | Self::Failed)
    }

    /// States during which a failure must undo what this publication created
    pub fn requires_rollback(self) -> bool {
        matches!(
            self,
            Self::Registering | Self::Staging | Self::Uploading | Self::Importing
        )
    }

    /// Whether `self -> to` is an edge of the publication graph
    pub fn can_transition_to(self, to: Self) -> bool {
        use PublicationState::*;

        if to == Failed {
            return !self.is_terminal() && !self.requires_rollback();
        }

        matches!(
            (self, to),
            (Start, Checksummed)
                | (Checksummed, DedupChecked)
                | (DedupChecked, Reconciled)
                | (DedupChecked, Registering)
                | (DedupChecked, Staging)
                | (Registering, Uploading)
                | (Staging, Importing)
                | (Uploading, Active)
                | (Importing, Active)
                | (Active, Reconciled)
                | (Registering | Staging | Uploading | Importing, RolledBack)
        )
    }
}

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from: PublicationState,
    pub to: PublicationState,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// State machine for one publication
#[derive(Debug, Clone)]
pub struct PublicationStateMachine {
    current_state: PublicationState,
    transitions: Vec<StateTransition>,
    error: Option<String>,
}

impl Default for PublicationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicationStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: PublicationState::Start,
            transitions: Vec::new(),
            error: None,
        }
    }

    /// Transition to a new state
    pub fn transition(
        &mut self,
        to: PublicationState,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) {
        let from = self.current_state;
        debug_assert!(
            from.can_transition_to(to),
            "illegal publication transition {:?} -> {:?}",
            from,
            to
        );
        if !from.can_transition_to(to) {
            tracing::error!(?from, ?to, "illegal publication transition");
        }

        if let Some(serde_json::Value::String(error)) =
            metadata.as_ref().and_then(|meta| meta.get("error"))
        {
            self.error = Some(error.clone());
        }

        tracing::info!(?from, ?to, "publication state changed");

        self.transitions.push(StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            metadata,
        });
        self.current_state = to;
    }

    /// Record a failure, rolling back first if the current state demands it
    pub fn fail(&mut self, error: &str) {
        if self.current_state.is_terminal() {
            return;
        }

        let mut metadata = HashMap::new();
        metadata.insert(
            "error".to_string(),
            serde_json::Value::String(error.to_string()),
        );

        if self.current_state.requires_rollback() {
            self.transition(PublicationState::RolledBack, Some(metadata.clone()));
        }
        self.transition(PublicationState::Failed, Some(metadata));
    }

    pub fn get_state(&self) -> PublicationState {
        self.current_state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn get_last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Get elapsed time between first and last transition, in milliseconds
    pub fn get_elapsed_time(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    /// Get transition history as human-readable string
    pub fn get_history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| {
                let time = t.timestamp.to_rfc3339();
                let meta = if let Some(metadata) = &t.metadata {
                    format!(" ({})", serde_json::to_string(metadata).unwrap_or_default())
                } else {
                    String::new()
                };
                format!("{}: {:?} → {:?}{}", time, t.from, t.to, meta)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
