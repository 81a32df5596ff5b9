//! Failover state machine

use chrono::{DateTime, Utc};
use palisade_core::{FailoverEvent, FailoverState, StateTransition};

/// Drives a [`FailoverEvent`] through its lifecycle, rejecting any move the
/// graph does not allow and recording every accepted one on the event.
///
/// ```text
/// Idle → SafetyCheck → Draining → Promoting → Rerouting → Verifying → Completed
///   │         │            │          │            │           │
///   └─────────┴────────────┴→ Aborted └────────────┴───────────┴→ RollingBack → RolledBack
/// ```
pub struct FailoverStateMachine {
    event: FailoverEvent,
}

impl FailoverStateMachine {
    pub fn new(event: FailoverEvent) -> Self {
        Self { event }
    }

    /// Get the current state
    pub fn current_state(&self) -> FailoverState {
        self.event.state
    }

    /// Transition to a new state, stamping the event when it becomes terminal
    pub fn transition(
        &mut self,
        new_state: FailoverState,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!(
                "Invalid transition from {} to {}",
                self.event.state, new_state
            ));
        }

        self.event.transitions.push(StateTransition {
            from: self.event.state,
            to: new_state,
            at,
            note,
        });
        self.event.state = new_state;
        if new_state.is_terminal() {
            self.event.finished_at = Some(at);
            self.event.completed = new_state == FailoverState::Completed;
        }

        Ok(())
    }

    /// Check if a state transition is valid
    pub fn is_valid_transition(&self, new_state: FailoverState) -> bool {
        use FailoverState::*;

        matches!(
            (self.event.state, new_state),
            (Idle, SafetyCheck | Aborted)
                | (SafetyCheck, Draining | Aborted)
                | (Draining, Promoting | Aborted)
                | (Promoting, Rerouting | RollingBack)
                | (Rerouting, Verifying | RollingBack)
                | (Verifying, Completed | RollingBack)
                | (RollingBack, RolledBack)
        )
    }

    /// Get the state history
    pub fn history(&self) -> &[StateTransition] {
        &self.event.transitions
    }

    pub fn event(&self) -> &FailoverEvent {
        &self.event
    }

    pub fn event_mut(&mut self) -> &mut FailoverEvent {
        &mut self.event
    }

    pub fn into_event(self) -> FailoverEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::{RegionId, TriggerType};

    fn machine() -> FailoverStateMachine {
        FailoverStateMachine::new(FailoverEvent::new(
            RegionId::new("us-east").unwrap(),
            RegionId::new("us-west").unwrap(),
            TriggerType::Manual,
            "ops",
            Utc::now(),
        ))
    }

    #[test]
    fn test_initial_state() {
        let sm = machine();
        assert_eq!(sm.current_state(), FailoverState::Idle);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_happy_path() {
        use FailoverState::*;
        let mut sm = machine();
        for state in [SafetyCheck, Draining, Promoting, Rerouting, Verifying, Completed] {
            sm.transition(state, None, Utc::now()).unwrap();
        }
        let event = sm.into_event();
        assert!(event.completed);
        assert!(event.finished_at.is_some());
        assert_eq!(
            event.path(),
            vec![Idle, SafetyCheck, Draining, Promoting, Rerouting, Verifying, Completed]
        );
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut sm = machine();
        assert!(sm.transition(FailoverState::Promoting, None, Utc::now()).is_err());
        assert_eq!(sm.current_state(), FailoverState::Idle);
    }

    #[test]
    fn test_no_abort_after_promotion() {
        use FailoverState::*;
        let mut sm = machine();
        for state in [SafetyCheck, Draining, Promoting] {
            sm.transition(state, None, Utc::now()).unwrap();
        }
        assert!(!sm.is_valid_transition(Aborted));
        assert!(sm.is_valid_transition(RollingBack));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use FailoverState::*;
        let mut sm = machine();
        sm.transition(Aborted, Some("cancelled".into()), Utc::now()).unwrap();
        assert!(!sm.event().completed);
        for state in [Idle, SafetyCheck, RollingBack, Completed] {
            assert!(!sm.is_valid_transition(state));
        }
    }

    #[test]
    fn test_rollback_path() {
        use FailoverState::*;
        let mut sm = machine();
        for state in [SafetyCheck, Draining, Promoting, Rerouting, RollingBack, RolledBack] {
            sm.transition(state, None, Utc::now()).unwrap();
        }
        assert!(!sm.event().completed);
        assert_eq!(sm.history().len(), 6);
    }
}
