use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transaction::TransactionKind;

/// State of a SIP transaction (RFC 3261, Section 17).
///
/// - Client INVITE: Calling -> Proceeding -> Completed -> Terminated
/// - Client non-INVITE: Trying -> Proceeding -> Completed -> Terminated
/// - Server INVITE: Proceeding -> Completed -> Confirmed -> Terminated
/// - Server non-INVITE: Trying -> Proceeding -> Completed -> Terminated
///
/// Every transaction starts in `Initial` until its event loop performs the
/// first transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Created, nothing sent or processed yet
    Initial,
    /// Client INVITE: request sent, no response yet
    Calling,
    /// Non-INVITE: request sent (client) or received (server), no response yet
    Trying,
    /// A provisional response was received (client) or sent (server)
    Proceeding,
    /// A final response was received (client) or sent (server)
    Completed,
    /// Server INVITE: ACK received
    Confirmed,
    /// Finished; timers cancelled, no further processing
    Terminated,
}

impl TransactionState {
    pub fn is_terminated(&self) -> bool {
        *self == TransactionState::Terminated
    }

    /// True once a final response has been seen or sent.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Confirmed | TransactionState::Terminated
        )
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateValue {
    Initial = 0,
    Calling = 1,
    Trying = 2,
    Proceeding = 3,
    Completed = 4,
    Confirmed = 5,
    Terminated = 6,
}

impl From<TransactionState> for StateValue {
    fn from(state: TransactionState) -> Self {
        match state {
            TransactionState::Initial => StateValue::Initial,
            TransactionState::Calling => StateValue::Calling,
            TransactionState::Trying => StateValue::Trying,
            TransactionState::Proceeding => StateValue::Proceeding,
            TransactionState::Completed => StateValue::Completed,
            TransactionState::Confirmed => StateValue::Confirmed,
            TransactionState::Terminated => StateValue::Terminated,
        }
    }
}

impl From<u8> for TransactionState {
    fn from(value: u8) -> Self {
        match value {
            0 => TransactionState::Initial,
            1 => TransactionState::Calling,
            2 => TransactionState::Trying,
            3 => TransactionState::Proceeding,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            // Unknown values are treated as finished
            _ => TransactionState::Terminated,
        }
    }
}

/// A `TransactionState` that can be read from any task while the
/// transaction's event loop is the only writer.
#[derive(Debug)]
pub struct AtomicTransactionState {
    value: AtomicU8,
}

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        Self {
            value: AtomicU8::new(StateValue::from(state) as u8),
        }
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from(self.value.load(Ordering::Acquire))
    }

    /// Stores `new_state` and returns the previous state.
    pub fn set(&self, new_state: TransactionState) -> TransactionState {
        let prev = self.value.swap(StateValue::from(new_state) as u8, Ordering::AcqRel);
        TransactionState::from(prev)
    }

    /// Compare-and-swap from `current_state` to `new_state`.
    ///
    /// Returns true when the swap happened or the state already equals
    /// `new_state`. A transition to `Terminated` always succeeds.
    pub fn transition_if(&self, current_state: TransactionState, new_state: TransactionState) -> bool {
        let current_value = StateValue::from(current_state) as u8;
        let new_value = StateValue::from(new_state) as u8;

        match self
            .value
            .compare_exchange(current_value, new_value, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(actual) if actual == new_value => true,
            Err(_) if new_state == TransactionState::Terminated => {
                self.value.store(new_value, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    /// Checks a transition against the state machine of `kind`.
    pub fn validate_transition(
        kind: TransactionKind,
        current_state: TransactionState,
        new_state: TransactionState,
    ) -> Result<()> {
        use TransactionState::*;

        if current_state == new_state {
            return Ok(());
        }
        if current_state == Terminated {
            return Err(Error::invalid_state_transition(kind, current_state, new_state));
        }
        if new_state == Terminated {
            return Ok(());
        }

        let allowed = match kind {
            TransactionKind::InviteClient => matches!(
                (current_state, new_state),
                (Initial, Calling) | (Calling, Proceeding) | (Calling, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::NonInviteClient => matches!(
                (current_state, new_state),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::InviteServer => matches!(
                (current_state, new_state),
                (Initial, Proceeding) | (Proceeding, Completed) | (Completed, Confirmed)
            ),
            TransactionKind::NonInviteServer => matches!(
                (current_state, new_state),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::invalid_state_transition(kind, current_state, new_state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn atomic_set_returns_previous() {
        let state = AtomicTransactionState::new(TransactionState::Initial);
        assert_eq!(state.set(TransactionState::Calling), TransactionState::Initial);
        assert_eq!(state.get(), TransactionState::Calling);
    }

    #[test]
    fn transition_if_is_compare_and_swap() {
        let state = AtomicTransactionState::new(TransactionState::Trying);
        assert!(!state.transition_if(TransactionState::Proceeding, TransactionState::Completed));
        assert_eq!(state.get(), TransactionState::Trying);
        assert!(state.transition_if(TransactionState::Trying, TransactionState::Proceeding));
        assert!(state.transition_if(TransactionState::Trying, TransactionState::Proceeding));
        assert!(state.transition_if(TransactionState::Calling, TransactionState::Terminated));
        assert_eq!(state.get(), TransactionState::Terminated);
    }

    #[rstest]
    #[case(TransactionKind::InviteClient, TransactionState::Calling, TransactionState::Proceeding, true)]
    #[case(TransactionKind::InviteClient, TransactionState::Proceeding, TransactionState::Calling, false)]
    #[case(TransactionKind::InviteClient, TransactionState::Completed, TransactionState::Confirmed, false)]
    #[case(TransactionKind::NonInviteClient, TransactionState::Trying, TransactionState::Completed, true)]
    #[case(TransactionKind::InviteServer, TransactionState::Completed, TransactionState::Confirmed, true)]
    #[case(TransactionKind::InviteServer, TransactionState::Proceeding, TransactionState::Confirmed, false)]
    #[case(TransactionKind::NonInviteServer, TransactionState::Completed, TransactionState::Proceeding, false)]
    #[case(TransactionKind::NonInviteServer, TransactionState::Proceeding, TransactionState::Terminated, true)]
    #[case(TransactionKind::NonInviteServer, TransactionState::Terminated, TransactionState::Trying, false)]
    fn validates_transitions(
        #[case] kind: TransactionKind,
        #[case] from: TransactionState,
        #[case] to: TransactionState,
        #[case] valid: bool,
    ) {
        assert_eq!(AtomicTransactionState::validate_transition(kind, from, to).is_ok(), valid);
    }
}
