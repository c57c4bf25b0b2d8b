use serde::Deserialize;
use serde::Serialize;
use strum::Display;

/// UI-facing state of a discovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    /// Reachability probe in flight
    Connecting,
    /// Reachable; format validation in flight
    Connected,
    /// Valid JSON object; entity extraction in flight
    FormatValid,
    ConnectionFailed,
    FormatInvalid,
    NoEntitiesFound,
    /// Entities have been created under the device
    Ready,
}

/// User-driven transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "lowercase")]
pub enum Transition {
    Retry,
    Skip,
    Continue,
}

const FAILURE_TRANSITIONS: &[Transition] = &[Transition::Retry, Transition::Skip];
const READY_TRANSITIONS: &[Transition] = &[Transition::Continue];

impl DiscoveryState {
    /// Whether a probe is still in flight.
    pub fn is_probing(self) -> bool {
        matches!(
            self,
            DiscoveryState::Connecting | DiscoveryState::Connected | DiscoveryState::FormatValid
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_probing()
    }

    pub fn is_failure(self) -> bool {
        self.failure().is_some()
    }

    /// Transitions the user may take from this state.
    pub fn transitions(self) -> &'static [Transition] {
        match self {
            DiscoveryState::Ready => READY_TRANSITIONS,
            s if s.is_failure() => FAILURE_TRANSITIONS,
            _ => &[],
        }
    }

    pub fn allows(self, transition: Transition) -> bool {
        self.transitions().contains(&transition)
    }

    /// The error a failure state stands for.
    pub fn failure(self) -> Option<DiscoveryError> {
        match self {
            DiscoveryState::ConnectionFailed => Some(DiscoveryError::Unreachable),
            DiscoveryState::FormatInvalid => Some(DiscoveryError::MalformedResponse),
            DiscoveryState::NoEntitiesFound => Some(DiscoveryError::EmptyResult),
            _ => None,
        }
    }
}

/// Why discovery did not produce entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Address is not a valid device address")]
    InvalidAddress,

    #[error("Device did not respond")]
    Unreachable,

    #[error("Device response is not a JSON object")]
    MalformedResponse,

    #[error("Device reported no entities")]
    EmptyResult,
}

/// A transition was requested from a state that does not offer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot {transition} while discovery is {state}")]
pub struct TransitionError {
    pub state: DiscoveryState,
    pub transition: Transition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_states_offer_retry_and_skip() {
        for state in [
            DiscoveryState::ConnectionFailed,
            DiscoveryState::FormatInvalid,
            DiscoveryState::NoEntitiesFound,
        ] {
            assert!(state.is_terminal());
            assert_eq!(state.transitions(), &[Transition::Retry, Transition::Skip]);
        }
    }

    #[test]
    fn test_ready_only_continues() {
        assert_eq!(DiscoveryState::Ready.transitions(), &[Transition::Continue]);
        assert!(!DiscoveryState::Ready.is_failure());
        assert!(DiscoveryState::Ready.failure().is_none());
    }

    #[test]
    fn test_probing_states_have_no_transitions() {
        for state in [
            DiscoveryState::Connecting,
            DiscoveryState::Connected,
            DiscoveryState::FormatValid,
        ] {
            assert!(!state.is_terminal());
            assert!(state.transitions().is_empty());
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DiscoveryState::NoEntitiesFound.to_string(), "NoEntitiesFound");
        assert_eq!(
            serde_json::to_string(&DiscoveryState::FormatValid).unwrap(),
            r#""format_valid""#
        );
        assert_eq!(
            TransitionError {
                state: DiscoveryState::Connecting,
                transition: Transition::Skip,
            }
            .to_string(),
            "Cannot skip while discovery is Connecting"
        );
    }
}
