use crate::models::state::StreamState;

/// Inputs to the stream state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    /// `start` accepted.
    Start,
    /// Transport reported a successful connect.
    Connected,
    /// The attempt failed before streaming: authorization, device, url, connect, timeout.
    ConnectFailed,
    /// `stop` called.
    Stop,
    /// Transport dropped, capture device lost or encoder fault while streaming.
    FatalError,
    /// Transport finished closing (or the close timed out).
    Disconnected,
}

impl StreamEvent {
    pub const ALL: [StreamEvent; 6] = [
        StreamEvent::Start,
        StreamEvent::Connected,
        StreamEvent::ConnectFailed,
        StreamEvent::Stop,
        StreamEvent::FatalError,
        StreamEvent::Disconnected,
    ];
}

/// The transition table. `None` means the event is ignored in that state.
pub fn next_state(from: StreamState, event: StreamEvent) -> Option<StreamState> {
    use StreamEvent as E;
    use StreamState as S;

    match (from, event) {
        (S::Unknown | S::Disconnected, E::Start) => Some(S::Connecting),
        (S::Connecting, E::Connected) => Some(S::Connected),
        (S::Connecting, E::ConnectFailed) => Some(S::Error),
        (S::Connected, E::Stop) => Some(S::Disconnecting),
        (S::Connected, E::FatalError) => Some(S::Error),
        (S::Disconnecting, E::Disconnected) => Some(S::Disconnected),
        (S::Error, E::Stop) => Some(S::Disconnected),
        // Stopping a session that never started still converges to Disconnected.
        (S::Unknown, E::Stop) => Some(S::Disconnected),
        _ => None,
    }
}

/// Whether some event leads from `from` to `to`.
pub fn is_legal_transition(from: StreamState, to: StreamState) -> bool {
    StreamEvent::ALL
        .iter()
        .any(|event| next_state(from, *event) == Some(to))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [StreamState; 6] = [
        StreamState::Unknown,
        StreamState::Connecting,
        StreamState::Connected,
        StreamState::Disconnecting,
        StreamState::Disconnected,
        StreamState::Error,
    ];

    #[test]
    fn happy_path() {
        let mut state = StreamState::Unknown;
        for (event, expected) in [
            (StreamEvent::Start, StreamState::Connecting),
            (StreamEvent::Connected, StreamState::Connected),
            (StreamEvent::Stop, StreamState::Disconnecting),
            (StreamEvent::Disconnected, StreamState::Disconnected),
            (StreamEvent::Start, StreamState::Connecting),
        ] {
            state = next_state(state, event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn start_only_from_ready_states() {
        for state in STATES {
            assert_eq!(
                next_state(state, StreamEvent::Start).is_some(),
                state.is_ready_to_start(),
                "start from {}",
                state
            );
        }
    }

    #[test]
    fn stop_from_every_state_reaches_disconnected() {
        for state in STATES {
            let mut current = state;
            // Stop, then let any pending close complete.
            if let Some(next) = next_state(current, StreamEvent::Stop) {
                current = next;
            }
            if let Some(next) = next_state(current, StreamEvent::Disconnected) {
                current = next;
            }
            // A pending connect resolves first, then the deferred stop applies.
            if current == StreamState::Connecting {
                current = next_state(current, StreamEvent::ConnectFailed).unwrap();
                current = next_state(current, StreamEvent::Stop).unwrap();
            }
            assert_eq!(current, StreamState::Disconnected, "stop from {}", state);
        }
    }

    #[test]
    fn error_requires_stop_before_restart() {
        assert_eq!(next_state(StreamState::Error, StreamEvent::Start), None);
        assert_eq!(
            next_state(StreamState::Error, StreamEvent::Stop),
            Some(StreamState::Disconnected)
        );
    }

    #[test]
    fn terminal_events_ignored_outside_their_state() {
        assert_eq!(next_state(StreamState::Disconnected, StreamEvent::Stop), None);
        assert_eq!(next_state(StreamState::Disconnecting, StreamEvent::Stop), None);
        assert_eq!(next_state(StreamState::Error, StreamEvent::FatalError), None);
        assert_eq!(next_state(StreamState::Connected, StreamEvent::Disconnected), None);
    }

    #[test]
    fn legal_transitions() {
        assert!(is_legal_transition(StreamState::Connecting, StreamState::Error));
        assert!(!is_legal_transition(StreamState::Connecting, StreamState::Disconnecting));
        assert!(!is_legal_transition(StreamState::Disconnected, StreamState::Connected));
    }
}
