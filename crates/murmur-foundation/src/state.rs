use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Connection state of a streaming session, observable by the UI layer.
///
/// Purely informational: the orchestrator publishes transitions here but
/// never reads this back for control decisions.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, max: u32 },
    Error(String),
}

/// Publishes connection state transitions to any number of observers.
#[derive(Clone)]
pub struct ConnectionStateHub {
    state: Arc<RwLock<ConnectionState>>,
    state_tx: Sender<ConnectionState>,
    state_rx: Receiver<ConnectionState>,
}

impl Default for ConnectionStateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateHub {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn publish(&self, new_state: ConnectionState) {
        let mut current = self.state.write();
        if *current == new_state {
            return;
        }
        tracing::debug!(target: "stt", "Connection state: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
    }

    pub fn current(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_updates_current_and_notifies() {
        let hub = ConnectionStateHub::new();
        assert_eq!(hub.current(), ConnectionState::Idle);

        let rx = hub.subscribe();
        hub.publish(ConnectionState::Connecting);
        hub.publish(ConnectionState::Connected);

        assert_eq!(hub.current(), ConnectionState::Connected);
        assert_eq!(rx.try_recv().unwrap(), ConnectionState::Connecting);
        assert_eq!(rx.try_recv().unwrap(), ConnectionState::Connected);
    }

    #[test]
    fn duplicate_states_are_not_republished() {
        let hub = ConnectionStateHub::new();
        let rx = hub.subscribe();
        hub.publish(ConnectionState::Connecting);
        hub.publish(ConnectionState::Connecting);
        assert_eq!(rx.try_recv().unwrap(), ConnectionState::Connecting);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconnecting_carries_attempt_budget() {
        let hub = ConnectionStateHub::new();
        hub.publish(ConnectionState::Reconnecting { attempt: 2, max: 3 });
        match hub.current() {
            ConnectionState::Reconnecting { attempt, max } => {
                assert_eq!(attempt, 2);
                assert_eq!(max, 3);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }
}
