pub mod authorization_gate;
pub mod notifier;
pub mod pipeline;
pub mod state_machine;
pub mod streaming_session;
