//! Execution governance between the reasoning loop and the tools: the
//! policy gate (risk classification + per-run caps), the durable outbox
//! (exactly-once for irreversible side-effects), the dead-letter queue, and
//! the agent state machine with its cooperative cancel latch.

pub mod dlq;
pub mod outbox;
pub mod policy;
pub mod state;

pub use dlq::DeadLetterQueue;
pub use outbox::Outbox;
pub use policy::{PolicyGate, RiskLevel};
pub use state::{AgentState, AgentStateMachine};
