//! Client SDK for out-of-process agent runtimes.
//!
//! A runtime connects to the gateway's WebSocket leg, introduces itself,
//! and then serves `agent.dispatch` requests — streaming [`AgentEvent`]s
//! back over the same socket. Connection drops cancel any in-flight turns
//! and reconnect on an identity-seeded doubling schedule.
//!
//! [`AgentEvent`]: oc_acp_protocol::AgentEvent

mod client;
mod reconnect;

pub use client::{RuntimeClient, RuntimeError, TurnHandler, TurnSink};
pub use reconnect::ReconnectPolicy;
