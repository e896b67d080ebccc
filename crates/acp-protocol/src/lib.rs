//! Wire types for the gateway's long-lived RPC surface and the agent event
//! stream.
//!
//! Out-of-process agent runtimes speak the same RPC shape as in-process
//! agents: a newline-delimited JSON request/response envelope plus a
//! WebSocket leg for pushed events.

mod approval;
mod events;
mod rpc;
mod runs;
mod ws;

pub use approval::*;
pub use events::*;
pub use rpc::*;
pub use runs::*;
pub use ws::*;

/// Placeholder written over attachment contents before a tool call is
/// persisted to a transcript.
pub const REDACTED_PLACEHOLDER: &str = "__OPENCLAW_REDACTED__";

/// Attachment snapshot caps for `sessions_spawn`.
pub const MAX_SPAWN_ATTACHMENTS: usize = 50;
pub const MAX_SPAWN_ATTACHMENT_BYTES: usize = 6_700_000;
