//! Session routing and persistence.
//!
//! Maps inbound `(channel, account, conversation, sender)` tuples to stable
//! session keys, persists per-session metadata in a JSON store with atomic
//! replace + single backup, and binds freshly spawned child sessions to
//! threads/conversations.

pub mod binding;
pub mod session_key;
pub mod store;

pub use binding::{BindConversation, BindRequest, SessionBinding, SessionBindingService};
pub use session_key::{session_key, SessionScope};
pub use store::{atomic_replace, SessionEntry, SessionStore, SkillsSnapshot};
