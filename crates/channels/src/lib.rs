//! Channel integrations: the plugin registry, per-account lifecycle
//! supervision, group/DM policy evaluation, and the representative channel
//! plugins.
//!
//! Inbound flow: a monitor task consumes one provider account's events,
//! projects them into [`InboundMessage`]s at the boundary, and pushes them
//! onto a bounded queue the router drains. Outbound flow goes back through
//! the plugin's messaging adapter.
//!
//! [`InboundMessage`]: oc_domain::inbound::InboundMessage

pub mod events;
pub mod netfix;
pub mod plugins;
pub mod policy;
pub mod registry;
pub mod supervisor;
pub mod watchdog;

pub use events::EventQueue;
pub use registry::{
    AccountContext, AccountGateway, ChannelAction, ChannelCapabilities, ChannelPlugin,
    ChannelRegistry, MessagingAdapter, PluginMeta, ProbeResult, ResolvedAccount, TransportKind,
};
pub use supervisor::{
    AccountStatus, AccountStatusHandle, AccountSupervisor, StatusBoard, STARTUP_PROBE_TIMEOUT_MS,
};
