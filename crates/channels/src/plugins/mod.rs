//! Built-in channel plugins.
//!
//! One representative plugin per transport family: telegram (long-poll),
//! discord (WebSocket), feishu (webhook), and the in-process web channel.

pub mod discord;
pub mod feishu;
pub mod telegram;
pub mod web;
