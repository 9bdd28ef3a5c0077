//! Alerting for cluster conditions
//!
//! This module provides:
//! - Deduplicated alert recording with a bounded history
//! - Fan-out to console, email, chat, paging and webhook channels
//! - A registry that builds channels from configuration

mod channels;
mod manager;
pub mod registry;

pub use channels::{
    format_email_body, level_color, AlertChannel, ChannelError, ConsoleChannel, EmailChannel,
    PagerDutyChannel, SlackChannel, WebhookChannel, PAGERDUTY_EVENTS_URL,
};
pub use manager::{
    ActiveAlert, Alert, AlertLevel, AlertManager, AlertType, ALERT_HISTORY_CAPACITY,
    DEFAULT_DEDUP_WINDOW,
};
pub use registry::{ChannelFactory, ChannelRegistry, ChannelSpec};
