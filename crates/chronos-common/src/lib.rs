//! Shared types for the scheduled-notification service: the `Notification`
//! entity, its status state machine, channel vocabulary, and the retry
//! policy shared by every component that talks to external infrastructure.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod logging;
pub mod notifier;
pub mod retry;

pub use notifier::{Notifier, NotifierError, StdoutNotifier};
pub use retry::RetryPolicy;

/// Delivery channel. Chat and stdout use process-level destinations;
/// only email carries an explicit recipient list (see [`Notification::recipients`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Chat,
    Stdout,
}

impl FromStr for Channel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "chat" => Ok(Channel::Chat),
            "stdout" => Ok(Channel::Stdout),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Chat => write!(f, "chat"),
            Channel::Stdout => write!(f, "stdout"),
        }
    }
}

/// The notification status state machine. Wire values are the exact
/// strings used historically by this system's API and are not derived
/// mechanically from the Rust variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub enum Status {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running late")]
    Late,
    #[serde(rename = "sent")]
    Sent,
    #[serde(rename = "failed to send")]
    Failed,
    #[serde(rename = "failed to send in time")]
    FailedToSendInTime,
    #[serde(rename = "canceled")]
    Canceled,
}

impl Status {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Late => "running late",
            Status::Sent => "sent",
            Status::Failed => "failed to send",
            Status::FailedToSendInTime => "failed to send in time",
            Status::Canceled => "canceled",
        }
    }

    /// Terminal statuses never transition further (invariant I1).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Sent | Status::Failed | Status::FailedToSendInTime | Status::Canceled
        )
    }

    /// Whether `CancelNotification` may act on a row currently in this status.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, Status::Pending | Status::Late)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "running late" => Ok(Status::Late),
            "sent" => Ok(Status::Sent),
            "failed to send" => Ok(Status::Failed),
            "failed to send in time" => Ok(Status::FailedToSendInTime),
            "canceled" => Ok(Status::Canceled),
            _ => Err(()),
        }
    }
}

/// The primary entity: a single scheduled notification.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub channel: Channel,
    /// Required only when `channel == Channel::Email`.
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    pub status: Status,
    pub send_at: DateTime<Utc>,
    /// Display string in the service process's local timezone at create
    /// time. Derived, never authoritative, and never recipient-local.
    pub send_at_local: String,
    /// Non-empty iff `channel == Channel::Email` (invariant I5).
    #[serde(default)]
    pub recipients: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A non-empty placeholder used when an incoming message body is empty,
/// since some channels reject empty bodies outright.
pub const EMPTY_MESSAGE_PLACEHOLDER: &str = ".";

pub const MAX_TEXT_RUNES: usize = 254;
