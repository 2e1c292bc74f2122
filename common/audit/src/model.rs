use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One wire message bound for the broker. Messages carry no headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Rejects an empty topic or partition key; every published message must be routable.
    pub fn new(topic: impl Into<String>, partition_key: impl Into<String>, payload: Vec<u8>) -> PublishResult<Self> {
        let topic = topic.into();
        let partition_key = partition_key.into();
        if topic.trim().is_empty() {
            return Err(PublishError::InvalidEvent("topic must not be empty".into()));
        }
        if partition_key.is_empty() {
            return Err(PublishError::InvalidEvent("partition key must not be empty".into()));
        }
        Ok(Self { topic, partition_key, payload })
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Where the broker stored an acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Closing,
    Closed,
}

impl ManagerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ManagerState::Uninitialized => 0,
            ManagerState::Initializing => 1,
            ManagerState::Ready => 2,
            ManagerState::Closing => 3,
            ManagerState::Closed => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ManagerState::Uninitialized,
            1 => ManagerState::Initializing,
            2 => ManagerState::Ready,
            3 => ManagerState::Closing,
            _ => ManagerState::Closed,
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Initializing => "initializing",
            ManagerState::Ready => "ready",
            ManagerState::Closing => "closing",
            ManagerState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("invalid producer configuration: {0}")]
    Config(String),
    #[error("broker client could not be created: {0}")]
    Client(String),
    #[error("connection manager unavailable ({0})")]
    Unavailable(ManagerState),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),
    #[error("message abandoned before delivery")]
    Abandoned,
}

impl PublishError {
    /// Initialization errors leave the manager slot empty so a later call can retry.
    pub fn is_initialization(&self) -> bool {
        matches!(self, PublishError::Config(_) | PublishError::Client(_))
    }

    /// Usage errors are reported before any network attempt was made.
    pub fn is_usage(&self) -> bool {
        matches!(self, PublishError::Unavailable(_))
    }
}

pub type PublishResult<T> = Result<T, PublishError>;
