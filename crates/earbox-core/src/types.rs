//! Core types for earbox
//!
//! Defines the values shared by every component:
//! - Object and group keys
//! - Log events and delivery tokens
//! - Instance identifiers, lifecycle states and handles
//! - Orchestration states

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of an object in remote storage
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a key from a storage path
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Full key as stored
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the key
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ObjectKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Suffix shared by every member of one asset group
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Create a key from the filename suffix it stands for
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as it appears in filenames
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Provider-assigned compute instance identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap a provider-assigned id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as the provider spells it
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier returned by the command channel for a dispatched command
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Wrap a channel-assigned id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as the channel spells it
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Progress
    Info,
    /// Recoverable problem
    Warning,
    /// Failed step
    Error,
}

impl LogLevel {
    /// Upper-case level name used in formatted messages
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry submitted to a log stream
///
/// Events are ordered by submission, not by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Severity
    pub level: LogLevel,
    /// Free-form text
    pub message: String,
}

impl LogEvent {
    /// Create an event stamped with the current wall-clock time
    #[must_use]
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self::at(Utc::now().timestamp_millis(), level, message)
    }

    /// Create an event with an explicit timestamp
    #[must_use]
    pub fn at(timestamp_ms: i64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            level,
            message: message.into(),
        }
    }

    /// Message as written to the sink, prefixed with its level
    #[must_use]
    pub fn formatted(&self) -> String {
        format!("[{}] {}", self.level, self.message)
    }
}

/// Continuation value handed back by a log sink after each accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    /// Wrap a token issued by a sink
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token text as issued
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Provider-reported status of a compute instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Starting up
    Pending,
    /// Up and able to run commands
    Running,
    /// Going down, will be stopped
    Stopping,
    /// Down, can be started again
    Stopped,
    /// Going down, will be terminated
    ShuttingDown,
    /// Gone
    Terminated,
    /// A state name this crate does not know
    Other(String),
}

impl LifecycleState {
    /// Parse the provider's state name
    #[must_use]
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }

    /// Provider's name for the state
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Other(name) => name,
        }
    }

    /// Only running instances accept commands
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote compute resource targeted by one orchestration invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    /// Provider id
    pub instance_id: InstanceId,
    /// Public address, when the provider reports one
    pub network_address: Option<String>,
    /// Last observed provider state
    pub lifecycle_state: LifecycleState,
}

/// Orchestration states over one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Nothing chosen yet
    NoTarget,
    /// Creating a new instance
    Launching,
    /// Looking up a named instance
    Resolving,
    /// Instance is running
    Ready,
    /// Named instance is missing or not running
    NotFound,
    /// Creation or wait failed
    LaunchFailed,
    /// Job command sent
    JobDispatched,
    /// Startup script re-run
    BootstrapReplayed,
    /// Command channel rejected the send
    DispatchFailed,
}

/// Dimensions of a decoded raster image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelGrid {
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
    /// Samples per pixel
    pub channels: u8,
}
