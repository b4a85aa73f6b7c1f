//! Error types for earbox
//!
//! Soft failures (one unreadable image, one incomplete group, an unreachable
//! log sink) never surface as errors; components record them and carry on.
//! The types here cover collaborator failures and the hard failures that end
//! an orchestration action.

use crate::types::{InstanceId, InstanceState, LifecycleState};

/// Remote object storage failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Bucket does not exist
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    /// Object does not exist
    #[error("no such key: {bucket}/{key}")]
    NoSuchKey {
        /// Bucket searched
        bucket: String,
        /// Missing key
        key: String,
    },

    /// Caller may not read or write the object
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Listing resumed with a token the store did not issue
    #[error("invalid continuation token: {0}")]
    InvalidContinuation(String),

    /// Store could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Compute provider failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// No instance with this id
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// Instance settled in a state other than running
    #[error("instance {instance_id} did not reach running state (state: {state})")]
    NeverRunning {
        /// Instance waited on
        instance_id: InstanceId,
        /// State it settled in
        state: LifecycleState,
    },

    /// Wait deadline passed
    #[error("timed out after {timeout_secs}s waiting for {instance_id} to run")]
    WaitTimedOut {
        /// Instance waited on
        instance_id: InstanceId,
        /// Deadline that passed
        timeout_secs: u64,
    },

    /// Any other rejected request
    #[error("provider request failed: {0}")]
    Request(String),
}

/// Remote command channel failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Instance has no agent to run commands
    #[error("no execution agent registered on {0}")]
    AgentNotRegistered(InstanceId),

    /// Caller may not send commands
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Any other rejected request
    #[error("command request failed: {0}")]
    Request(String),
}

/// Log sink failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Append carried a stale or missing delivery token
    #[error("invalid sequence token (expected {expected:?})")]
    InvalidSequenceToken {
        /// Token the sink expected, if any
        expected: Option<String>,
    },

    /// Stream was never created
    #[error("log stream not found: {group}/{stream}")]
    StreamNotFound {
        /// Log group
        group: String,
        /// Stream within the group
        stream: String,
    },

    /// Sink could not be reached
    #[error("log sink unavailable: {0}")]
    Unavailable(String),
}

/// Role assumption failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// Role assumption was refused
    #[error("failed to assume role {role_arn}: {reason}")]
    AssumeRole {
        /// Role requested
        role_arn: String,
        /// Refusal reason
        reason: String,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is absent or empty
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for the expected shape
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Illegal orchestration state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: InstanceState,
        /// Requested state
        to: InstanceState,
    },
}

/// Hard failures that end an orchestration action
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Deployment settings are missing or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Automation session could not be established
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialError),

    /// Instance creation or the wait for it to run failed
    #[error("launch failed: {0}")]
    LaunchFailed(#[source] ProviderError),

    /// Named instance could not be described
    #[error("failed to get instance {instance_id}: {reason}")]
    InstanceNotFound {
        /// Instance requested
        instance_id: InstanceId,
        /// Provider's explanation
        reason: String,
    },

    /// Named instance exists but is not running
    #[error("instance {instance_id} is not running (state: {state})")]
    NotRunning {
        /// Instance requested
        instance_id: InstanceId,
        /// State it is in
        state: LifecycleState,
    },

    /// Command channel rejected the dispatch
    #[error("failed to run command on {instance_id}: {source}")]
    DispatchFailed {
        /// Target instance
        instance_id: InstanceId,
        /// Channel failure
        #[source]
        source: ChannelError,
    },

    /// Orchestration attempted an illegal step
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

impl OrchestratorError {
    /// Launches always create a new resource, so the caller may retry them
    /// by recreation. Actions on a named instance are never retried.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LaunchFailed(_))
    }

    /// Whether the failure happened before any provider call
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Credentials(_))
    }

    /// The state the invocation ended in, if it got past session setup
    #[must_use]
    pub fn terminal_state(&self) -> Option<InstanceState> {
        match self {
            Self::LaunchFailed(_) => Some(InstanceState::LaunchFailed),
            Self::InstanceNotFound { .. } | Self::NotRunning { .. } => {
                Some(InstanceState::NotFound)
            }
            Self::DispatchFailed { .. } => Some(InstanceState::DispatchFailed),
            Self::Config(_) | Self::Credentials(_) | Self::StateMachine(_) => None,
        }
    }
}
