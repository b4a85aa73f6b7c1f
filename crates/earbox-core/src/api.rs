//! Collaborator interfaces
//!
//! Each external system the core talks to sits behind one narrow trait so
//! the orchestration and ingest logic can run against in-memory fakes.

use crate::error::{ChannelError, CredentialError, ProviderError, SinkError, StorageError};
use crate::types::{
    CommandId, DeliveryToken, InstanceId, LifecycleState, LogEvent, ObjectKey, PixelGrid,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full key
    pub key: ObjectKey,
    /// Size in bytes
    pub size: u64,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page, in key order
    pub objects: Vec<ObjectSummary>,
    /// Present when more pages follow
    pub next_continuation: Option<String>,
}

/// Remote object storage keyed by bucket and key
pub trait Storage: Send + Sync {
    /// List one page of objects under `prefix`
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError>;

    /// Read a whole object
    fn get(&self, bucket: &str, key: &ObjectKey) -> Result<Vec<u8>, StorageError>;

    /// Write a whole object, replacing any previous body
    fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<(), StorageError>;

    /// List every object under `prefix`, draining all pages
    ///
    /// Nothing is returned unless every page was fetched.
    fn list_all(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(bucket, prefix, continuation.as_deref())?;
            objects.extend(page.objects);
            match page.next_continuation {
                Some(next) if continuation.as_deref() != Some(next.as_str()) => {
                    continuation = Some(next);
                }
                Some(next) => return Err(StorageError::InvalidContinuation(next)),
                None => return Ok(objects),
            }
        }
    }
}

/// Parameters for creating one compute instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Machine image to boot
    pub image_id: String,
    /// Machine size
    pub instance_type: String,
    /// Startup script run on first boot
    pub user_data: String,
    /// Instance profile granting the job its permissions
    pub instance_profile: Option<String>,
    /// Terminate rather than stop when the instance shuts itself down
    pub terminate_on_shutdown: bool,
}

/// What the provider reports about one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    /// Current provider state
    pub lifecycle_state: LifecycleState,
    /// Public address, if assigned
    pub network_address: Option<String>,
    /// Machine size, if reported
    pub instance_type: Option<String>,
}

/// Remote compute API
pub trait ComputeProvider: Send + Sync {
    /// Create one instance and return its id without waiting for it
    fn create(&self, request: &LaunchRequest) -> Result<InstanceId, ProviderError>;

    /// Current state of one instance
    fn describe(&self, instance_id: &InstanceId) -> Result<InstanceDescription, ProviderError>;

    /// Block until the instance runs. `None` leaves the bound to the provider.
    fn wait_until_running(
        &self,
        instance_id: &InstanceId,
        timeout: Option<Duration>,
    ) -> Result<(), ProviderError>;
}

/// Out-of-band shell execution on a running instance
pub trait CommandChannel: Send + Sync {
    /// Queue `commands` to run in order on `target`
    fn send(&self, target: &InstanceId, commands: &[String]) -> Result<CommandId, ChannelError>;
}

/// Ordered remote log streams
pub trait LogSink: Send + Sync {
    /// Create the stream if absent. An existing stream is not an error.
    fn ensure_stream(&self, group: &str, stream: &str) -> Result<(), SinkError>;

    /// Append one event. `token` must be the value returned by the previous
    /// append to the same stream, and absent on the first one.
    fn append(
        &self,
        group: &str,
        stream: &str,
        event: &LogEvent,
        token: Option<&DeliveryToken>,
    ) -> Result<DeliveryToken, SinkError>;
}

/// Raster image decoding
pub trait Decoder: Send + Sync {
    /// `None` when the bytes are not a decodable image
    fn decode(&self, bytes: &[u8]) -> Option<PixelGrid>;
}

/// Authenticated session produced by role assumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session name presented to the provider
    pub name: String,
    /// Role the session acts as
    pub role_arn: String,
    /// When the credentials lapse, if known
    pub expires_at: Option<DateTime<Utc>>,
}

/// Short-lived credential issuer
pub trait CredentialSource: Send + Sync {
    /// Assume `role_arn` under `session_name`
    fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<Session, CredentialError>;
}
