//! Testing utilities for the earbox workspace
//!
//! In-memory collaborators, fixtures, and small helpers.

#![allow(missing_docs)]

use earbox_core::api::{
    CommandChannel, ComputeProvider, CredentialSource, Decoder, InstanceDescription,
    LaunchRequest, ListPage, LogSink, ObjectSummary, Session, Storage,
};
use earbox_core::config::{DeployConfig, JobConfig, JobParameters};
use earbox_core::error::{ChannelError, CredentialError, ProviderError, SinkError, StorageError};
use earbox_core::types::{
    CommandId, DeliveryToken, InstanceId, LifecycleState, LogEvent, LogLevel, ObjectKey, PixelGrid,
};
use earbox_core::LogStream;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StorageState {
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    get_failures: HashMap<String, StorageError>,
    list_failure: Option<StorageError>,
    put_failure: Option<StorageError>,
    list_calls: usize,
    get_calls: usize,
}

/// Bucket/key store with paginated listings
#[derive(Debug)]
pub struct InMemoryStorage {
    page_size: usize,
    state: Mutex<StorageState>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(StorageState::default()),
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    /// Make `get` of `key` fail with `error`
    pub fn fail_get(&self, key: &str, error: StorageError) {
        self.state.lock().get_failures.insert(key.to_string(), error);
    }

    pub fn fail_list(&self, error: StorageError) {
        self.state.lock().list_failure = Some(error);
    }

    pub fn fail_put(&self, error: StorageError) {
        self.state.lock().put_failure = Some(error);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }
}

impl Storage for InMemoryStorage {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if let Some(error) = &state.list_failure {
            return Err(error.clone());
        }

        let offset = match continuation {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StorageError::InvalidContinuation(token.to_string()))?,
        };

        let matching: Vec<ObjectSummary> = state
            .buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, body)| ObjectSummary {
                        key: ObjectKey::new(key.clone()),
                        size: body.len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let end = (offset + self.page_size).min(matching.len());
        let objects = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_continuation = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage {
            objects,
            next_continuation,
        })
    }

    fn get(&self, bucket: &str, key: &ObjectKey) -> Result<Vec<u8>, StorageError> {
        let mut state = self.state.lock();
        state.get_calls += 1;
        if let Some(error) = state.get_failures.get(key.as_str()) {
            return Err(error.clone());
        }
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key.as_str()))
            .cloned()
            .ok_or_else(|| StorageError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if let Some(error) = &state.put_failure {
            return Err(error.clone());
        }
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log sink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SinkState {
    streams: HashMap<(String, String), Vec<LogEvent>>,
    available: bool,
    rejected: usize,
}

/// Log sink that enforces delivery-token chaining
///
/// Tokens are the number of events already in the stream. A submission
/// carrying any other token is rejected.
#[derive(Debug)]
pub struct InMemoryLogSink {
    state: Mutex<SinkState>,
}

impl Default for InMemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                available: true,
                ..SinkState::default()
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn events(&self, group: &str, stream: &str) -> Vec<LogEvent> {
        self.state
            .lock()
            .streams
            .get(&(group.to_string(), stream.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn messages(&self, group: &str, stream: &str, level: LogLevel) -> Vec<String> {
        self.events(group, stream)
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    pub fn has_stream(&self, group: &str, stream: &str) -> bool {
        self.state
            .lock()
            .streams
            .contains_key(&(group.to_string(), stream.to_string()))
    }

    pub fn rejected(&self) -> usize {
        self.state.lock().rejected
    }
}

impl LogSink for InMemoryLogSink {
    fn ensure_stream(&self, group: &str, stream: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(SinkError::Unavailable("in-memory sink switched off".into()));
        }
        state
            .streams
            .entry((group.to_string(), stream.to_string()))
            .or_default();
        Ok(())
    }

    fn append(
        &self,
        group: &str,
        stream: &str,
        event: &LogEvent,
        token: Option<&DeliveryToken>,
    ) -> Result<DeliveryToken, SinkError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.available {
            state.rejected += 1;
            return Err(SinkError::Unavailable("in-memory sink switched off".into()));
        }
        let Some(events) = state
            .streams
            .get_mut(&(group.to_string(), stream.to_string()))
        else {
            state.rejected += 1;
            return Err(SinkError::StreamNotFound {
                group: group.to_string(),
                stream: stream.to_string(),
            });
        };

        let expected = (!events.is_empty()).then(|| events.len().to_string());
        if token.map(DeliveryToken::as_str) != expected.as_deref() {
            state.rejected += 1;
            return Err(SinkError::InvalidSequenceToken { expected });
        }

        events.push(event.clone());
        Ok(DeliveryToken::new(events.len().to_string()))
    }
}

/// Open a log stream on `sink` under fixed test names
pub fn open_test_stream(sink: &Arc<InMemoryLogSink>) -> LogStream {
    LogStream::open(sink.clone(), TEST_LOG_GROUP, TEST_LOG_STREAM)
}

pub const TEST_LOG_GROUP: &str = "/test/earbox";
pub const TEST_LOG_STREAM: &str = "test-stream";

// ---------------------------------------------------------------------------
// Compute provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeInstance {
    state: LifecycleState,
    address: Option<String>,
    instance_type: String,
}

#[derive(Debug, Default)]
struct ComputeState {
    instances: BTreeMap<InstanceId, FakeInstance>,
    launches: Vec<LaunchRequest>,
    waits: Vec<(InstanceId, Option<Duration>)>,
    create_failure: Option<ProviderError>,
    wait_failure: Option<ProviderError>,
    next_id: u64,
}

/// Compute provider holding instances in memory
///
/// Created instances start `pending` and become `running` with an address
/// when waited on.
#[derive(Debug, Default)]
pub struct FakeCompute {
    state: Mutex<ComputeState>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing instance in the given provider state
    pub fn with_instance(self, id: &str, state: &str, address: Option<&str>) -> Self {
        self.state.lock().instances.insert(
            InstanceId::new(id),
            FakeInstance {
                state: LifecycleState::from_provider(state),
                address: address.map(str::to_string),
                instance_type: "t3.large".to_string(),
            },
        );
        self
    }

    pub fn fail_create(&self, error: ProviderError) {
        self.state.lock().create_failure = Some(error);
    }

    pub fn fail_wait(&self, error: ProviderError) {
        self.state.lock().wait_failure = Some(error);
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state.lock().launches.clone()
    }

    pub fn waits(&self) -> Vec<(InstanceId, Option<Duration>)> {
        self.state.lock().waits.clone()
    }
}

impl ComputeProvider for FakeCompute {
    fn create(&self, request: &LaunchRequest) -> Result<InstanceId, ProviderError> {
        let mut state = self.state.lock();
        state.launches.push(request.clone());
        if let Some(error) = &state.create_failure {
            return Err(error.clone());
        }
        state.next_id += 1;
        let id = InstanceId::new(format!("i-{:017x}", state.next_id));
        state.instances.insert(
            id.clone(),
            FakeInstance {
                state: LifecycleState::Pending,
                address: None,
                instance_type: request.instance_type.clone(),
            },
        );
        Ok(id)
    }

    fn describe(&self, instance_id: &InstanceId) -> Result<InstanceDescription, ProviderError> {
        let state = self.state.lock();
        let instance = state
            .instances
            .get(instance_id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance_id.clone()))?;
        Ok(InstanceDescription {
            lifecycle_state: instance.state.clone(),
            network_address: instance.address.clone(),
            instance_type: Some(instance.instance_type.clone()),
        })
    }

    fn wait_until_running(
        &self,
        instance_id: &InstanceId,
        timeout: Option<Duration>,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.waits.push((instance_id.clone(), timeout));
        if let Some(error) = &state.wait_failure {
            return Err(error.clone());
        }
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance_id.clone()))?;
        instance.state = LifecycleState::Running;
        instance.address = Some(format!("{instance_id}.compute.example.internal"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub target: InstanceId,
    pub commands: Vec<String>,
}

/// Command channel that records every send
#[derive(Debug, Default)]
pub struct RecordingCommandChannel {
    sent: Mutex<Vec<SentCommand>>,
    failure: Mutex<Option<ChannelError>>,
}

impl RecordingCommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: ChannelError) {
        *self.failure.lock() = Some(error);
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }
}

impl CommandChannel for RecordingCommandChannel {
    fn send(&self, target: &InstanceId, commands: &[String]) -> Result<CommandId, ChannelError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let mut sent = self.sent.lock();
        sent.push(SentCommand {
            target: target.clone(),
            commands: commands.to_vec(),
        });
        Ok(CommandId::new(format!("cmd-{}", sent.len())))
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

const IMAGE_MAGIC: &str = "IMG";

/// Decoder for the fixture format `IMG <width> <height> <channels>`
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    fn decode(&self, bytes: &[u8]) -> Option<PixelGrid> {
        let text = std::str::from_utf8(bytes).ok()?;
        let mut parts = text.split_whitespace();
        if parts.next()? != IMAGE_MAGIC {
            return None;
        }
        Some(PixelGrid {
            width: parts.next()?.parse().ok()?,
            height: parts.next()?.parse().ok()?,
            channels: parts.next()?.parse().ok()?,
        })
    }
}

/// Bytes `HeaderDecoder` decodes to the given dimensions
pub fn encoded_image(width: u32, height: u32, channels: u8) -> Vec<u8> {
    format!("{IMAGE_MAGIC} {width} {height} {channels}").into_bytes()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Credential source that always grants, or always refuses, a session
#[derive(Debug, Default)]
pub struct StaticCredentials {
    refuse: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl StaticCredentials {
    pub fn granting() -> Self {
        Self::default()
    }

    pub fn refusing(reason: &str) -> Self {
        Self {
            refuse: Some(reason.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl CredentialSource for StaticCredentials {
    fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<Session, CredentialError> {
        self.calls
            .lock()
            .push((role_arn.to_string(), session_name.to_string()));
        if let Some(reason) = &self.refuse {
            return Err(CredentialError::AssumeRole {
                role_arn: role_arn.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(Session {
            name: session_name.to_string(),
            role_arn: role_arn.to_string(),
            expires_at: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Keys for one group: `primary` V-images and `secondary` I-images sharing
/// `suffix`, under `prefix`
///
/// Digits cycle through 1..=6; members past the sixth go into nested
/// folders so their filenames still match and land in the same group.
pub fn group_keys(prefix: &str, suffix: &str, primary: usize, secondary: usize) -> Vec<ObjectKey> {
    let member = |marker: char, i: usize| {
        let folder = if i < 6 { String::new() } else { format!("extra{i}/") };
        ObjectKey::new(format!("{prefix}{folder}{marker}{}{suffix}", i % 6 + 1))
    };
    (0..primary)
        .map(|i| member('V', i))
        .chain((0..secondary).map(|i| member('I', i)))
        .collect()
}

pub const SAMPLE_CONFIG: &str = r#"{
    "environment": {
        "region": "eu-north-1",
        "input_bucket": "earbox-input",
        "output_bucket": "earbox-output",
        "input_prefix": "input_folder/"
    },
    "cloudwatch": { "log_group": "/aws/ec2/earbox-processing", "log_stream_prefix": "earbox-run-" },
    "docker": { "image": "123456789012.dkr.ecr.eu-north-1.amazonaws.com/earbox:latest", "ecr_auth": true },
    "iam": {
        "role_name": "earbox-instance-role",
        "automation_role_arn": "arn:aws:iam::123456789012:role/earbox-automation"
    },
    "test_instance": { "ami_id": "ami-0test", "instance_type": "t3.large" },
    "production_instance": { "ami_id": "ami-0gpu", "instance_type": "g4dn.xlarge" }
}"#;

pub fn sample_config() -> DeployConfig {
    DeployConfig::from_json_str(SAMPLE_CONFIG).expect("sample config parses")
}

pub fn sample_parameters() -> JobParameters {
    sample_config()
        .job_parameters("earbox-run-20240501-120000-abcdef12", "results/output_test.json")
        .expect("sample config is complete")
}

pub fn sample_job_config() -> JobConfig {
    JobConfig::from(&sample_parameters())
}
