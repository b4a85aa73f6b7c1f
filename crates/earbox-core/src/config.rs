//! Configuration
//!
//! Two configurations exist:
//! - `DeployConfig`, the JSON file read on the operator's side to launch or
//!   reuse an instance
//! - `JobConfig`, resolved from the environment inside the container
//!
//! `JobParameters` is the parameter set passed from one to the other, both as
//! environment variables and as command-line flags.

use crate::error::ConfigError;
use crate::types::ObjectKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Region used when `AWS_REGION` is unset
pub const DEFAULT_REGION: &str = "eu-north-1";
/// Input prefix used when none is configured
pub const DEFAULT_INPUT_PREFIX: &str = "input_folder/";
/// Result document key used when `OUTPUT_KEY` is unset
pub const DEFAULT_OUTPUT_KEY: &str = "test_output.json";
/// Log group used when `LOG_GROUP` is unset
pub const DEFAULT_LOG_GROUP: &str = "/aws/ec2/earbox-processing";
/// Prefix of stream names the job generates for itself
pub const JOB_LOG_STREAM_PREFIX: &str = "earbox-job-";

/// Name of the control file read from the input prefix
pub const CONTROL_FILE_NAME: &str = "session_para";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Deployment configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Region, buckets and input prefix
    pub environment: EnvironmentSection,
    /// Log destination
    pub cloudwatch: LogSection,
    /// Job image
    pub docker: ContainerSection,
    /// Roles and profiles
    #[serde(default)]
    pub iam: IamSection,
    /// Instance used in test mode
    pub test_instance: InstanceProfile,
    /// Instance used in production mode
    pub production_instance: InstanceProfile,
    /// Upper bound on waiting for a launched instance to run; unbounded when absent
    #[serde(default)]
    pub launch_timeout_secs: Option<u64>,
}

/// `environment` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSection {
    /// Provider region
    pub region: String,
    /// Bucket holding the input images
    #[serde(default)]
    pub input_bucket: Option<String>,
    /// Bucket receiving the result document
    #[serde(default)]
    pub output_bucket: Option<String>,
    /// Key prefix of the input images
    #[serde(default = "default_input_prefix")]
    pub input_prefix: String,
}

/// `cloudwatch` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSection {
    /// Group the job's stream is created in
    pub log_group: String,
    /// Prefix of generated stream names
    pub log_stream_prefix: String,
}

/// `docker` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSection {
    /// Image reference the instance pulls and runs
    pub image: String,
    /// Log in to the image registry before pulling
    #[serde(default)]
    pub ecr_auth: bool,
}

/// `iam` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamSection {
    /// Instance profile attached to launched instances
    #[serde(default)]
    pub role_name: Option<String>,
    /// Role assumed before any provider call
    #[serde(default)]
    pub automation_role_arn: Option<String>,
    /// Local credentials profile the role is assumed from
    #[serde(default)]
    pub base_profile: Option<String>,
}

/// Machine image and size for one deployment mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProfile {
    /// Machine image id
    pub ami_id: String,
    /// Machine size
    pub instance_type: String,
}

fn default_input_prefix() -> String {
    DEFAULT_INPUT_PREFIX.to_string()
}

/// Which instance profile a launch uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Small instance for trial runs
    #[default]
    Test,
    /// Full-size instance
    Production,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => f.write_str("test"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Self::Test),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown deployment mode: {other}")),
        }
    }
}

/// Everything needed to create one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Machine image id
    pub image_id: String,
    /// Machine size
    pub instance_type: String,
    /// Instance profile to attach
    pub instance_profile: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

impl DeployConfig {
    /// Parse a config document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Override the input bucket
    #[must_use]
    pub fn with_input_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.environment.input_bucket = Some(bucket.into());
        self
    }

    /// Override the output bucket
    #[must_use]
    pub fn with_output_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.environment.output_bucket = Some(bucket.into());
        self
    }

    /// Override the input prefix
    #[must_use]
    pub fn with_input_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.environment.input_prefix = prefix.into();
        self
    }

    /// Bound the wait for a launched instance; `None` leaves it unbounded
    #[must_use]
    pub fn with_launch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.launch_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    /// Configured input bucket; empty counts as missing
    pub fn input_bucket(&self) -> Result<&str, ConfigError> {
        non_empty(self.environment.input_bucket.as_ref())
            .ok_or(ConfigError::Missing("environment.input_bucket"))
    }

    /// Configured output bucket; empty counts as missing
    pub fn output_bucket(&self) -> Result<&str, ConfigError> {
        non_empty(self.environment.output_bucket.as_ref())
            .ok_or(ConfigError::Missing("environment.output_bucket"))
    }

    /// Role to assume before contacting the provider
    pub fn automation_role(&self) -> Result<&str, ConfigError> {
        non_empty(self.iam.automation_role_arn.as_ref())
            .ok_or(ConfigError::Missing("iam.automation_role_arn"))
    }

    /// Check the settings every action needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.region.is_empty() {
            return Err(ConfigError::Missing("environment.region"));
        }
        self.input_bucket()?;
        self.output_bucket()?;
        if self.docker.image.is_empty() {
            return Err(ConfigError::Missing("docker.image"));
        }
        if self.cloudwatch.log_group.is_empty() {
            return Err(ConfigError::Missing("cloudwatch.log_group"));
        }
        Ok(())
    }

    /// Instance settings for `mode`
    #[must_use]
    pub fn instance_profile(&self, mode: DeploymentMode) -> &InstanceProfile {
        match mode {
            DeploymentMode::Test => &self.test_instance,
            DeploymentMode::Production => &self.production_instance,
        }
    }

    /// What a launch in `mode` creates
    #[must_use]
    pub fn launch_spec(&self, mode: DeploymentMode) -> LaunchSpec {
        let profile = self.instance_profile(mode);
        LaunchSpec {
            image_id: profile.ami_id.clone(),
            instance_type: profile.instance_type.clone(),
            instance_profile: non_empty(self.iam.role_name.as_ref()).map(str::to_string),
        }
    }

    /// Configured launch wait bound
    #[must_use]
    pub fn launch_timeout(&self) -> Option<Duration> {
        self.launch_timeout_secs.map(Duration::from_secs)
    }

    /// Resolve the parameter set for one run
    pub fn job_parameters(
        &self,
        log_stream: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Result<JobParameters, ConfigError> {
        self.validate()?;
        Ok(JobParameters {
            region: self.environment.region.clone(),
            input_bucket: self.input_bucket()?.to_string(),
            output_bucket: self.output_bucket()?.to_string(),
            input_prefix: self.environment.input_prefix.clone(),
            output_key: output_key.into(),
            log_group: self.cloudwatch.log_group.clone(),
            log_stream: log_stream.into(),
            container_image: self.docker.image.clone(),
            registry_auth: self.docker.ecr_auth,
        })
    }

    /// Resolve the parameter set with a fresh log stream name and output key
    pub fn fresh_job_parameters(&self) -> Result<JobParameters, ConfigError> {
        self.job_parameters(
            generate_log_stream(&self.cloudwatch.log_stream_prefix),
            generate_output_key(),
        )
    }
}

/// Parameter set handed to the containerized job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Provider region
    pub region: String,
    /// Bucket holding the input images
    pub input_bucket: String,
    /// Bucket receiving the result document
    pub output_bucket: String,
    /// Key prefix of the input images
    pub input_prefix: String,
    /// Key of the result document
    pub output_key: String,
    /// Log group of the job's stream
    pub log_group: String,
    /// The job's log stream
    pub log_stream: String,
    /// Image the instance runs
    pub container_image: String,
    /// Log in to the image registry before pulling
    pub registry_auth: bool,
}

/// Settings the job reads inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Provider region
    pub region: String,
    /// Bucket holding the input images
    pub input_bucket: String,
    /// Bucket receiving the result document
    pub output_bucket: String,
    /// Key prefix of the input images
    pub input_prefix: String,
    /// Key of the result document
    pub output_key: String,
    /// Log group of the job's stream
    pub log_group: String,
    /// The job's log stream
    pub log_stream: String,
}

impl JobConfig {
    /// Resolve settings through `lookup`, which maps a variable name to its value
    ///
    /// `INPUT_BUCKET` and `OUTPUT_BUCKET` are required and an empty value
    /// counts as missing. Everything else has a default that applies only when
    /// the variable is unset, so `INPUT_PREFIX=""` stays empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        Ok(Self {
            region: lookup("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            input_bucket: required("INPUT_BUCKET")?,
            output_bucket: required("OUTPUT_BUCKET")?,
            input_prefix: lookup("INPUT_PREFIX").unwrap_or_else(default_input_prefix),
            output_key: lookup("OUTPUT_KEY").unwrap_or_else(|| DEFAULT_OUTPUT_KEY.to_string()),
            log_group: lookup("LOG_GROUP").unwrap_or_else(|| DEFAULT_LOG_GROUP.to_string()),
            log_stream: lookup("LOG_STREAM")
                .unwrap_or_else(|| generate_log_stream(JOB_LOG_STREAM_PREFIX)),
        })
    }

    /// Resolve settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Key of the control file under the input prefix
    #[must_use]
    pub fn control_file_key(&self) -> ObjectKey {
        ObjectKey::new(format!("{}{}", self.input_prefix, CONTROL_FILE_NAME))
    }

    /// `s3://` location of the result document
    #[must_use]
    pub fn output_location(&self) -> String {
        format!("s3://{}/{}", self.output_bucket, self.output_key)
    }
}

impl From<&JobParameters> for JobConfig {
    fn from(params: &JobParameters) -> Self {
        Self {
            region: params.region.clone(),
            input_bucket: params.input_bucket.clone(),
            output_bucket: params.output_bucket.clone(),
            input_prefix: params.input_prefix.clone(),
            output_key: params.output_key.clone(),
            log_group: params.log_group.clone(),
            log_stream: params.log_stream.clone(),
        }
    }
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// `{prefix}{timestamp}-{suffix}`
#[must_use]
pub fn log_stream_name(prefix: &str, at: DateTime<Utc>, suffix: &str) -> String {
    format!("{prefix}{}-{suffix}", at.format(TIMESTAMP_FORMAT))
}

/// `results/output_{timestamp}-{suffix}.json`
#[must_use]
pub fn output_key_name(at: DateTime<Utc>, suffix: &str) -> String {
    format!("results/output_{}-{suffix}.json", at.format(TIMESTAMP_FORMAT))
}

/// Unique log stream name under `prefix`
#[must_use]
pub fn generate_log_stream(prefix: &str) -> String {
    log_stream_name(prefix, Utc::now(), &short_id())
}

/// Unique result document key
#[must_use]
pub fn generate_output_key() -> String {
    output_key_name(Utc::now(), &short_id())
}

/// Session name for role assumption at `at`
#[must_use]
pub fn session_name(at: DateTime<Utc>) -> String {
    format!("automation-session-{}", at.timestamp())
}
