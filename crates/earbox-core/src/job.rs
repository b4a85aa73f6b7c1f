//! Batch job driver
//!
//! The flow run inside the container: read the control file, group and
//! validate the input images, ingest them, and write one result document to
//! the output bucket. Every step reports to the job's log stream; none of
//! them aborts the run.

use crate::api::{Decoder, Storage};
use crate::config::JobConfig;
use crate::grouping::{AssetGroup, AssetGrouper};
use crate::ingest::{ImageIngestPipeline, IngestReport, IngestResult};
use crate::log_stream::LogStream;
use crate::types::{GroupKey, ObjectKey};
use crate::validation::{CompletenessSummary, GroupValidator};
use crate::VERSION;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Document written to the output bucket at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// Runtime and build details
    pub environment: BTreeMap<String, String>,
    /// Control file text, or a description of why it could not be read
    pub control_file_content: String,
    /// Complete groups by key
    #[serde(deserialize_with = "crate::grouping::deserialize_keyed")]
    pub valid_groups: BTreeMap<GroupKey, AssetGroup>,
    /// One entry per ingested image
    pub processed_images: Vec<IngestResult>,
}

/// What one run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// Where the result document goes
    pub output_location: String,
    /// Validation outcome
    pub completeness: CompletenessSummary,
    /// Complete groups by key
    pub valid_groups: BTreeMap<GroupKey, AssetGroup>,
    /// Ingest results and counts
    pub ingest: IngestReport,
    /// Whether the result document was stored
    pub result_written: bool,
}

/// Runtime and build details recorded in the result document
#[must_use]
pub fn environment_metadata(config: &JobConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("earbox-core".to_string(), VERSION.to_string()),
        ("os".to_string(), std::env::consts::OS.to_string()),
        ("arch".to_string(), std::env::consts::ARCH.to_string()),
        ("region".to_string(), config.region.clone()),
    ])
}

/// One containerized batch run
pub struct BatchJob {
    config: JobConfig,
    storage: Arc<dyn Storage>,
    decoder: Arc<dyn Decoder>,
}

impl BatchJob {
    /// Job over `storage`, decoding with `decoder`
    pub fn new(config: JobConfig, storage: Arc<dyn Storage>, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            config,
            storage,
            decoder,
        }
    }

    /// Resolved settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run every step and write the result document; never aborts early
    pub fn run(&self, log: &mut LogStream) -> JobSummary {
        let config = &self.config;
        log.info("Starting batch processing job");
        log.info(format!(
            "Input bucket: {}, Output bucket: {}",
            config.input_bucket, config.output_bucket
        ));
        log.info(format!(
            "Input prefix: {}, Output key: {}",
            config.input_prefix, config.output_key
        ));

        let control_file_content = self.read_control_file(log);
        let environment = environment_metadata(config);

        let keys = self.list_input(log);
        let grouping = AssetGrouper::new().group(&keys);
        let validation = GroupValidator::new().validate(&grouping, log);

        log.info("Starting image processing...");
        let pipeline = ImageIngestPipeline::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.decoder),
            config.input_bucket.clone(),
        );
        let ingest = pipeline.run(Some(&config.input_prefix), log);

        let document = ResultDocument {
            environment,
            control_file_content,
            valid_groups: validation.valid.clone(),
            processed_images: ingest.results.clone(),
        };
        let result_written = self.write_results(&document, log);

        let output_location = config.output_location();
        if result_written {
            log.info(format!("Results written to: {output_location}"));
        }
        log.info("Job completed successfully");

        JobSummary {
            output_location,
            completeness: validation.summary,
            valid_groups: validation.valid,
            ingest,
            result_written,
        }
    }

    /// Control file content, or an error description standing in for it
    fn read_control_file(&self, log: &mut LogStream) -> String {
        let key = self.config.control_file_key();
        log.info(format!("Reading input file: {key}"));
        let read = self
            .storage
            .get(&self.config.input_bucket, &key)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        match read {
            Ok(content) => {
                log.info(format!(
                    "Successfully read input file: {key} ({} characters)",
                    content.chars().count()
                ));
                content
            }
            Err(e) => {
                log.error(format!("Error reading input file {key}: {e}"));
                format!("Error reading input file: {e}")
            }
        }
    }

    fn list_input(&self, log: &mut LogStream) -> Vec<ObjectKey> {
        match self
            .storage
            .list_all(&self.config.input_bucket, &self.config.input_prefix)
        {
            Ok(objects) => objects.into_iter().map(|o| o.key).collect(),
            Err(e) => {
                log.error(format!(
                    "Failed to list {}/{}: {}",
                    self.config.input_bucket, self.config.input_prefix, e
                ));
                Vec::new()
            }
        }
    }

    fn write_results(&self, document: &ResultDocument, log: &mut LogStream) -> bool {
        let location = self.config.output_location();
        log.info(format!("Writing results to {location}"));

        let body = match serde_json::to_vec_pretty(document) {
            Ok(body) => body,
            Err(e) => {
                log.error(format!("Error serializing results: {e}"));
                return false;
            }
        };

        let key = ObjectKey::new(self.config.output_key.clone());
        match self.storage.put(&self.config.output_bucket, &key, body) {
            Ok(()) => {
                log.info(format!("Successfully wrote results to {location}"));
                true
            }
            Err(e) => {
                log.error(format!("Error writing output file: {e}"));
                false
            }
        }
    }
}
