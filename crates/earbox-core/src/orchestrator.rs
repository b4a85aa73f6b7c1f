//! Instance orchestrator
//!
//! Drives one invocation through the instance lifecycle:
//!
//! ```text
//! NoTarget ──► Launching ──► Ready | LaunchFailed
//!          └─► Resolving ──► Ready | NotFound
//! Ready ──► JobDispatched | BootstrapReplayed | DispatchFailed
//! ```
//!
//! The caller picks the path with an [`Intent`]. Launch always creates a new
//! instance. Every other intent acts on a named instance and fails as soon as
//! that instance is not running; nothing is retried or waited on.

use crate::api::{CommandChannel, ComputeProvider, CredentialSource, LaunchRequest, Session};
use crate::config::{session_name, DeployConfig, JobParameters, LaunchSpec};
use crate::error::OrchestratorError;
use crate::script::{job_command, replay_commands, startup_script};
use crate::state_machine::Lifecycle;
use crate::types::{CommandId, InstanceHandle, InstanceId, InstanceState, LifecycleState};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// What the caller wants done in this invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Create a new instance that runs the job from its startup script
    Launch(LaunchSpec),
    /// Check that a named instance is running
    ReuseOnly {
        /// Instance to check
        instance_id: InstanceId,
    },
    /// Re-run the startup script on a running instance
    ReuseAndReplay {
        /// Instance to replay on
        instance_id: InstanceId,
    },
    /// Run the job container once on a running instance
    ReuseAndDispatch {
        /// Instance to run the job on
        instance_id: InstanceId,
    },
}

impl Intent {
    /// Intent for the usual operator request: launch when no instance is
    /// named, otherwise dispatch the job or replay the bootstrap.
    #[must_use]
    pub fn from_request(
        instance_id: Option<InstanceId>,
        replay_bootstrap: bool,
        launch: LaunchSpec,
    ) -> Self {
        match instance_id {
            None => Self::Launch(launch),
            Some(instance_id) if replay_bootstrap => Self::ReuseAndReplay { instance_id },
            Some(instance_id) => Self::ReuseAndDispatch { instance_id },
        }
    }

    /// Named instance, if the intent has one
    #[must_use]
    pub fn target(&self) -> Option<&InstanceId> {
        match self {
            Self::Launch(_) => None,
            Self::ReuseOnly { instance_id }
            | Self::ReuseAndReplay { instance_id }
            | Self::ReuseAndDispatch { instance_id } => Some(instance_id),
        }
    }
}

/// Successful outcome of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Instance acted on
    pub instance: InstanceHandle,
    /// Set when a command was sent to the instance
    pub command_id: Option<CommandId>,
    /// Log group the job writes to
    pub log_group: String,
    /// Log stream the job writes to
    pub log_stream: String,
    /// Key the job writes its result document under
    pub output_key: String,
    /// Every state passed through, starting at `NoTarget`
    pub trace: Vec<InstanceState>,
}

impl Deployment {
    /// Last state reached
    #[must_use]
    pub fn final_state(&self) -> InstanceState {
        self.trace.last().copied().unwrap_or(InstanceState::NoTarget)
    }
}

/// Assume the automation role named in the config
///
/// Fails before any provider contact if no role is configured.
pub fn acquire_session(
    credentials: &dyn CredentialSource,
    config: &DeployConfig,
) -> Result<Session, OrchestratorError> {
    let role_arn = config.automation_role()?;
    let name = session_name(Utc::now());
    tracing::info!("Assuming role {} as {}", role_arn, name);
    Ok(credentials.assume_role(role_arn, &name)?)
}

/// Launches, resolves and dispatches to compute instances
pub struct InstanceOrchestrator {
    compute: Arc<dyn ComputeProvider>,
    channel: Arc<dyn CommandChannel>,
    launch_timeout: Option<Duration>,
}

impl InstanceOrchestrator {
    /// Orchestrator with an unbounded launch wait
    pub fn new(compute: Arc<dyn ComputeProvider>, channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            compute,
            channel,
            launch_timeout: None,
        }
    }

    /// Bound the wait for a launched instance to run
    #[must_use]
    pub fn with_launch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Run one invocation to completion
    pub fn execute(
        &self,
        intent: &Intent,
        params: &JobParameters,
    ) -> Result<Deployment, OrchestratorError> {
        let mut lifecycle = Lifecycle::new();

        let instance = match intent {
            Intent::Launch(spec) => self.launch(&mut lifecycle, spec, params)?,
            Intent::ReuseOnly { instance_id }
            | Intent::ReuseAndReplay { instance_id }
            | Intent::ReuseAndDispatch { instance_id } => {
                self.resolve(&mut lifecycle, instance_id)?
            }
        };

        let command_id = match intent {
            Intent::ReuseAndReplay { .. } => {
                tracing::info!("Re-running user data on existing instance {}", instance.instance_id);
                Some(self.dispatch(
                    &mut lifecycle,
                    &instance.instance_id,
                    &replay_commands(params),
                    InstanceState::BootstrapReplayed,
                )?)
            }
            Intent::ReuseAndDispatch { .. } => {
                tracing::info!("Running job on existing instance {}", instance.instance_id);
                Some(self.dispatch(
                    &mut lifecycle,
                    &instance.instance_id,
                    &[job_command(params)],
                    InstanceState::JobDispatched,
                )?)
            }
            Intent::Launch(_) | Intent::ReuseOnly { .. } => None,
        };

        Ok(Deployment {
            instance,
            command_id,
            log_group: params.log_group.clone(),
            log_stream: params.log_stream.clone(),
            output_key: params.output_key.clone(),
            trace: lifecycle.into_trace(),
        })
    }

    /// Create an instance and wait for it to run
    fn launch(
        &self,
        lifecycle: &mut Lifecycle,
        spec: &LaunchSpec,
        params: &JobParameters,
    ) -> Result<InstanceHandle, OrchestratorError> {
        lifecycle.advance(InstanceState::Launching)?;
        tracing::info!(
            ami = %spec.image_id,
            instance_type = %spec.instance_type,
            region = %params.region,
            "Launching instance"
        );

        let request = LaunchRequest {
            image_id: spec.image_id.clone(),
            instance_type: spec.instance_type.clone(),
            user_data: startup_script(params),
            instance_profile: spec.instance_profile.clone(),
            terminate_on_shutdown: true,
        };

        let launched = self.compute.create(&request).and_then(|instance_id| {
            tracing::info!("Waiting for instance {} to start...", instance_id);
            self.compute
                .wait_until_running(&instance_id, self.launch_timeout)?;
            let description = self.compute.describe(&instance_id)?;
            Ok((instance_id, description))
        });

        match launched {
            Ok((instance_id, description)) => {
                lifecycle.advance(InstanceState::Ready)?;
                tracing::info!(
                    "Instance {} is running at {}",
                    instance_id,
                    description.network_address.as_deref().unwrap_or("<no address>")
                );
                Ok(InstanceHandle {
                    instance_id,
                    network_address: description.network_address,
                    lifecycle_state: description.lifecycle_state,
                })
            }
            Err(e) => {
                lifecycle.advance(InstanceState::LaunchFailed)?;
                tracing::error!("Launch failed: {}", e);
                Err(OrchestratorError::LaunchFailed(e))
            }
        }
    }

    /// Look up a named instance; anything but `running` is a failure
    fn resolve(
        &self,
        lifecycle: &mut Lifecycle,
        instance_id: &InstanceId,
    ) -> Result<InstanceHandle, OrchestratorError> {
        lifecycle.advance(InstanceState::Resolving)?;

        let description = match self.compute.describe(instance_id) {
            Ok(description) => description,
            Err(e) => {
                lifecycle.advance(InstanceState::NotFound)?;
                tracing::error!("Failed to get instance {}: {}", instance_id, e);
                return Err(OrchestratorError::InstanceNotFound {
                    instance_id: instance_id.clone(),
                    reason: e.to_string(),
                });
            }
        };

        if description.lifecycle_state != LifecycleState::Running {
            lifecycle.advance(InstanceState::NotFound)?;
            tracing::error!(
                "Instance {} is not running (state: {})",
                instance_id,
                description.lifecycle_state
            );
            return Err(OrchestratorError::NotRunning {
                instance_id: instance_id.clone(),
                state: description.lifecycle_state,
            });
        }

        lifecycle.advance(InstanceState::Ready)?;
        tracing::info!(
            instance_type = description.instance_type.as_deref().unwrap_or("unknown"),
            "Using existing instance {} at {}",
            instance_id,
            description.network_address.as_deref().unwrap_or("<no address>")
        );
        Ok(InstanceHandle {
            instance_id: instance_id.clone(),
            network_address: description.network_address,
            lifecycle_state: description.lifecycle_state,
        })
    }

    /// Send commands to a ready instance without waiting for them to finish
    fn dispatch(
        &self,
        lifecycle: &mut Lifecycle,
        instance_id: &InstanceId,
        commands: &[String],
        done: InstanceState,
    ) -> Result<CommandId, OrchestratorError> {
        match self.channel.send(instance_id, commands) {
            Ok(command_id) => {
                lifecycle.advance(done)?;
                tracing::info!("Command sent to {} with ID: {}", instance_id, command_id);
                Ok(command_id)
            }
            Err(source) => {
                lifecycle.advance(InstanceState::DispatchFailed)?;
                tracing::error!(
                    "Failed to run command on instance {}: {} (check the execution agent and its permissions)",
                    instance_id,
                    source
                );
                Err(OrchestratorError::DispatchFailed {
                    instance_id: instance_id.clone(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for InstanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOrchestrator")
            .field("launch_timeout", &self.launch_timeout)
            .finish_non_exhaustive()
    }
}
