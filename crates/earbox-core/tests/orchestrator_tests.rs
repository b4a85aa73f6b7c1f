use earbox_core::config::DeploymentMode;
use earbox_core::error::{ChannelError, ConfigError, OrchestratorError, ProviderError};
use earbox_core::orchestrator::{acquire_session, InstanceOrchestrator, Intent};
use earbox_core::script::job_command;
use earbox_core::types::{InstanceId, InstanceState, LifecycleState};
use earbox_test_utils::{
    sample_config, sample_parameters, FakeCompute, RecordingCommandChannel, StaticCredentials,
};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(
    compute: &Arc<FakeCompute>,
    channel: &Arc<RecordingCommandChannel>,
) -> InstanceOrchestrator {
    InstanceOrchestrator::new(compute.clone(), channel.clone())
}

#[test]
fn test_launch_creates_instance_with_startup_script() {
    let compute = Arc::new(FakeCompute::new());
    let channel = Arc::new(RecordingCommandChannel::new());
    let params = sample_parameters();
    let intent = Intent::Launch(sample_config().launch_spec(DeploymentMode::Test));

    let deployment = orchestrator(&compute, &channel)
        .execute(&intent, &params)
        .unwrap();

    assert_eq!(
        deployment.trace,
        vec![InstanceState::NoTarget, InstanceState::Launching, InstanceState::Ready]
    );
    assert!(deployment.command_id.is_none());
    assert!(deployment.instance.lifecycle_state.is_running());
    assert!(deployment.instance.network_address.is_some());
    assert_eq!(deployment.log_stream, params.log_stream);
    assert_eq!(deployment.output_key, params.output_key);

    let launches = compute.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].image_id, "ami-0test");
    assert_eq!(launches[0].instance_type, "t3.large");
    assert_eq!(launches[0].instance_profile.as_deref(), Some("earbox-instance-role"));
    assert!(launches[0].terminate_on_shutdown);
    assert!(launches[0].user_data.starts_with("#!/bin/bash"));
    assert!(launches[0].user_data.contains(&job_command(&params)));
    assert!(channel.sent().is_empty());
}

#[test]
fn test_launch_wait_uses_configured_timeout() {
    let compute = Arc::new(FakeCompute::new());
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::Launch(sample_config().launch_spec(DeploymentMode::Production));

    orchestrator(&compute, &channel)
        .with_launch_timeout(Some(Duration::from_secs(300)))
        .execute(&intent, &sample_parameters())
        .unwrap();

    let waits = compute.waits();
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].1, Some(Duration::from_secs(300)));
    assert_eq!(compute.launches()[0].instance_type, "g4dn.xlarge");
}

#[test]
fn test_launch_failure_is_reported() {
    let compute = Arc::new(FakeCompute::new());
    compute.fail_create(ProviderError::Request("InsufficientInstanceCapacity".into()));
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::Launch(sample_config().launch_spec(DeploymentMode::Test));

    let err = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::LaunchFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(err.terminal_state(), Some(InstanceState::LaunchFailed));
}

#[test]
fn test_launch_that_never_runs_fails() {
    let compute = Arc::new(FakeCompute::new());
    compute.fail_wait(ProviderError::WaitTimedOut {
        instance_id: InstanceId::new("i-00000000000000001"),
        timeout_secs: 10,
    });
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::Launch(sample_config().launch_spec(DeploymentMode::Test));

    let err = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::LaunchFailed(ProviderError::WaitTimedOut { .. })
    ));
}

#[test]
fn test_stopped_instance_is_never_sent_a_command() {
    let compute = Arc::new(FakeCompute::new().with_instance("i-stopped", "stopped", None));
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::ReuseAndDispatch {
        instance_id: InstanceId::new("i-stopped"),
    };

    let err = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap_err();

    match &err {
        OrchestratorError::NotRunning { instance_id, state } => {
            assert_eq!(instance_id.as_str(), "i-stopped");
            assert_eq!(*state, LifecycleState::Stopped);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "instance i-stopped is not running (state: stopped)");
    assert!(!err.is_retryable());
    assert!(channel.sent().is_empty());
    assert!(compute.launches().is_empty());
}

#[test]
fn test_only_running_instances_receive_commands() {
    let cases = [
        ("pending", LifecycleState::Pending),
        ("stopping", LifecycleState::Stopping),
        ("shutting-down", LifecycleState::ShuttingDown),
        ("terminated", LifecycleState::Terminated),
        ("rebooting", LifecycleState::Other("rebooting".to_string())),
    ];

    for (provider_state, expected) in cases {
        for replay in [false, true] {
            let compute = Arc::new(FakeCompute::new().with_instance("i-1", provider_state, None));
            let channel = Arc::new(RecordingCommandChannel::new());
            let instance_id = InstanceId::new("i-1");
            let intent = if replay {
                Intent::ReuseAndReplay { instance_id }
            } else {
                Intent::ReuseAndDispatch { instance_id }
            };

            let err = orchestrator(&compute, &channel)
                .execute(&intent, &sample_parameters())
                .unwrap_err();

            match &err {
                OrchestratorError::NotRunning { state, .. } => {
                    assert_eq!(*state, expected, "{provider_state}");
                }
                other => panic!("{provider_state}: unexpected error: {other}"),
            }
            assert_eq!(err.terminal_state(), Some(InstanceState::NotFound));
            assert!(channel.sent().is_empty(), "{provider_state}");
            assert!(compute.launches().is_empty(), "{provider_state}");
        }
    }
}

#[test]
fn test_unknown_instance_is_not_found() {
    let compute = Arc::new(FakeCompute::new());
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::ReuseAndReplay {
        instance_id: InstanceId::new("i-missing"),
    };

    let err = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::InstanceNotFound { .. }));
    assert_eq!(err.terminal_state(), Some(InstanceState::NotFound));
    assert!(channel.sent().is_empty());
}

#[test]
fn test_dispatch_sends_job_command_once() {
    let compute = Arc::new(FakeCompute::new().with_instance("i-live", "running", Some("10.0.0.5")));
    let channel = Arc::new(RecordingCommandChannel::new());
    let params = sample_parameters();
    let intent = Intent::ReuseAndDispatch {
        instance_id: InstanceId::new("i-live"),
    };

    let deployment = orchestrator(&compute, &channel).execute(&intent, &params).unwrap();

    assert_eq!(deployment.final_state(), InstanceState::JobDispatched);
    assert_eq!(deployment.command_id.as_ref().map(|c| c.as_str()), Some("cmd-1"));
    assert_eq!(deployment.instance.network_address.as_deref(), Some("10.0.0.5"));

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target.as_str(), "i-live");
    assert_eq!(sent[0].commands, vec![job_command(&params)]);
    assert!(compute.launches().is_empty());
}

#[test]
fn test_replay_sends_startup_script_body() {
    let compute = Arc::new(FakeCompute::new().with_instance("i-live", "running", None));
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::ReuseAndReplay {
        instance_id: InstanceId::new("i-live"),
    };

    let deployment = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap();

    assert_eq!(
        deployment.trace,
        vec![
            InstanceState::NoTarget,
            InstanceState::Resolving,
            InstanceState::Ready,
            InstanceState::BootstrapReplayed,
        ]
    );
    let commands = &channel.sent()[0].commands;
    assert!(commands.iter().any(|c| c == "cat > /tmp/rerun_userdata.sh << 'EOF'"));
    assert!(commands.iter().any(|c| c.contains("docker pull")));
}

#[test]
fn test_dispatch_failure_keeps_instance_state() {
    let compute = Arc::new(FakeCompute::new().with_instance("i-live", "running", None));
    let channel = Arc::new(RecordingCommandChannel::new());
    channel.fail_with(ChannelError::AgentNotRegistered(InstanceId::new("i-live")));
    let intent = Intent::ReuseAndDispatch {
        instance_id: InstanceId::new("i-live"),
    };

    let err = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::DispatchFailed {
            source: ChannelError::AgentNotRegistered(_),
            ..
        }
    ));
    assert_eq!(err.terminal_state(), Some(InstanceState::DispatchFailed));
}

#[test]
fn test_reuse_only_checks_state_without_commands() {
    let compute = Arc::new(FakeCompute::new().with_instance("i-live", "running", None));
    let channel = Arc::new(RecordingCommandChannel::new());
    let intent = Intent::ReuseOnly {
        instance_id: InstanceId::new("i-live"),
    };

    let deployment = orchestrator(&compute, &channel)
        .execute(&intent, &sample_parameters())
        .unwrap();

    assert_eq!(deployment.final_state(), InstanceState::Ready);
    assert!(deployment.command_id.is_none());
    assert!(channel.sent().is_empty());
}

#[test]
fn test_session_requires_automation_role() {
    let credentials = StaticCredentials::granting();
    let mut config = sample_config();

    let session = acquire_session(&credentials, &config).unwrap();
    assert!(session.name.starts_with("automation-session-"));
    assert_eq!(session.role_arn, "arn:aws:iam::123456789012:role/earbox-automation");

    config.iam.automation_role_arn = None;
    let err = acquire_session(&credentials, &config).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Config(ConfigError::Missing("iam.automation_role_arn"))
    ));
    assert!(err.is_configuration());
    assert_eq!(credentials.calls().len(), 1);
}

#[test]
fn test_refused_role_is_credentials_error() {
    let credentials = StaticCredentials::refusing("AccessDenied");
    let err = acquire_session(&credentials, &sample_config()).unwrap_err();
    assert!(matches!(err, OrchestratorError::Credentials(_)));
    assert!(err.to_string().contains("AccessDenied"));
}
