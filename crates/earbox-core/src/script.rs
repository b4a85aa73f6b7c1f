//! Bootstrap script and job command generation
//!
//! The bootstrap script installs the container runtime, optionally logs in to
//! the image registry, pulls the job image and runs it once. The same
//! `docker run` invocation is used for one-shot dispatch to a running
//! instance. Parameters go in twice, as `-e` variables and as `--` flags;
//! `earbox run-job` accepts either. Every value is shell-quoted.

use crate::config::JobParameters;
use std::borrow::Cow;

const SHEBANG: &str = "#!/bin/bash";
const REPLAY_SCRIPT_PATH: &str = "/tmp/rerun_userdata.sh";
const LINE_CONTINUATION: &str = " \\\n    ";

fn environment_pairs(params: &JobParameters) -> [(&'static str, &str); 7] {
    [
        ("AWS_REGION", params.region.as_str()),
        ("INPUT_BUCKET", params.input_bucket.as_str()),
        ("OUTPUT_BUCKET", params.output_bucket.as_str()),
        ("INPUT_PREFIX", params.input_prefix.as_str()),
        ("OUTPUT_KEY", params.output_key.as_str()),
        ("LOG_GROUP", params.log_group.as_str()),
        ("LOG_STREAM", params.log_stream.as_str()),
    ]
}

fn flag_pairs(params: &JobParameters) -> [(&'static str, &str); 6] {
    [
        ("--input-bucket", params.input_bucket.as_str()),
        ("--output-bucket", params.output_bucket.as_str()),
        ("--input-prefix", params.input_prefix.as_str()),
        ("--output-key", params.output_key.as_str()),
        ("--log-group", params.log_group.as_str()),
        ("--log-stream", params.log_stream.as_str()),
    ]
}

/// Quote `value` as one shell word; NUL bytes cannot be passed and are dropped
fn quote(value: &str) -> Cow<'_, str> {
    let value = if value.contains('\0') {
        Cow::Owned(value.replace('\0', ""))
    } else {
        Cow::Borrowed(value)
    };
    match shlex::try_quote(&value).map(Cow::into_owned) {
        Ok(quoted) => Cow::Owned(quoted),
        Err(_) => value,
    }
}

/// Registry host of an image reference, if it names one
fn registry_host(image: &str) -> Option<&str> {
    let (host, _) = image.split_once('/')?;
    (host.contains('.') || host.contains(':')).then_some(host)
}

/// The `docker run` command that executes one batch job
#[must_use]
pub fn job_command(params: &JobParameters) -> String {
    let mut parts = vec!["docker run --rm".to_string()];
    parts.extend(
        environment_pairs(params)
            .iter()
            .map(|(name, value)| format!("-e {name}={}", quote(value))),
    );
    parts.push(quote(&params.container_image).into_owned());
    parts.extend(
        flag_pairs(params)
            .iter()
            .map(|(flag, value)| format!("{flag} {}", quote(value))),
    );
    parts.join(LINE_CONTINUATION)
}

/// Startup script attached to a newly created instance
#[must_use]
pub fn startup_script(params: &JobParameters) -> String {
    let mut lines = vec![
        SHEBANG.to_string(),
        "set -euo pipefail".to_string(),
        "exec > >(tee -a /var/log/earbox-bootstrap.log) 2>&1".to_string(),
        String::new(),
        "echo \"=== earbox bootstrap started at $(date) ===\"".to_string(),
        "if ! command -v docker >/dev/null 2>&1; then".to_string(),
        "  if command -v dnf >/dev/null 2>&1; then dnf install -y docker; else yum install -y docker; fi"
            .to_string(),
        "fi".to_string(),
        "systemctl enable --now docker".to_string(),
        String::new(),
    ];

    if params.registry_auth {
        if let Some(host) = registry_host(&params.container_image) {
            lines.push(format!(
                "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {}",
                quote(&params.region),
                quote(host)
            ));
        }
    }

    lines.push(format!("docker pull {}", quote(&params.container_image)));
    lines.push(job_command(params));
    lines.push(String::new());
    lines.push("echo \"=== earbox bootstrap finished at $(date) ===\"".to_string());

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Remove a leading `#!` line
#[must_use]
pub fn strip_shebang(script: &str) -> &str {
    if script.starts_with("#!") {
        script.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        script
    }
}

/// Command lines that re-run the startup script on a running instance
///
/// The script is written to a temporary file through a quoted heredoc, run,
/// then removed. The heredoc delimiter never matches a line of the script.
#[must_use]
pub fn replay_commands(params: &JobParameters) -> Vec<String> {
    let script = startup_script(params);
    let body = strip_shebang(&script).trim_end_matches('\n');
    let mut delimiter = String::from("EOF");
    while body.lines().any(|line| line == delimiter) {
        delimiter.push('_');
    }
    vec![
        SHEBANG.to_string(),
        "set -e".to_string(),
        "echo \"=== Re-running user data script ===\"".to_string(),
        "echo \"Timestamp: $(date)\"".to_string(),
        String::new(),
        format!("cat > {REPLAY_SCRIPT_PATH} << '{delimiter}'"),
        body.to_string(),
        delimiter,
        String::new(),
        format!("chmod +x {REPLAY_SCRIPT_PATH}"),
        "echo \"=== Executing user data script ===\"".to_string(),
        REPLAY_SCRIPT_PATH.to_string(),
        String::new(),
        format!("rm -f {REPLAY_SCRIPT_PATH}"),
        "echo \"=== User data script completed ===\"".to_string(),
    ]
}
