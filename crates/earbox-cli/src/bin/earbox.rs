//! `earbox` command-line entry point

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use earbox_cli::{FsStorage, ImageDecoder, TracingLogSink};
use earbox_core::api::Storage;
use earbox_core::config::{
    DeployConfig, JobConfig, JobParameters, DEFAULT_INPUT_PREFIX, DEFAULT_LOG_GROUP,
    DEFAULT_OUTPUT_KEY, DEFAULT_REGION,
};
use earbox_core::job::BatchJob;
use earbox_core::script::{job_command, startup_script};
use earbox_core::{AssetGrouper, GroupValidator, LogStream};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// the sink already writes every event; keep the stream's own mirror quiet
const DEFAULT_FILTER: &str = "info,earbox::mirror=off";

/// `run-job` argument ids and the variables that back them
const JOB_SETTINGS: [(&str, &str); 7] = [
    ("region", "AWS_REGION"),
    ("input-bucket", "INPUT_BUCKET"),
    ("output-bucket", "OUTPUT_BUCKET"),
    ("input-prefix", "INPUT_PREFIX"),
    ("output-key", "OUTPUT_KEY"),
    ("log-group", "LOG_GROUP"),
    ("log-stream", "LOG_STREAM"),
];

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Path to the deployment config JSON file")
}

fn override_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("input-bucket")
            .long("input-bucket")
            .help("Override the input bucket from config"),
    )
    .arg(
        Arg::new("output-bucket")
            .long("output-bucket")
            .help("Override the output bucket from config"),
    )
    .arg(
        Arg::new("input-prefix")
            .long("input-prefix")
            .help("Override the input prefix from config"),
    )
    .arg(
        Arg::new("log-stream")
            .long("log-stream")
            .help("Log stream name (generated when absent)"),
    )
    .arg(
        Arg::new("output-key")
            .long("output-key")
            .help("Result document key (generated when absent)"),
    )
}

fn run_job_command() -> Command {
    let help = |id: &str| match id {
        "region" => format!("Region recorded in the result document [default: {DEFAULT_REGION}]"),
        "input-bucket" => "Bucket holding the input images".to_string(),
        "output-bucket" => "Bucket receiving the result document".to_string(),
        "input-prefix" => format!(
            "Key prefix of the input images; empty skips ingest [default: {DEFAULT_INPUT_PREFIX}]"
        ),
        "output-key" => format!("Key of the result document [default: {DEFAULT_OUTPUT_KEY}]"),
        "log-group" => format!("Log group for the job's stream [default: {DEFAULT_LOG_GROUP}]"),
        _ => "Log stream name (generated when absent)".to_string(),
    };

    JOB_SETTINGS.iter().fold(
        Command::new("run-job")
            .about("Run the batch job against a local bucket directory")
            .arg(
                Arg::new("root")
                    .long("root")
                    .env("EARBOX_STORAGE_ROOT")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .help("Directory holding one subdirectory per bucket"),
            ),
        |cmd, (id, var)| cmd.arg(Arg::new(*id).long(*id).env(*var).help(help(*id))),
    )
}

/// Job settings from flags, falling back to their variables, then to defaults
fn job_config(args: &ArgMatches) -> Result<JobConfig> {
    let config = JobConfig::from_lookup(|name| {
        let (id, _) = JOB_SETTINGS.iter().find(|(_, var)| *var == name)?;
        args.get_one::<String>(id).cloned()
    })?;
    Ok(config)
}

fn run_job(args: &ArgMatches) -> Result<()> {
    let root = args.get_one::<PathBuf>("root").context("--root is required")?;
    let config = job_config(args)?;
    tracing::info!(
        root = %root.display(),
        log_group = %config.log_group,
        log_stream = %config.log_stream,
        "Starting local batch job"
    );

    let sink = Arc::new(TracingLogSink::new());
    let mut log = LogStream::open(sink, &config.log_group, &config.log_stream);
    let job = BatchJob::new(config, Arc::new(FsStorage::new(root)), Arc::new(ImageDecoder));
    let summary = job.run(&mut log);

    if !summary.result_written {
        bail!("result document was not written to {}", summary.output_location);
    }
    println!("{}", summary.output_location);
    Ok(())
}

fn cli() -> Command {
    Command::new("earbox")
        .version(earbox_core::VERSION)
        .about("Batch job orchestration for grouped image sessions")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            override_args(
                Command::new("script")
                    .about("Print the startup script a launched instance would run")
                    .arg(config_arg()),
            ),
        )
        .subcommand(
            override_args(
                Command::new("job-command")
                    .about("Print the command dispatched to a running instance")
                    .arg(config_arg()),
            ),
        )
        .subcommand(
            Command::new("check-groups")
                .about("Group and validate images in a local bucket directory")
                .arg(
                    Arg::new("root")
                        .long("root")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory holding one subdirectory per bucket"),
                )
                .arg(
                    Arg::new("bucket")
                        .long("bucket")
                        .required(true)
                        .help("Bucket to inspect"),
                )
                .arg(
                    Arg::new("prefix")
                        .long("prefix")
                        .default_value(DEFAULT_INPUT_PREFIX)
                        .help("Key prefix to list"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the valid groups as JSON"),
                ),
        )
        .subcommand(run_job_command())
}

/// Load the config named by `--config` and apply command-line overrides
fn job_parameters(args: &ArgMatches) -> Result<JobParameters> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let mut config = DeployConfig::from_json_file(path)
        .with_context(|| format!("loading {}", path.display()))?;

    if let Some(bucket) = args.get_one::<String>("input-bucket") {
        config = config.with_input_bucket(bucket);
    }
    if let Some(bucket) = args.get_one::<String>("output-bucket") {
        config = config.with_output_bucket(bucket);
    }
    if let Some(prefix) = args.get_one::<String>("input-prefix") {
        config = config.with_input_prefix(prefix);
    }

    let mut params = config.fresh_job_parameters()?;
    if let Some(stream) = args.get_one::<String>("log-stream") {
        params.log_stream = stream.clone();
    }
    if let Some(key) = args.get_one::<String>("output-key") {
        params.output_key = key.clone();
    }

    tracing::info!(
        log_group = %params.log_group,
        log_stream = %params.log_stream,
        "Resolved job parameters"
    );
    Ok(params)
}

fn check_groups(args: &ArgMatches) -> Result<bool> {
    let root = args.get_one::<PathBuf>("root").context("--root is required")?;
    let bucket = args.get_one::<String>("bucket").context("--bucket is required")?;
    let prefix = args
        .get_one::<String>("prefix")
        .map_or(DEFAULT_INPUT_PREFIX, String::as_str);

    let storage = FsStorage::new(root);
    let objects = storage
        .list_all(bucket, prefix)
        .with_context(|| format!("listing {bucket}/{prefix}"))?;
    let keys: Vec<_> = objects.into_iter().map(|o| o.key).collect();

    let sink = Arc::new(TracingLogSink::new());
    let mut log = LogStream::open(sink, "local", format!("check-{bucket}"));
    let grouping = AssetGrouper::new().group(&keys);
    let report = GroupValidator::new().validate(&grouping, &mut log);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report.valid)?);
    } else {
        for verdict in &report.verdicts {
            println!(
                "{:<40} V={} I={} {}",
                verdict.group_key,
                verdict.primary_count,
                verdict.secondary_count,
                if verdict.is_complete { "complete" } else { "incomplete" }
            );
        }
    }
    Ok(report.summary.has_valid_groups())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("script", args)) => {
            let params = job_parameters(args)?;
            print!("{}", startup_script(&params));
        }
        Some(("job-command", args)) => {
            let params = job_parameters(args)?;
            println!("{}", job_command(&params));
        }
        Some(("check-groups", args)) => {
            if !check_groups(args)? {
                std::process::exit(1);
            }
        }
        Some(("run-job", args)) => run_job(args)?,
        Some((other, _)) => bail!("unknown subcommand: {other}"),
        None => cli().print_help()?,
    }
    Ok(())
}
