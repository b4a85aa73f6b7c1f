use earbox_core::ingest::IngestResult;
use earbox_core::job::ResultDocument;
use earbox_core::types::GroupKey;
use image::{DynamicImage, ImageFormat};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const JOB_VARIABLES: [&str; 7] = [
    "AWS_REGION",
    "INPUT_BUCKET",
    "OUTPUT_BUCKET",
    "INPUT_PREFIX",
    "OUTPUT_KEY",
    "LOG_GROUP",
    "LOG_STREAM",
];

fn seed_bucket(root: &Path) {
    let input = root.join("input/in");
    fs::create_dir_all(&input).unwrap();
    fs::create_dir_all(root.join("output")).unwrap();
    fs::write(input.join("session_para"), "exposure=12\n").unwrap();
    fs::write(input.join("broken.jpg"), b"not a jpeg").unwrap();

    let frame = DynamicImage::new_rgb8(8, 6);
    for marker in ['V', 'I'] {
        for digit in 1..=6 {
            frame
                .save_with_format(input.join(format!("{marker}{digit}xM@s.jpg")), ImageFormat::Jpeg)
                .unwrap();
        }
    }
}

/// Run `earbox run-job` with only the given job variables set
fn run_job(root: &Path, vars: &[(&str, &str)]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_earbox"));
    command.arg("run-job").arg("--root").arg(root);
    for var in JOB_VARIABLES {
        command.env_remove(var);
    }
    command.env_remove("RUST_LOG").envs(vars.iter().copied());
    command.output().unwrap()
}

fn read_document(root: &Path, key: &str) -> ResultDocument {
    let body = fs::read(root.join("output").join(key)).unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[test]
fn test_run_job_writes_result_document() {
    let dir = tempfile::tempdir().unwrap();
    seed_bucket(dir.path());

    let output = run_job(
        dir.path(),
        &[
            ("INPUT_BUCKET", "input"),
            ("OUTPUT_BUCKET", "output"),
            ("INPUT_PREFIX", "in/"),
            ("LOG_STREAM", "local-run"),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "s3://output/test_output.json"
    );

    let document = read_document(dir.path(), "test_output.json");
    assert_eq!(document.control_file_content, "exposure=12\n");
    let group = &document.valid_groups[&GroupKey::new("xM@s.jpg")];
    assert_eq!(group.primary_count(), 6);
    assert_eq!(group.secondary_count(), 6);

    assert_eq!(document.processed_images.len(), 13);
    let decoded: Vec<_> = document
        .processed_images
        .iter()
        .filter_map(|result| match result {
            IngestResult::Success { width, height, channels, .. } => Some((*width, *height, *channels)),
            IngestResult::Error { .. } => None,
        })
        .collect();
    assert_eq!(decoded, vec![(8, 6, 3); 12]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Job completed successfully"));
    assert!(stderr.contains("local-run"));
}

#[test]
fn test_flags_override_variables() {
    let dir = tempfile::tempdir().unwrap();
    seed_bucket(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_earbox"))
        .args(["run-job", "--input-bucket", "input", "--output-key", "results/flagged.json"])
        .arg("--root")
        .arg(dir.path())
        .env("INPUT_BUCKET", "missing")
        .env("OUTPUT_BUCKET", "output")
        .env("INPUT_PREFIX", "in/")
        .env_remove("OUTPUT_KEY")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let document = read_document(dir.path(), "results/flagged.json");
    assert_eq!(document.valid_groups.len(), 1);
}

#[test]
fn test_empty_prefix_skips_ingest() {
    let dir = tempfile::tempdir().unwrap();
    seed_bucket(dir.path());

    let output = run_job(
        dir.path(),
        &[("INPUT_BUCKET", "input"), ("OUTPUT_BUCKET", "output"), ("INPUT_PREFIX", "")],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let document = read_document(dir.path(), "test_output.json");
    assert!(document.processed_images.is_empty());
    assert_eq!(document.valid_groups.len(), 1);
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("No prefix provided, skipping image processing"));
}

#[test]
fn test_missing_output_bucket_fails() {
    let dir = tempfile::tempdir().unwrap();
    seed_bucket(dir.path());

    let output = run_job(dir.path(), &[("INPUT_BUCKET", "input")]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OUTPUT_BUCKET"));
    assert!(!dir.path().join("output/test_output.json").exists());
}
