//! Integration tests for the coverage pipeline against a mock HTTP server.
//!
//! cmake/make/kcov are replaced by small shell commands: the archive carries
//! a fake `kcov` script that the install command copies into the staging
//! directory, and the test binary is a shell script.

use covpipe_core::{
    CoveragePipeline, ErrorKind, HttpFetcher, OutputMode, PipelineConfig, PipelineReport, Step,
    StepOutcome,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVE_PATH: &str = "/kcov/v38.tar.gz";
const UPLOADER_PATH: &str = "/bash";
const TEST_BINARY: &str = "target/debug/deps/carta_schema-0123abcd";

const FAKE_KCOV: &str = r#"#!/bin/sh
case "$*" in *--fail*) exit 4 ;; esac
for arg in "$@"; do out="$exe"; exe="$arg"; done
mkdir -p "$out"
"$exe" > "$out/run.log" || exit 3
echo '{"percent_covered": "100.00"}' > "$out/coverage.json"
"#;

const UPLOADER_SCRIPT: &str = "ls target/cov > upload-marker\n";

fn kcov_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data, mode) in [
        ("kcov-38/CMakeLists.txt", "project(kcov)\n", 0o644),
        ("kcov-38/fake-kcov", FAKE_KCOV, 0o755),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn write_test_binary(work_dir: &Path) -> PathBuf {
    let path = work_dir.join(TEST_BINARY);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "#!/bin/sh\necho 'test result: ok'\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

async fn mock_server(archive_status: u16, with_uploader: bool) -> MockServer {
    let server = MockServer::start().await;

    let archive = if archive_status == 200 {
        ResponseTemplate::new(200).set_body_bytes(kcov_archive())
    } else {
        ResponseTemplate::new(archive_status)
    };
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(archive)
        .mount(&server)
        .await;

    if with_uploader {
        Mock::given(method("GET"))
            .and(path(UPLOADER_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(UPLOADER_SCRIPT))
            .mount(&server)
            .await;
    }

    server
}

fn test_config(work_dir: &Path, server: &MockServer) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        archive_url: format!("{}{}", server.uri(), ARCHIVE_PATH),
        configure_command: sh("echo configured > configured.txt"),
        build_command: sh("test -f configured.txt"),
        install_command: vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"mkdir -p "$1/usr/local/bin" && cp ../fake-kcov "$1/usr/local/bin/kcov" && chmod +x "$1/usr/local/bin/kcov""#.to_string(),
            "install".to_string(),
            "{staging_dir}".to_string(),
        ],
        uploader_url: format!("{}{}", server.uri(), UPLOADER_PATH),
        uploader_shell: vec!["sh".to_string(), "-s".to_string(), "--".to_string()],
        output: OutputMode::Capture,
        ..Default::default()
    }
}

async fn run(config: PipelineConfig) -> PipelineReport {
    let fetcher = Arc::new(HttpFetcher::new().expect("http client"));
    CoveragePipeline::new(config, fetcher)
        .run()
        .await
        .expect("config should be valid")
}

async fn uploader_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == UPLOADER_PATH)
        .count()
}

/// Test: full run builds the tool, writes coverage and uploads it
#[tokio::test]
async fn test_full_run_produces_coverage_and_uploads() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    let exe = write_test_binary(work.path());

    let report = run(test_config(work.path(), &server)).await;

    assert!(report.success, "pipeline failed: {:?}", report.failure);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.passed_count(), 8);
    let steps: Vec<Step> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(steps, Step::ALL.to_vec());

    assert_eq!(report.executable.as_deref(), Some(exe.as_path()));
    let coverage_dir = report.coverage_dir.clone().expect("coverage dir");
    assert_eq!(coverage_dir, work.path().join("target/cov/carta_schema-0123abcd"));
    assert!(fs::read_dir(&coverage_dir).unwrap().next().is_some());
    let log = fs::read_to_string(coverage_dir.join("run.log")).unwrap();
    assert!(log.contains("test result: ok"));

    // Staging survives, source tree and archive do not.
    assert!(work.path().join("kcov-build/usr/local/bin/kcov").is_file());
    assert!(!work.path().join("kcov-38").exists());
    assert!(!work.path().join("kcov.tar.gz").exists());
    assert_eq!(report.archive_sha256.as_ref().map(String::len), Some(64));

    let marker = fs::read_to_string(work.path().join("upload-marker")).unwrap();
    assert!(marker.contains("carta_schema-0123abcd"));
    assert_eq!(uploader_requests(&server).await, 1);
}

/// Test: no matching executable stops the run before any upload
#[tokio::test]
async fn test_missing_executable_stops_before_upload() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;

    let report = run(test_config(work.path(), &server)).await;

    assert!(!report.success);
    assert_ne!(report.exit_code(), 0);
    assert_eq!(report.failed_step(), Some(Step::Discover));
    assert_eq!(report.failure.as_ref().unwrap().kind, ErrorKind::Discovery);
    assert!(!report.ran(Step::Instrument));
    assert!(!report.ran(Step::Upload));
    assert_eq!(uploader_requests(&server).await, 0);
    assert!(!work.path().join("upload-marker").exists());
}

/// Test: a failing compile aborts with its exit code and installs nothing
#[tokio::test]
async fn test_build_failure_leaves_no_install() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    write_test_binary(work.path());

    let mut config = test_config(work.path(), &server);
    config.build_command = sh("echo 'error: compilation failed' >&2; exit 2");
    let report = run(config).await;

    assert!(!report.success);
    assert_eq!(report.failed_step(), Some(Step::Build));
    assert_eq!(report.failure.as_ref().unwrap().kind, ErrorKind::Build);
    assert_eq!(report.exit_code(), 2);
    assert!(!report.ran(Step::Install));

    let staging = work.path().join("kcov-build");
    let staged_entries = fs::read_dir(&staging).map(|d| d.count()).unwrap_or(0);
    assert_eq!(staged_entries, 0);
    assert_eq!(uploader_requests(&server).await, 0);
}

/// Test: a build command killed by a signal exits with 128 + signal
#[cfg(unix)]
#[tokio::test]
async fn test_build_killed_by_signal_reports_shell_exit_code() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    write_test_binary(work.path());

    let mut config = test_config(work.path(), &server);
    config.build_command = sh("kill -9 $$");
    let report = run(config).await;

    assert_eq!(report.failed_step(), Some(Step::Build));
    assert_eq!(report.failure.as_ref().unwrap().exit_code, Some(137));
    assert_eq!(report.exit_code(), 137);
    assert_eq!(uploader_requests(&server).await, 0);
}

/// Test: an install that exits 0 without producing the tool fails the install step
#[tokio::test]
async fn test_install_without_tool_binary_fails() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    write_test_binary(work.path());

    let mut config = test_config(work.path(), &server);
    config.install_command = vec!["true".to_string()];
    let report = run(config).await;

    assert!(!report.success);
    assert_eq!(report.failed_step(), Some(Step::Install));
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Build);
    assert!(failure.message.contains("usr/local/bin/kcov"));
    assert_eq!(report.exit_code(), 1);
    assert!(!report.ran(Step::Clean));
    assert_eq!(uploader_requests(&server).await, 0);
}

/// Test: a failed archive download stops before any build command runs
#[tokio::test]
async fn test_fetch_failure_runs_no_build() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(500, true).await;
    write_test_binary(work.path());

    let report = run(test_config(work.path(), &server)).await;

    assert!(!report.success);
    assert_eq!(report.failed_step(), Some(Step::Fetch));
    assert_eq!(report.failure.as_ref().unwrap().kind, ErrorKind::Fetch);
    assert_eq!(report.steps.len(), 1);
    assert!(!work.path().join("kcov-38").exists());
    assert!(!work.path().join("kcov-build").exists());
}

/// Test: unreachable archive host is a fetch failure
#[tokio::test]
async fn test_unreachable_host_is_fetch_failure() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;

    let mut config = test_config(work.path(), &server);
    config.archive_url = "http://127.0.0.1:9/kcov.tar.gz".to_string();
    let report = run(config).await;

    assert_eq!(report.failed_step(), Some(Step::Fetch));
    assert_eq!(report.exit_code(), 1);
}

/// Test: checksum mismatch is a fetch failure
#[tokio::test]
async fn test_checksum_mismatch_is_fetch_failure() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;

    let mut config = test_config(work.path(), &server);
    config.archive_sha256 = Some("0".repeat(64));
    let report = run(config).await;

    assert_eq!(report.failed_step(), Some(Step::Fetch));
    assert!(report
        .failure
        .as_ref()
        .unwrap()
        .message
        .contains("checksum mismatch"));
    assert!(!work.path().join("kcov.tar.gz").exists());
}

/// Test: coverage tool failure propagates its exit code and skips upload
#[tokio::test]
async fn test_instrumentation_failure_propagates_exit_code() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    write_test_binary(work.path());

    let mut config = test_config(work.path(), &server);
    config.tool_args = vec!["--fail".to_string()];
    let report = run(config).await;

    assert_eq!(report.failed_step(), Some(Step::Instrument));
    assert_eq!(report.failure.as_ref().unwrap().kind, ErrorKind::Instrumentation);
    assert_eq!(report.exit_code(), 4);
    assert_eq!(uploader_requests(&server).await, 0);
}

/// Test: uploader script that cannot be fetched is an upload failure
#[tokio::test]
async fn test_uploader_unavailable_is_upload_failure() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, false).await;
    write_test_binary(work.path());

    let report = run(test_config(work.path(), &server)).await;

    assert_eq!(report.failed_step(), Some(Step::Upload));
    assert_eq!(report.failure.as_ref().unwrap().kind, ErrorKind::Upload);
    assert!(report.coverage_dir.is_some());
    assert!(!work.path().join("upload-marker").exists());
}

/// Test: skip_upload stops after instrumentation
#[tokio::test]
async fn test_skip_upload() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    write_test_binary(work.path());

    let mut config = test_config(work.path(), &server);
    config.skip_upload = true;
    let report = run(config).await;

    assert!(report.success);
    assert_eq!(report.steps.last().unwrap().outcome, StepOutcome::Skipped);
    assert_eq!(uploader_requests(&server).await, 0);
}

/// Test: a second run over the same staging directory succeeds
///
/// The source tree is gone after the first run, so unpacking starts clean;
/// the install command overwrites the staged tool in place.
#[tokio::test]
async fn test_second_run_reuses_staging() {
    let work = tempfile::tempdir().unwrap();
    let server = mock_server(200, true).await;
    write_test_binary(work.path());

    let first = run(test_config(work.path(), &server)).await;
    assert!(first.success, "first run failed: {:?}", first.failure);

    let second = run(test_config(work.path(), &server)).await;
    assert!(second.success, "second run failed: {:?}", second.failure);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.archive_sha256, second.archive_sha256);
    assert!(work.path().join("kcov-build/usr/local/bin/kcov").is_file());
    assert_eq!(uploader_requests(&server).await, 2);
}
