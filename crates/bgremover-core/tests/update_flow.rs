//! Release lookup and installer tests against a mock release server.

use std::path::Path;
use std::time::Duration;

use bgremover_core::{
    AppUpdate, AutoUpdateError, InstallOptions, ReleaseAsset, ReleaseSource, STALE_UPDATE_AGE,
    UpdateCheck, UpdateError, UpdateProgress, check_for_update, cleanup_stale_update_dirs,
    prepare_update,
};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPOSITORY: &str = "owner/app";
const LATEST_PATH: &str = "/repos/owner/app/releases/latest";

fn source(server: &MockServer) -> ReleaseSource {
    ReleaseSource::new(REPOSITORY).with_api_base(server.uri())
}

fn install_options(root: &Path, suffix: &str) -> InstallOptions {
    let install_dir = root.join("install");
    std::fs::create_dir_all(&install_dir).expect("install dir should be created");
    let target = install_dir.join("App.exe");
    std::fs::write(&target, b"old binary").expect("old binary should be written");

    InstallOptions {
        scratch_root: root.join("cache"),
        target,
        asset_suffix: suffix.to_string(),
        download_timeout: Duration::from_secs(10),
        handoff_delay: Duration::ZERO,
        failure_log: root.join("update-failed.log"),
    }
}

fn update_with_assets(server: &MockServer, assets: &[(&str, u64, Option<String>)]) -> AppUpdate {
    AppUpdate {
        current_version: "1.0.0".to_string(),
        latest_version: "1.2.0".to_string(),
        release_url: Some("https://example.com/releases/v1.2.0".to_string()),
        release_notes: None,
        assets: assets
            .iter()
            .map(|(name, size, digest)| ReleaseAsset {
                name: (*name).to_string(),
                browser_download_url: format!("{}/download/{name}", server.uri()),
                size: *size,
                digest: digest.clone(),
            })
            .collect(),
    }
}

fn scratch_entries(root: &Path) -> usize {
    std::fs::read_dir(root.join("cache")).map_or(0, Iterator::count)
}

async fn mount_release(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn check_reports_newer_release_with_expected_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("user-agent", "bgremover/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": "v1.2.0",
            "html_url": "https://example.com/releases/v1.2.0",
            "body": "Faster processing",
            "assets": [
                { "name": "App.exe", "browser_download_url": "https://example.com/App.exe", "size": 3 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let result = check_for_update(&client, &source(&server), "v1.0.0")
        .await
        .expect("check should succeed");

    let UpdateCheck::Available(update) = result else {
        panic!("expected an available update, got {result:?}");
    };
    assert_eq!(update.current_version, "1.0.0");
    assert_eq!(update.latest_version, "1.2.0");
    assert_eq!(update.release_notes.as_deref(), Some("Faster processing"));
    assert_eq!(update.assets.len(), 1);
}

#[tokio::test]
async fn check_reports_up_to_date_for_same_or_older_release() {
    let server = MockServer::start().await;
    mount_release(&server, json!({ "tag_name": "v1.0.0", "assets": [] })).await;

    let client = reqwest::Client::new();
    let result = check_for_update(&client, &source(&server), "1.0.0")
        .await
        .expect("check should succeed");

    assert!(matches!(
        result,
        UpdateCheck::UpToDate { ref current, ref latest } if current == "1.0.0" && latest == "1.0.0"
    ));
}

#[tokio::test]
async fn check_treats_non_success_status_as_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let error = check_for_update(&client, &source(&server), "1.0.0")
        .await
        .expect_err("404 should not produce an update");

    assert!(matches!(
        error,
        UpdateError::HttpStatus { status, ref body_snippet }
            if status == reqwest::StatusCode::NOT_FOUND && body_snippet == ": Not Found"
    ));
    assert!(!error.is_network());
}

#[tokio::test]
async fn check_reports_transport_failure_as_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("port should be free");
    let address = listener.local_addr().expect("listener should have an address");
    drop(listener);
    let source = ReleaseSource::new(REPOSITORY).with_api_base(format!("http://{address}"));

    let client = reqwest::Client::new();
    let error = check_for_update(&client, &source, "1.0.0")
        .await
        .expect_err("unreachable server should fail");

    assert!(matches!(error, UpdateError::Request(_)));
    assert!(error.is_network());
}

#[tokio::test]
async fn check_rejects_release_without_version_tag() {
    let server = MockServer::start().await;
    mount_release(&server, json!({ "tag_name": "v", "assets": [] })).await;

    let client = reqwest::Client::new();
    let error = check_for_update(&client, &source(&server), "1.0.0")
        .await
        .expect_err("empty tag should not be compared");

    assert!(matches!(error, UpdateError::MissingVersion));
}

#[tokio::test]
async fn check_reports_malformed_body_as_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LATEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let error = check_for_update(&client, &source(&server), "1.0.0")
        .await
        .expect_err("html body should not parse");

    assert!(matches!(error, UpdateError::Parse(_)));
    assert!(!error.is_network());
}

#[tokio::test]
async fn prepare_without_installable_asset_touches_nothing() {
    let server = MockServer::start().await;
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let options = install_options(temp.path(), ".exe");
    let update = update_with_assets(&server, &[("source.zip", 10, None), ("notes.md", 1, None)]);
    let (tx, _rx) = mpsc::channel(8);

    let result = prepare_update(&reqwest::Client::new(), &update, &options, &tx).await;

    assert!(matches!(
        result,
        Err(AutoUpdateError::NoInstallableAsset { ref suffix }) if suffix == ".exe"
    ));
    assert_eq!(
        std::fs::read(&options.target).expect("target should still exist"),
        b"old binary"
    );
    assert_eq!(scratch_entries(temp.path()), 0);
}

#[tokio::test]
async fn prepare_aborts_on_download_failure_and_cleans_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/App.exe"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let options = install_options(temp.path(), ".exe");
    let update = update_with_assets(&server, &[("App.exe", 3, None)]);
    let (tx, _rx) = mpsc::channel(8);

    let error = prepare_update(&reqwest::Client::new(), &update, &options, &tx)
        .await
        .expect_err("server error should abort the update");

    assert!(error.is_network());
    assert_eq!(
        std::fs::read(&options.target).expect("target should still exist"),
        b"old binary"
    );
    assert_eq!(scratch_entries(temp.path()), 0);
}

#[tokio::test]
async fn prepare_times_out_stalled_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/App.exe"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"new".to_vec())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let mut options = install_options(temp.path(), ".exe");
    options.download_timeout = Duration::from_millis(200);
    let update = update_with_assets(&server, &[("App.exe", 3, None)]);
    let (tx, _rx) = mpsc::channel(8);

    let error = prepare_update(&reqwest::Client::new(), &update, &options, &tx)
        .await
        .expect_err("stalled download should time out");

    assert!(matches!(error, AutoUpdateError::Timeout { .. }));
    assert!(error.is_network());
    assert_eq!(scratch_entries(temp.path()), 0);
}

#[tokio::test]
async fn prepare_rejects_checksum_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/App.exe"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let options = install_options(temp.path(), ".exe");
    let digest = format!("sha256:{}", "0".repeat(64));
    let update = update_with_assets(&server, &[("App.exe", 8, Some(digest))]);
    let (tx, _rx) = mpsc::channel(8);

    let error = prepare_update(&reqwest::Client::new(), &update, &options, &tx)
        .await
        .expect_err("checksum mismatch should abort");

    assert!(matches!(error, AutoUpdateError::Invalid(ref message) if message.contains("Checksum mismatch")));
    assert_eq!(scratch_entries(temp.path()), 0);
}

#[tokio::test]
async fn prepare_rejects_truncated_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/App.exe"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"half".to_vec()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let options = install_options(temp.path(), ".exe");
    let update = update_with_assets(&server, &[("App.exe", 1024, None)]);
    let (tx, _rx) = mpsc::channel(8);

    let error = prepare_update(&reqwest::Client::new(), &update, &options, &tx)
        .await
        .expect_err("short download should abort");

    assert!(matches!(
        error,
        AutoUpdateError::Invalid(ref message) if message.contains("Downloaded 4 bytes") && message.contains("1024 bytes")
    ));
    assert!(!error.is_network());
    assert_eq!(
        std::fs::read(&options.target).expect("target should still exist"),
        b"old binary"
    );
    assert_eq!(scratch_entries(temp.path()), 0);
}

#[tokio::test]
async fn end_to_end_check_download_and_helper_script() {
    let server = MockServer::start().await;
    mount_release(
        &server,
        json!({
            "tag_name": "v1.2.0",
            "html_url": "https://example.com/releases/v1.2.0",
            "assets": [
                { "name": "App.exe", "browser_download_url": format!("{}/download/App.exe", server.uri()), "size": 11 }
            ]
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/download/App.exe"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new binary!".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let check = check_for_update(&client, &source(&server), "1.0.0")
        .await
        .expect("check should succeed");
    let UpdateCheck::Available(update) = check else {
        panic!("expected an available update, got {check:?}");
    };
    assert_eq!(update.latest_version, "1.2.0");

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let options = install_options(temp.path(), ".exe");
    let (tx, mut rx) = mpsc::channel(64);

    let prepared = prepare_update(&client, &update, &options, &tx)
        .await
        .expect("download should succeed");
    drop(tx);

    assert_eq!(prepared.version, "1.2.0");
    assert_eq!(prepared.asset.name, "App.exe");
    assert_eq!(
        std::fs::read(&prepared.downloaded).expect("download should exist"),
        b"new binary!"
    );
    assert!(prepared.downloaded.starts_with(prepared.scratch_dir()));

    let script = std::fs::read_to_string(&prepared.script).expect("helper should be written");
    let target = options.target.to_string_lossy().replace('%', "%%");
    let downloaded = prepared.downloaded.to_string_lossy().replace('%', "%%");
    assert!(script.contains(target.as_str()));
    assert!(script.contains(downloaded.as_str()));

    let mut saw_download_progress = false;
    while let Some(progress) = rx.recv().await {
        if let UpdateProgress::Downloading { downloaded, .. } = progress {
            saw_download_progress = true;
            assert!(downloaded <= 11);
        }
    }
    assert!(saw_download_progress);

    assert_eq!(
        std::fs::read(&options.target).expect("target should be untouched before handoff"),
        b"old binary"
    );

    let scratch = prepared.scratch_dir().to_path_buf();
    drop(prepared);
    assert!(!scratch.exists(), "dropping a prepared update should clean up");
}

#[cfg(unix)]
#[tokio::test]
async fn hand_off_replaces_target_and_launches_it() {
    use std::time::Instant;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let marker = temp.path().join("relaunched");
    let replacement = format!("#!/bin/sh\necho relaunched > '{}'\n", marker.display());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/app-linux"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(replacement.clone().into_bytes()))
        .mount(&server)
        .await;

    let options = install_options(temp.path(), "-linux");
    let update = update_with_assets(&server, &[("app-linux", replacement.len() as u64, None)]);
    let (tx, _rx) = mpsc::channel(64);

    let ticket =
        bgremover_core::download_and_install(&reqwest::Client::new(), &update, &options, tx)
            .await
            .expect("handoff should succeed");

    assert_eq!(ticket.version, "1.2.0");
    assert!(ticket.helper_pid > 0);

    let deadline = Instant::now() + Duration::from_secs(10);
    while !(marker.exists() && !ticket.scratch_dir.exists()) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(marker.exists(), "new executable should have been launched");
    assert!(!ticket.scratch_dir.exists(), "helper should remove the scratch dir");
    assert_eq!(
        std::fs::read_to_string(&options.target).expect("target should be replaced"),
        replacement
    );
}

#[cfg(unix)]
#[tokio::test]
async fn relaunch_during_handoff_delay_keeps_pending_download() {
    use std::time::Instant;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let marker = temp.path().join("relaunched");
    let replacement = format!("#!/bin/sh\necho relaunched > '{}'\n", marker.display());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/app-linux"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(replacement.clone().into_bytes()))
        .mount(&server)
        .await;

    let options = install_options(temp.path(), "-linux").with_handoff_delay(Duration::from_secs(1));
    let update = update_with_assets(&server, &[("app-linux", replacement.len() as u64, None)]);
    let (tx, _rx) = mpsc::channel(64);

    let ticket =
        bgremover_core::download_and_install(&reqwest::Client::new(), &update, &options, tx)
            .await
            .expect("handoff should succeed");

    // A second launch starting while the helper still sleeps.
    let removed = cleanup_stale_update_dirs(
        &options.scratch_root,
        STALE_UPDATE_AGE + options.handoff_delay,
    );
    assert_eq!(removed, 0);
    assert!(ticket.scratch_dir.exists());

    let deadline = Instant::now() + Duration::from_secs(10);
    while !(marker.exists() && !ticket.scratch_dir.exists()) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(marker.exists(), "new executable should have been launched");
    assert_eq!(
        std::fs::read_to_string(&options.target).expect("target should be replaced"),
        replacement
    );
    assert!(!options.failure_log.exists());
}
