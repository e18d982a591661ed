//! End-to-end pipeline tests with a shell build script, a directory
//! standing in for the SFTP server and the in-memory store

#![cfg(unix)]

mod common;

use std::fs;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use releaser::deploy::{DeployEvent, PipelineStage, Reporter, RunManager};
use releaser::models::request::TargetPlatform;

use common::{project, request, Harness, BUILD_OK};

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<DeployEvent>) -> Vec<DeployEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn output(events: &[DeployEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            DeployEvent::Output(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

fn stages(events: &[DeployEvent]) -> Vec<PipelineStage> {
    events
        .iter()
        .filter_map(|event| match event {
            DeployEvent::StageChanged(stage) => Some(*stage),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_successful_run_records_release() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();
    let (reporter, mut rx) = Reporter::channel();

    let outcome = harness
        .orchestrator
        .run(
            &request(dir.path(), "1.2.3", 7),
            &reporter,
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome.success(), "{}", outcome.message);
    assert_eq!(outcome.message, "Successfully deployed v1.2.3 for android-apk!");

    let uploaded = harness.uploader.local_path("/srv/updates/android-1.2.3-7.apk");
    assert_eq!(fs::read(uploaded).unwrap(), b"apk-bytes");

    let rows = harness.store.inner.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.platform, "android");
    assert_eq!(rows[0].record.version_code, 7);
    assert_eq!(rows[0].record.package_path, "/srv/updates/android-1.2.3-7.apk");
    assert_eq!(rows[0].record.build_platform, "Linux");
    assert!(rows[0].is_active);

    let events = drain(&mut rx);
    assert_eq!(
        stages(&events),
        vec![
            PipelineStage::Building,
            PipelineStage::Uploading,
            PipelineStage::RecordingMetadata,
            PipelineStage::Succeeded,
        ]
    );
    assert!(matches!(events.last(), Some(DeployEvent::Finished(o)) if o.success()));

    let lines = output(&events);
    assert!(lines.contains(&"Running command: sh build apk --release".to_string()));
    assert!(lines.contains(&"building apk --release".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("Found artifact: ")));
    assert!(lines.iter().any(|l| l.starts_with("Upload complete (")));
    assert!(lines.contains(
        &"Deactivated 0 older active version(s) for platform 'android'.".to_string()
    ));
    assert_eq!(reporter.status().stage, PipelineStage::Succeeded);
}

#[tokio::test]
async fn test_build_failure_stops_before_upload() {
    let dir = project("echo 'compile error' >&2\nexit 3\n");
    let harness = Harness::new();
    let (reporter, mut rx) = Reporter::channel();

    let outcome = harness
        .orchestrator
        .run(
            &request(dir.path(), "1.0.0", 1),
            &reporter,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.stage, PipelineStage::Failed);
    assert_eq!(outcome.error_code, Some("build_failed"));
    assert!(outcome.message.contains("exit code 3"));
    assert_eq!(harness.uploader.calls(), 0);
    assert_eq!(harness.store.calls(), 0);

    let events = drain(&mut rx);
    assert!(output(&events).contains(&"compile error".to_string()));
    assert_eq!(
        stages(&events),
        vec![PipelineStage::Building, PipelineStage::Failed]
    );
}

#[tokio::test]
async fn test_missing_artifact_never_uploads() {
    let dir = project("echo 'built nothing'\n");
    let harness = Harness::new();
    let (reporter, _rx) = Reporter::channel();

    let outcome = harness
        .orchestrator
        .run(
            &request(dir.path(), "1.0.0", 1),
            &reporter,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.stage, PipelineStage::Failed);
    assert_eq!(outcome.error_code, Some("artifact_missing"));
    assert_eq!(harness.uploader.calls(), 0);
    assert_eq!(harness.store.calls(), 0);
}

#[tokio::test]
async fn test_missing_build_tool_is_launch_error() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();
    let (reporter, mut rx) = Reporter::channel();
    let mut req = request(dir.path(), "1.0.0", 1);
    req.build_tool = "releaser-no-such-build-tool".to_string();

    let outcome = harness
        .orchestrator
        .run(&req, &reporter, &CancellationToken::new())
        .await;

    assert_eq!(outcome.error_code, Some("launch"));
    assert!(output(&drain(&mut rx))
        .iter()
        .any(|l| l.contains("command not found")));
}

#[tokio::test]
async fn test_directory_artifact_is_rejected() {
    // `build` is taken by the fixture script, so the site goes to `out/web`
    let dir = project("mkdir -p out/web\necho '<html/>' > out/web/index.html\n");
    let harness = Harness::new();
    let (reporter, mut rx) = Reporter::channel();
    let mut req = request(dir.path(), "2.0.0", 20);
    req.target = TargetPlatform::Web;
    req.artifact_pattern = "out/web".to_string();
    req.needs_archive = TargetPlatform::Web.needs_archive();

    let outcome = harness
        .orchestrator
        .run(&req, &reporter, &CancellationToken::new())
        .await;

    assert_eq!(outcome.stage, PipelineStage::Failed);
    assert_eq!(outcome.error_code, Some("unsupported_directory_upload"));
    assert!(outcome.message.starts_with("Upload failed: "), "{}", outcome.message);
    assert_eq!(harness.uploader.calls(), 1);
    assert_eq!(harness.store.calls(), 0);

    let events = drain(&mut rx);
    assert_eq!(
        stages(&events),
        vec![
            PipelineStage::Building,
            PipelineStage::Uploading,
            PipelineStage::Failed
        ]
    );
    let lines = output(&events);
    assert!(lines.iter().any(|l| l.starts_with("Found artifact: ") && l.ends_with("web")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("Warning: ") && l.contains("archiving")));
}

#[tokio::test]
async fn test_invalid_request_fails_before_build() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();

    for (name, code) in [("", 1), ("1.0.0", 0)] {
        let (reporter, mut rx) = Reporter::channel();
        let outcome = harness
            .orchestrator
            .run(
                &request(dir.path(), name, code),
                &reporter,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.stage, PipelineStage::Failed);
        assert_eq!(outcome.error_code, Some("config"));
        assert!(outcome.message.starts_with("Validation failed: "), "{}", outcome.message);

        let events = drain(&mut rx);
        assert_eq!(stages(&events), vec![PipelineStage::Failed]);
        assert!(matches!(events.last(), Some(DeployEvent::Finished(_))));
    }

    assert!(!dir.path().join("out").exists());
    assert_eq!(harness.uploader.calls(), 0);
    assert_eq!(harness.store.calls(), 0);
}

#[tokio::test]
async fn test_start_run_rejects_invalid_request() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();
    let manager = RunManager::new();

    let err = assert_err!(manager.start_run(
        request(dir.path(), "", 1),
        harness.orchestrator.clone()
    ));
    assert_eq!(err.code(), "config");
    assert!(!manager.is_running());

    // The slot was never taken
    let handle = assert_ok!(manager.start_run(
        request(dir.path(), "1.0.0", 1),
        harness.orchestrator.clone()
    ));
    assert!(handle.wait().await.unwrap().success());
    assert_eq!(harness.uploader.calls(), 1);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();
    let (reporter, _rx) = Reporter::channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness
        .orchestrator
        .run(&request(dir.path(), "1.0.0", 1), &reporter, &cancel)
        .await;

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.message, "Operation cancelled.");
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_cancel_during_build_stops_process() {
    let dir = project("echo $$ > build.pid\necho started\nsleep 30\n");
    let harness = Harness::new();
    let manager = RunManager::new();

    let mut handle = assert_ok!(manager.start_run(
        request(dir.path(), "1.0.0", 1),
        harness.orchestrator.clone()
    ));
    assert!(manager.is_running());

    // Only one run at a time
    let busy = assert_err!(manager.start_run(
        request(dir.path(), "1.0.0", 2),
        harness.orchestrator.clone()
    ));
    assert_eq!(busy.code(), "busy");

    loop {
        match handle.next_event().await {
            Some(DeployEvent::Output(line)) if line == "started" => break,
            Some(_) => continue,
            None => panic!("run ended before the build started"),
        }
    }
    handle.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("run did not stop")
        .unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(outcome.message, "Build cancelled.");
    assert_eq!(outcome.error_code, Some("cancelled"));
    assert_eq!(harness.uploader.calls(), 0);
    assert!(!manager.is_running());

    let pid: i32 = fs::read_to_string(dir.path().join("build.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None);
    assert!(alive.is_err(), "build process {} survived cancellation", pid);
}

#[tokio::test]
async fn test_events_end_with_finished() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();
    let manager = RunManager::new();

    let mut handle = manager
        .start_run(request(dir.path(), "1.0.0", 1), harness.orchestrator.clone())
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    assert!(matches!(events.last(), Some(DeployEvent::Finished(o)) if o.success()));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, DeployEvent::Finished(_)))
            .count(),
        1
    );

    // Cancelling a finished run changes nothing
    handle.cancel();
    let outcome = handle.wait().await.unwrap();
    assert!(outcome.success());
    assert_eq!(harness.store.inner.rows().await.len(), 1);

    // The slot is free again
    let again = assert_ok!(manager.start_run(
        request(dir.path(), "1.0.0", 1),
        harness.orchestrator.clone()
    ));
    assert!(again.wait().await.unwrap().success());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();

    for notes in ["first", "second"] {
        let (reporter, _rx) = Reporter::channel();
        let mut req = request(dir.path(), "1.2.3", 7);
        req.release_notes = notes.to_string();
        let outcome = harness
            .orchestrator
            .run(&req, &reporter, &CancellationToken::new())
            .await;
        assert!(outcome.success(), "{}", outcome.message);
    }

    let rows = harness.store.inner.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.release_notes, "second");
    assert!(rows[0].is_active);
}

#[tokio::test]
async fn test_new_version_deactivates_previous() {
    let dir = project(BUILD_OK);
    let harness = Harness::new();

    for (name, code) in [("1.0.0", 1), ("1.1.0", 2)] {
        let (reporter, _rx) = Reporter::channel();
        let outcome = harness
            .orchestrator
            .run(
                &request(dir.path(), name, code),
                &reporter,
                &CancellationToken::new(),
            )
            .await;
        assert!(outcome.success(), "{}", outcome.message);
    }

    let active = harness.store.inner.active("android").await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].record.version_name, "1.1.0");
    assert_eq!(harness.store.inner.rows().await.len(), 2);
}
