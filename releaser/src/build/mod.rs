//! Build stage: run the build tool, then find its artifact

pub mod locator;
pub mod runner;

use std::io::ErrorKind;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::deploy::events::Reporter;
use crate::errors::ReleaseError;
use crate::models::release::BuildResult;
use crate::models::request::DeployRequest;

use self::runner::{ProcessOutcome, ProcessRunner, Termination};

/// Run `<tool> build <arg> --release` and locate the artifact it produced
pub async fn run_build(
    runner: &ProcessRunner,
    request: &DeployRequest,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<BuildResult, ReleaseError> {
    let started = Instant::now();
    let args = request.build_args();

    reporter.line(format!("Running command: {} {}", request.build_tool, args.join(" ")));
    reporter.line(format!("In directory: {}", request.project_root.display()));
    reporter.line("---");

    let mut on_line = |line: &str| reporter.line(line);
    let outcome = runner
        .run(
            &request.build_tool,
            &args,
            &request.project_root,
            &mut on_line,
            cancel,
        )
        .await
        .inspect_err(|e| {
            if let ReleaseError::LaunchError { source, .. } = e {
                if source.kind() == ErrorKind::NotFound {
                    reporter.line(format!(
                        "Error: '{}' command not found. Make sure it is on your PATH.",
                        request.build_tool
                    ));
                }
            }
        })?;

    match outcome {
        ProcessOutcome::Cancelled(termination) => {
            reporter.line("...build stopped by request.");
            reporter.line(match termination {
                Termination::AlreadyExited => "Build process had already finished.",
                Termination::Graceful => "Build process terminated.",
                Termination::Forced => "Build process did not terminate gracefully, killed.",
            });
            return Err(ReleaseError::Cancelled);
        }
        ProcessOutcome::Exited(status) if !status.success() => {
            reporter.line("---");
            let err = ReleaseError::BuildFailed {
                code: status.code(),
            };
            reporter.line(format!("Build for {}: {}.", request.target, err));
            return Err(err);
        }
        ProcessOutcome::Exited(_) => {}
    }

    reporter.line("---");
    reporter.line(format!("Build for {} completed successfully.", request.target));
    reporter.line(format!(
        "Searching for artifact pattern: {}",
        request.project_root.join(&request.artifact_pattern).display()
    ));

    let located = locator::locate(&request.project_root, &request.artifact_pattern)?;
    if !located.alternatives.is_empty() {
        reporter.line(format!(
            "Warning: Found {} artifacts, using the first one: {}",
            located.alternatives.len() + 1,
            located.path.display()
        ));
        for other in &located.alternatives {
            reporter.line(format!("  ignored: {}", other.display()));
        }
    }
    reporter.line(format!("Found artifact: {}", located.path.display()));
    info!("Build finished in {:?}", started.elapsed());

    Ok(BuildResult {
        artifact: located.path,
        elapsed: started.elapsed(),
    })
}
