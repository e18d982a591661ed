//! External build process runner

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ReleaseError;

/// How a process run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own
    Exited(ExitStatus),
    /// Cancellation was requested and the process was stopped
    Cancelled(Termination),
}

/// How a cancelled process was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Already gone by the time cancellation was observed
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Killed after the grace period elapsed
    Forced,
}

/// Runs a command with merged stdout/stderr, one callback per line
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace_period: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
        }
    }
}

impl ProcessRunner {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Run `program` in `working_dir`.
    ///
    /// Output bytes that are not valid UTF-8 are replaced, never rejected.
    /// `cancel` is observed while waiting for output, before each line and
    /// after the process exits.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
        on_line: &mut (dyn FnMut(&str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, ReleaseError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so termination reaches the tool's children too
        #[cfg(unix)]
        command.process_group(0);

        debug!("Running command: {} {}", program, args.join(" "));
        let mut child = command.spawn().map_err(|e| ReleaseError::LaunchError {
            program: program.to_string(),
            source: e,
        })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let termination = self.terminate(&mut child).await;
                    return Ok(ProcessOutcome::Cancelled(termination));
                }
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if cancel.is_cancelled() {
                            let termination = self.terminate(&mut child).await;
                            return Ok(ProcessOutcome::Cancelled(termination));
                        }
                        on_line(&line);
                    }
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let termination = self.terminate(&mut child).await;
                return Ok(ProcessOutcome::Cancelled(termination));
            }
            status = child.wait() => status?,
        };

        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Cancelled(Termination::AlreadyExited));
        }

        debug!("Command exited with {}", status);
        Ok(ProcessOutcome::Exited(status))
    }

    /// SIGTERM, wait for the grace period, then SIGKILL
    async fn terminate(&self, child: &mut Child) -> Termination {
        if let Ok(Some(_)) = child.try_wait() {
            return Termination::AlreadyExited;
        }

        request_stop(child);
        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Build process stopped: {}", status);
                Termination::Graceful
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for build process: {}", e);
                force_stop(child).await;
                Termination::Forced
            }
            Err(_) => {
                warn!(
                    "Build process ignored SIGTERM for {:?}, killing",
                    self.grace_period
                );
                force_stop(child).await;
                Termination::Forced
            }
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
            }
        }
        None => debug!("Build process already reaped"),
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop build process: {}", e);
    }
}

async fn force_stop(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!("Failed to send SIGKILL to process group {}: {}", pid, e),
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill build process: {}", e);
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading build output: {}", e);
                break;
            }
        }
    }
}
