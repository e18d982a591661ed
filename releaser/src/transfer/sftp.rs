//! Blocking SFTP session on top of libssh2

use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};
use tracing::{debug, warn};

use crate::errors::ReleaseError;
use crate::models::request::{HostKeyPolicy, SftpParams, TransferAuth};
use crate::transfer::keys;

/// Size of each write during an upload
pub const CHUNK_SIZE: usize = 32 * 1024;

// LIBSSH2_FX_NO_SUCH_FILE
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Result of [`SftpSession::ensure_remote_dir`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDirState {
    Existing,
    Created,
}

/// An authenticated session with the SFTP subsystem open.
///
/// Owned by a single run. Dropping it disconnects.
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
    host: String,
}

impl SftpSession {
    /// Connect, verify the host key per policy and authenticate
    pub fn connect(params: &SftpParams) -> Result<Self, ReleaseError> {
        let endpoint = format!("{}:{}", params.host, params.port);
        let addr = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(|e| ReleaseError::ConnError(format!("cannot resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| ReleaseError::ConnError(format!("no address for {}", endpoint)))?;

        debug!("Connecting to {} ({})", endpoint, addr);
        let tcp = TcpStream::connect_timeout(&addr, params.timeout)
            .map_err(|e| ReleaseError::ConnError(format!("{}: {}", endpoint, e)))?;

        let mut session = Session::new().map_err(|e| ReleaseError::ConnError(e.to_string()))?;
        session.set_timeout(u32::try_from(params.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ReleaseError::ConnError(format!("SSH handshake with {} failed: {}", endpoint, e)))?;

        verify_host_key(&session, params)?;
        authenticate(&session, params)?;

        let sftp = session
            .sftp()
            .map_err(|e| ReleaseError::ConnError(format!("cannot open SFTP subsystem: {}", e)))?;

        Ok(Self {
            session,
            sftp,
            host: endpoint,
        })
    }

    /// Make sure `dir` exists, creating a single missing level
    pub fn ensure_remote_dir(&self, dir: &str) -> Result<RemoteDirState, ReleaseError> {
        let dir = if dir.is_empty() { "/" } else { dir };
        let path = Path::new(dir);

        match self.sftp.stat(path) {
            Ok(stat) if stat.is_dir() => Ok(RemoteDirState::Existing),
            Ok(_) => Err(ReleaseError::CreateFailed {
                dir: dir.to_string(),
                reason: "path exists and is not a directory".to_string(),
            }),
            Err(e) if matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => {
                self.sftp
                    .mkdir(path, 0o755)
                    .map_err(|e| ReleaseError::CreateFailed {
                        dir: dir.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(RemoteDirState::Created)
            }
            Err(e) => Err(ReleaseError::TransferError(format!(
                "cannot stat {}: {}",
                dir, e
            ))),
        }
    }

    /// Stream `local` to `remote`.
    ///
    /// `on_progress(sent, total)` runs after every chunk; returning
    /// `Break` aborts the transfer and removes the partial remote file.
    pub fn upload<F>(&self, local: &Path, remote: &str, mut on_progress: F) -> Result<u64, ReleaseError>
    where
        F: FnMut(u64, u64) -> ControlFlow<()>,
    {
        if local.is_dir() {
            return Err(ReleaseError::UnsupportedDirectoryUpload(local.to_path_buf()));
        }

        let mut source = File::open(local)?;
        let total = source.metadata()?.len();
        let remote_path = Path::new(remote);
        let mut sink = self
            .sftp
            .create(remote_path)
            .map_err(|e| ReleaseError::TransferError(format!("cannot create {}: {}", remote, e)))?;

        let sent = match copy_chunks(&mut source, &mut sink, total, &mut on_progress) {
            Ok(sent) => sent,
            Err(e) => {
                drop(sink);
                if matches!(e, ReleaseError::Cancelled) {
                    self.remove_partial(remote_path);
                }
                return Err(e);
            }
        };

        debug!("Uploaded {} bytes to {}:{}", sent, self.host, remote);
        Ok(sent)
    }

    /// List the login directory
    pub fn list_home(&self) -> Result<Vec<PathBuf>, ReleaseError> {
        let entries = self
            .sftp
            .readdir(Path::new("."))
            .map_err(|e| ReleaseError::TransferError(format!("cannot list home directory: {}", e)))?;
        Ok(entries.into_iter().map(|(path, _)| path).collect())
    }

    fn remove_partial(&self, remote: &Path) {
        match self.sftp.unlink(remote) {
            Ok(()) => debug!("Removed partial upload {}", remote.display()),
            Err(e) => warn!("Could not remove partial upload {}: {}", remote.display(), e),
        }
    }
}

/// Copy `source` to `sink` in [`CHUNK_SIZE`] pieces.
///
/// `on_progress(sent, total)` runs after each chunk is written; `Break`
/// stops the copy with [`ReleaseError::Cancelled`].
pub fn copy_chunks<R, W, F>(
    source: &mut R,
    sink: &mut W,
    total: u64,
    on_progress: &mut F,
) -> Result<u64, ReleaseError>
where
    R: Read,
    W: Write,
    F: FnMut(u64, u64) -> ControlFlow<()>,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let read = source.read(&mut buf)?;
        if read == 0 {
            break;
        }
        sink.write_all(&buf[..read])
            .map_err(|e| ReleaseError::TransferError(format!("write failed after {} bytes: {}", sent, e)))?;
        sent += read as u64;

        if on_progress(sent, total).is_break() {
            return Err(ReleaseError::Cancelled);
        }
    }
    sink.flush()
        .map_err(|e| ReleaseError::TransferError(format!("flush failed: {}", e)))?;
    Ok(sent)
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "releaser done", None) {
            debug!("Disconnect from {} failed: {}", self.host, e);
        }
    }
}

fn verify_host_key(session: &Session, params: &SftpParams) -> Result<(), ReleaseError> {
    match params.host_key_policy {
        HostKeyPolicy::AcceptAny => {
            warn!(
                "Accepting host key of {}:{} without verification",
                params.host, params.port
            );
            Ok(())
        }
        HostKeyPolicy::KnownHosts => {
            let path = params
                .known_hosts_path
                .clone()
                .or_else(default_known_hosts)
                .ok_or_else(|| {
                    ReleaseError::ConfigError(
                        "known_hosts policy selected but no known_hosts file is available".to_string(),
                    )
                })?;
            let (key, _) = session.host_key().ok_or_else(|| {
                ReleaseError::ConnError("server did not present a host key".to_string())
            })?;

            let mut known = session
                .known_hosts()
                .map_err(|e| ReleaseError::ConnError(e.to_string()))?;
            known
                .read_file(&path, KnownHostFileKind::OpenSSH)
                .map_err(|e| {
                    ReleaseError::ConnError(format!("cannot read {}: {}", path.display(), e))
                })?;

            match known.check_port(&params.host, params.port, key) {
                CheckResult::Match => Ok(()),
                CheckResult::Mismatch => Err(ReleaseError::ConnError(format!(
                    "host key for {} does not match {}",
                    params.host,
                    path.display()
                ))),
                CheckResult::NotFound => Err(ReleaseError::ConnError(format!(
                    "host {} is not listed in {}",
                    params.host,
                    path.display()
                ))),
                CheckResult::Failure => Err(ReleaseError::ConnError(format!(
                    "host key check for {} failed",
                    params.host
                ))),
            }
        }
    }
}

fn default_known_hosts() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
}

fn authenticate(session: &Session, params: &SftpParams) -> Result<(), ReleaseError> {
    match &params.auth {
        TransferAuth::Password(password) => session
            .userauth_password(&params.user, password.expose_secret())
            .map_err(|e| ReleaseError::AuthError(format!("password rejected for {}: {}", params.user, e)))?,
        TransferAuth::PrivateKey { path, passphrase } => {
            let key = keys::load_private_key(path)?;
            let passphrase = passphrase.as_ref().map(|p| p.expose_secret());
            if key.encrypted && passphrase.is_none() {
                return Err(ReleaseError::KeyError {
                    path: path.clone(),
                    reason: "key is passphrase-protected and no passphrase was given".to_string(),
                });
            }
            debug!("Authenticating with {} key {}", key.format, path.display());
            session
                .userauth_pubkey_memory(&params.user, None, key.material(), passphrase)
                .map_err(|e| {
                    ReleaseError::AuthError(format!("key {} rejected: {}", path.display(), e))
                })?
        }
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(ReleaseError::AuthError(format!(
            "server did not accept credentials for {}",
            params.user
        )))
    }
}
