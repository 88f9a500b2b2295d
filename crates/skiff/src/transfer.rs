//! scp upload and download
//!
//! Each transfer runs the remote `scp` in sink (`-t`) or source (`-f`) mode on
//! a session and speaks the protocol over the command's stdin and stdout from
//! a background task. The transfer result combines both sides: a protocol
//! failure is reported over the command's exit status, unless the protocol
//! side only saw the command go away.

use crate::{Result, SkiffError};
use skiff_proto::{ControlLine, ProgressFn, ProtocolError, ScpReader, ScpWriter};
use skiff_ssh::{BoxedReader, BoxedWriter, ConnectionPool, RemoteSession, Target, Transport, TransportError};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinError;
use tracing::{debug, info, warn};


/// What a transfer moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// Path on the local machine
    pub local_path: PathBuf,
    /// Path on the remote host
    pub remote_path: String,
    /// Permission bits carried on the wire
    pub mode: u32,
    /// Declared payload size
    pub size: u64,
}

/// Completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// File metadata as exchanged
    pub descriptor: TransferDescriptor,
    /// Payload bytes copied
    pub bytes: u64,
}

/// Single-file scp transfers with optional progress reporting
#[derive(Clone, Default)]
pub struct FileTransfer {
    progress: Option<ProgressFn>,
}

impl FileTransfer {
    /// Transfers without progress reporting
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the completed fraction of each transfer to `progress`
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Copy `local` to `remote` on the host behind `session`.
    ///
    /// An existing remote file is removed first.
    pub async fn upload<S>(&self, session: &mut S, local: impl AsRef<Path>, remote: &str) -> Result<TransferOutcome>
    where
        S: RemoteSession + ?Sized,
    {
        let local = local.as_ref();
        let file = File::open(local).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(SkiffError::Configuration(format!(
                "{} is not a regular file",
                local.display()
            )));
        }
        let name = local
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| SkiffError::Configuration(format!("{} has no file name", local.display())))?;
        if name.contains('\n') {
            return Err(SkiffError::Configuration(format!(
                "file name {:?} cannot be sent in an scp control line",
                name
            )));
        }

        let line = ControlLine::new(file_mode(&metadata), metadata.len(), name);
        let descriptor = TransferDescriptor {
            local_path: local.to_path_buf(),
            remote_path: remote.to_string(),
            mode: line.mode,
            size: line.size,
        };
        info!(local = %local.display(), remote, size = line.size, "Uploading");

        let (stdin, stdout) = pipes(session)?;
        let progress = self.progress.clone();
        let background = tokio::spawn(async move {
            let mut reader = ScpReader::new(stdout);
            let mut writer = ScpWriter::new(stdin);
            let result = send_file(&mut reader, &mut writer, file, &line, progress).await;
            let _ = writer.shutdown().await;
            result
        });

        let dest = shell_quote(remote);
        let foreground = session.run(&format!("rm -f {dest} ; scp -t {dest}")).await;
        let bytes = settle(background.await, foreground)?;

        debug!(remote, bytes, "Upload complete");
        Ok(TransferOutcome { descriptor, bytes })
    }

    /// Copy `remote` from the host behind `session` to `local`.
    ///
    /// `local` is created or truncated and gets the remote permission bits.
    pub async fn download<S>(&self, session: &mut S, remote: &str, local: impl AsRef<Path>) -> Result<TransferOutcome>
    where
        S: RemoteSession + ?Sized,
    {
        let local = local.as_ref().to_path_buf();
        info!(remote, local = %local.display(), "Downloading");

        let (stdin, stdout) = pipes(session)?;
        let progress = self.progress.clone();
        let dest = local.clone();
        let background = tokio::spawn(async move {
            let mut reader = ScpReader::new(stdout);
            let mut writer = ScpWriter::new(stdin);
            let result = receive_file(&mut reader, &mut writer, &dest, progress).await;
            if let Err(e) = &result {
                report_failure(&mut writer, e).await;
            }
            let _ = writer.shutdown().await;
            result
        });

        let source = shell_quote(remote);
        let foreground = session.run(&format!("scp -qrf {source}")).await;
        let (line, bytes) = settle(background.await, foreground)?;

        debug!(remote, bytes, "Download complete");
        Ok(TransferOutcome {
            descriptor: TransferDescriptor {
                local_path: local,
                remote_path: remote.to_string(),
                mode: line.mode,
                size: line.size,
            },
            bytes,
        })
    }

    /// Upload over a session taken from `pool`
    pub async fn put<T>(
        &self,
        pool: &ConnectionPool<T>,
        target: &Target,
        local: impl AsRef<Path>,
        remote: &str,
    ) -> Result<TransferOutcome>
    where
        T: Transport,
    {
        let mut session = pool.session(target).await?;
        self.upload(&mut session, local, remote).await
    }

    /// Download over a session taken from `pool`
    pub async fn get<T>(
        &self,
        pool: &ConnectionPool<T>,
        target: &Target,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<TransferOutcome>
    where
        T: Transport,
    {
        let mut session = pool.session(target).await?;
        self.download(&mut session, remote, local).await
    }
}

fn pipes<S>(session: &mut S) -> Result<(BoxedWriter, BoxedReader)>
where
    S: RemoteSession + ?Sized,
{
    let stdin = session
        .take_stdin()
        .ok_or_else(|| SkiffError::Session("stdin already taken".to_string()))?;
    let stdout = session
        .take_stdout()
        .ok_or_else(|| SkiffError::Session("stdout already taken".to_string()))?;
    Ok((stdin, stdout))
}

/// Sender side of an upload, talking to a remote `scp -t`
async fn send_file(
    reader: &mut ScpReader<BoxedReader>,
    writer: &mut ScpWriter<BoxedWriter>,
    mut file: File,
    line: &ControlLine,
    progress: Option<ProgressFn>,
) -> Result<u64> {
    reader.read_status().await?;
    writer.write_control(line).await?;
    reader.read_status().await?;

    let sent = writer.send_payload(&mut file, line.size, progress).await?;
    writer.finish_payload().await?;
    reader.read_status().await?;
    Ok(sent)
}

/// Receiver side of a download, talking to a remote `scp -f`
async fn receive_file(
    reader: &mut ScpReader<BoxedReader>,
    writer: &mut ScpWriter<BoxedWriter>,
    dest: &Path,
    progress: Option<ProgressFn>,
) -> Result<(ControlLine, u64)> {
    writer.send_ok().await?;
    let line = reader.read_control().await?;
    debug!(name = %line.name, size = line.size, mode = format_args!("{:o}", line.mode), "Receiving file");

    let mut file = File::create(dest).await?;
    set_file_mode(&file, line.mode).await?;
    writer.send_ok().await?;

    let copied = reader.receive_payload(line.size, &mut file, progress).await?;
    file.flush().await?;
    reader.read_status().await?;
    writer.send_ok().await?;
    Ok((line, copied))
}

/// Tell the remote source why the download stopped, unless it already knows
async fn report_failure(writer: &mut ScpWriter<BoxedWriter>, error: &SkiffError) {
    match error {
        SkiffError::TransferProtocol(e) if e.is_peer_gone() => {}
        SkiffError::TransferProtocol(ProtocolError::Remote { .. }) => {}
        e => {
            let _ = writer.send_error(true, &e.to_string()).await;
        }
    }
}

/// Combine the protocol task's outcome with the remote command's exit
fn settle<T>(
    background: std::result::Result<Result<T>, JoinError>,
    foreground: std::result::Result<(), TransportError>,
) -> Result<T> {
    let background = background.map_err(SkiffError::from).and_then(|result| result);
    match (background, foreground) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(protocol), Err(command)) if is_peer_gone(&protocol) => {
            debug!(error = %protocol, "Protocol stream closed by exiting command");
            Err(command.into())
        }
        (Err(protocol), foreground) => {
            if let Err(command) = foreground {
                warn!(error = %command, "Remote scp also failed");
            }
            Err(protocol)
        }
        (Ok(_), Err(command)) => Err(command.into()),
    }
}

fn is_peer_gone(error: &SkiffError) -> bool {
    match error {
        SkiffError::TransferProtocol(e) => e.is_peer_gone(),
        _ => false,
    }
}

/// Quote `path` for a POSIX shell
pub fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\"'\"'"))
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
async fn set_file_mode(file: &File, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_file_mode(_file: &File, _mode: u32) -> Result<()> {
    Ok(())
}
