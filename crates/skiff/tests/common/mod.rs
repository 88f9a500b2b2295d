//! Shared fixtures for integration tests: an in-memory remote host that
//! speaks scp over the session pipes, and a transport handing out sessions
//! on it.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use skiff::proto::{ControlLine, ProtocolError, ScpReader, ScpWriter};
use skiff::ssh::{BoxedReader, BoxedWriter, Connection, Transport};
use skiff::{RemoteSession, Target, TransportError};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};

/// Initialise test logging once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Random payload of `len` bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Write `data` to `dir/name` with permission bits `mode`
pub fn local_file(dir: &TempDir, name: &str, data: &[u8], mode: u32) -> Result<PathBuf> {
    let path = dir.path().join(name);
    std::fs::write(&path, data).context("Failed to write local test file")?;
    set_mode(&path, mode)?;
    Ok(path)
}

/// Permission bits of a local file
pub fn mode_of(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).context("Failed to stat local file")?;
    Ok(metadata.permissions().mode() & 0o777)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .context("Failed to set permissions")
}

/// Progress callback recording every reported fraction
pub fn progress_recorder() -> (impl Fn(f64) + Send + Sync + 'static, Arc<Mutex<Vec<f64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (move |fraction: f64| sink.lock().unwrap().push(fraction), seen)
}

/// File stored on an in-memory host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub data: Vec<u8>,
    pub mode: u32,
}

/// Misbehaviour to inject into the remote side
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Send this line instead of the real control line when serving a file
    pub control_line: Option<String>,
    /// Stop serving a file after this many payload bytes
    pub truncate_to: Option<usize>,
    /// Plain commands exit with status 1
    pub fail_commands: bool,
    /// Plain commands are killed with SIGKILL
    pub kill_commands: bool,
}

/// State of one in-memory host
#[derive(Clone, Default)]
pub struct RemoteHost {
    pub files: Arc<Mutex<HashMap<String, RemoteFile>>>,
    pub wire: Arc<Mutex<Vec<u8>>>,
    pub commands: Arc<Mutex<Vec<String>>>,
    pub faults: Arc<Mutex<Faults>>,
}

impl RemoteHost {
    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put_file(&self, path: &str, data: &[u8], mode: u32) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            RemoteFile {
                data: data.to_vec(),
                mode,
            },
        );
    }

    /// Bytes the last `scp -t` received on stdin
    pub fn wire(&self) -> Vec<u8> {
        self.wire.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock().unwrap() = faults;
    }

    fn faults(&self) -> Faults {
        self.faults.lock().unwrap().clone()
    }
}

/// Session on an in-memory host
pub struct MemorySession {
    name: String,
    host: RemoteHost,
    stdin: Option<DuplexStream>,
    stdin_taken: bool,
    stdout: Option<BoxedWriter>,
    stdout_taken: bool,
    stderr: Option<BoxedWriter>,
}

impl MemorySession {
    pub fn new(name: impl Into<String>, host: RemoteHost) -> Self {
        Self {
            name: name.into(),
            host,
            stdin: None,
            stdin_taken: false,
            stdout: None,
            stdout_taken: false,
            stderr: None,
        }
    }
}

fn exit(status: u32) -> TransportError {
    TransportError::CommandFailed {
        status: Some(status),
        signal: None,
        output: Bytes::new(),
    }
}

fn unquote(arg: &str) -> String {
    arg.trim()
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .replace("'\"'\"'", "'")
}

#[async_trait]
impl RemoteSession for MemorySession {
    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        if self.stdin_taken {
            return None;
        }
        self.stdin_taken = true;
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        self.stdin = Some(reader);
        Some(Box::new(writer))
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        if self.stdout_taken {
            return None;
        }
        self.stdout_taken = true;
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        self.stdout = Some(Box::new(writer));
        Some(Box::new(reader))
    }

    fn set_stdout(&mut self, sink: BoxedWriter) {
        self.stdout = Some(sink);
    }

    fn set_stderr(&mut self, sink: BoxedWriter) {
        self.stderr = Some(sink);
    }

    async fn run(&mut self, command: &str) -> Result<(), TransportError> {
        self.host.commands.lock().unwrap().push(command.to_string());
        let stdin = self.stdin.take();
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();

        if let Some((_, dest)) = command.split_once("scp -t ") {
            let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
                return Err(exit(1));
            };
            let mut reader = ScpReader::new(WireTap::new(stdin, Arc::clone(&self.host.wire)));
            let mut writer = ScpWriter::new(stdout);
            return scp_sink(&mut reader, &mut writer, &self.host, &unquote(dest))
                .await
                .map_err(|_| exit(1));
        }

        if let Some(source) = command.strip_prefix("scp -qrf ") {
            let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
                return Err(exit(1));
            };
            let mut reader = ScpReader::new(stdin);
            return scp_source(&mut reader, stdout, &self.host, &unquote(source))
                .await
                .map_err(|_| exit(1));
        }

        let faults = self.host.faults();
        if faults.kill_commands {
            return Err(TransportError::CommandFailed {
                status: None,
                signal: Some("KILL".to_string()),
                output: Bytes::new(),
            });
        }
        if faults.fail_commands {
            if let Some(mut stderr) = stderr {
                let _ = stderr.write_all(b"command failed\n").await;
            }
            return Err(exit(1));
        }
        if let Some(mut stdout) = stdout {
            let line = format!("{}: {}\n", self.name, command);
            let _ = stdout.write_all(line.as_bytes()).await;
        }
        Ok(())
    }
}

/// Remote `scp -t`: receive one file into the host
async fn scp_sink(
    reader: &mut ScpReader<WireTap<DuplexStream>>,
    writer: &mut ScpWriter<BoxedWriter>,
    host: &RemoteHost,
    path: &str,
) -> Result<(), ProtocolError> {
    host.wire.lock().unwrap().clear();
    writer.send_ok().await?;
    let line = reader.read_control().await?;

    if path.starts_with("/readonly/") {
        let message = format!("scp: {}: Permission denied", path);
        writer.send_error(false, &message).await?;
        return Err(ProtocolError::Remote {
            fatal: false,
            message,
        });
    }
    writer.send_ok().await?;

    let mut data = Vec::new();
    reader.receive_payload(line.size, &mut data, None).await?;
    reader.read_status().await?;
    writer.send_ok().await?;
    host.put_file(path, &data, line.mode);

    match reader.read_control().await {
        Err(ProtocolError::UnexpectedEof) => Ok(()),
        Err(e) => Err(e),
        Ok(line) => Err(ProtocolError::MalformedControlLine(line.to_string())),
    }
}

/// Remote `scp -f`: serve one file from the host
async fn scp_source(
    reader: &mut ScpReader<DuplexStream>,
    mut stdout: BoxedWriter,
    host: &RemoteHost,
    path: &str,
) -> Result<(), ProtocolError> {
    reader.read_status().await?;
    let faults = host.faults();

    if let Some(raw) = faults.control_line {
        stdout.write_all(format!("{}\n", raw).as_bytes()).await?;
        stdout.flush().await?;
        let _ = reader.read_status().await;
        return Err(ProtocolError::MalformedControlLine(raw));
    }

    let mut writer = ScpWriter::new(stdout);
    let Some(file) = host.file(path) else {
        let message = format!("scp: {}: No such file or directory", path);
        writer.send_error(false, &message).await?;
        return Err(ProtocolError::Remote {
            fatal: false,
            message,
        });
    };

    let name = path.rsplit('/').next().unwrap_or(path);
    let size = file.data.len() as u64;
    writer.write_control(&ControlLine::new(file.mode, size, name)).await?;
    reader.read_status().await?;

    if let Some(cut) = faults.truncate_to {
        let cut = cut.min(file.data.len());
        writer.send_payload(&mut &file.data[..cut], cut as u64, None).await?;
        return Err(ProtocolError::ShortTransfer {
            expected: size,
            actual: cut as u64,
        });
    }

    writer.send_payload(&mut &file.data[..], size, None).await?;
    writer.finish_payload().await?;
    reader.read_status().await?;
    Ok(())
}

/// Reader recording every byte that passes through it
pub struct WireTap<R> {
    inner: R,
    log: Arc<Mutex<Vec<u8>>>,
}

impl<R> WireTap<R> {
    pub fn new(inner: R, log: Arc<Mutex<Vec<u8>>>) -> Self {
        Self { inner, log }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for WireTap<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.log
                .lock()
                .unwrap()
                .extend_from_slice(&buf.filled()[before..]);
        }
        poll
    }
}

/// Transport over in-memory hosts, one per host name
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hosts: Arc<Mutex<HashMap<String, RemoteHost>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Host state for `name`, created on first use
    pub fn host(&self, name: &str) -> RemoteHost {
        self.hosts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn set_unreachable(&self, name: &str) {
        self.unreachable.lock().unwrap().insert(name.to_string());
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(&self, target: &Target) -> Result<MemoryConnection, TransportError> {
        if self.unreachable.lock().unwrap().contains(&target.host) {
            return Err(TransportError::Connect {
                target: target.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            name: target.host.clone(),
            host: self.host(&target.host),
        })
    }
}

pub struct MemoryConnection {
    name: String,
    host: RemoteHost,
}

#[async_trait]
impl Connection for MemoryConnection {
    type Session = MemorySession;

    async fn open_session(&self) -> Result<MemorySession, TransportError> {
        Ok(MemorySession::new(self.name.clone(), self.host.clone()))
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
