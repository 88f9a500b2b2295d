//! Remote command sessions

use async_trait::async_trait;
use crate::TransportError;
use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

/// Boxed byte source handed to callers
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed byte sink handed to callers
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffer size of the in-process stdin/stdout pipes (64KB)
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// One remote command channel.
///
/// Pipes must be taken and sinks attached before [`run`](RemoteSession::run);
/// each session runs a single command.
#[async_trait]
pub trait RemoteSession: Send {
    /// Writer feeding the command's stdin. Returns `None` after the first call.
    ///
    /// Shutting the writer down (or dropping it) sends EOF to the command.
    fn take_stdin(&mut self) -> Option<BoxedWriter>;

    /// Reader over the command's stdout. Returns `None` after the first call.
    fn take_stdout(&mut self) -> Option<BoxedReader>;

    /// Send the command's stdout to `sink`
    fn set_stdout(&mut self, sink: BoxedWriter);

    /// Send the command's stderr to `sink`
    fn set_stderr(&mut self, sink: BoxedWriter);

    /// Execute `command` and wait for it to exit.
    ///
    /// A non-zero exit status or a terminating signal is reported as
    /// [`TransportError::CommandFailed`].
    async fn run(&mut self, command: &str) -> Result<(), TransportError>;

    /// Run `command` and collect its stdout
    async fn output(&mut self, command: &str) -> Result<Bytes, TransportError> {
        let buffer = OutputBuffer::default();
        self.set_stdout(Box::new(buffer.clone()));
        let result = self.run(command).await;
        finish_capture(result, buffer.take())
    }

    /// Run `command` and collect stdout and stderr interleaved
    async fn combined_output(&mut self, command: &str) -> Result<Bytes, TransportError> {
        let buffer = OutputBuffer::default();
        self.set_stdout(Box::new(buffer.clone()));
        self.set_stderr(Box::new(buffer.clone()));
        let result = self.run(command).await;
        finish_capture(result, buffer.take())
    }

    /// Run `command` forwarding its output live
    async fn run_streaming(
        &mut self,
        command: &str,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> Result<(), TransportError> {
        self.set_stdout(stdout);
        self.set_stderr(stderr);
        self.run(command).await
    }
}

fn finish_capture(result: Result<(), TransportError>, captured: Bytes) -> Result<Bytes, TransportError> {
    match result {
        Ok(()) => Ok(captured),
        Err(e) => Err(e.with_output(captured)),
    }
}

/// Shared in-memory sink used to capture command output
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Drain everything written so far
    pub fn take(&self) -> Bytes {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::from(std::mem::take(&mut *inner))
    }
}

impl AsyncWrite for OutputBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Session channel on an [`SshConnection`](crate::SshConnection)
pub struct SshSession {
    channel: Channel<Msg>,
    stdin: Option<DuplexStream>,
    stdin_taken: bool,
    stdout: Option<BoxedWriter>,
    stdout_taken: bool,
    stderr: Option<BoxedWriter>,
}

impl SshSession {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            stdin: None,
            stdin_taken: false,
            stdout: None,
            stdout_taken: false,
            stderr: None,
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        if self.stdin_taken {
            return None;
        }
        self.stdin_taken = true;
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        self.stdin = Some(reader);
        Some(Box::new(writer))
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        if self.stdout_taken {
            return None;
        }
        self.stdout_taken = true;
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
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
        // Pipes are owned by this call so they close whenever it returns
        let mut stdin = self.stdin.take();
        let mut stdout = self.stdout.take();
        let mut stderr = self.stderr.take();

        debug!(command, "Executing remote command");
        self.channel.exec(true, command).await?;
        if stdin.is_none() {
            self.channel.eof().await?;
        }

        let mut buf = vec![0u8; 32 * 1024];
        let mut exit_status = None;
        let mut exit_signal = None;

        loop {
            tokio::select! {
                read = read_pipe(&mut stdin, &mut buf) => {
                    let sent = match read {
                        Ok(0) | Err(_) => {
                            stdin = None;
                            self.channel.eof().await
                        }
                        Ok(n) => self.channel.data(&buf[..n]).await,
                    };
                    if let Err(e) = sent {
                        debug!(error = %e, "Remote stopped accepting input");
                        stdin = None;
                    }
                }
                msg = self.channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => forward(&mut stdout, &data).await,
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => forward(&mut stderr, &data).await,
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        exit_signal = Some(signal_label(signal_name))
                    }
                    Some(ChannelMsg::Failure) => {
                        return Err(TransportError::Session(format!(
                            "remote refused to execute {:?}",
                            command
                        )))
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(other) => trace!("Ignoring channel message {:?}", other),
                }
            }
        }

        for sink in [stdout.as_mut(), stderr.as_mut()].into_iter().flatten() {
            let _ = sink.shutdown().await;
        }

        debug!(command, ?exit_status, ?exit_signal, "Remote command finished");
        match (exit_status, exit_signal) {
            (Some(0), None) => Ok(()),
            (status, signal) => Err(TransportError::CommandFailed {
                status,
                signal,
                output: Bytes::new(),
            }),
        }
    }
}

async fn read_pipe(pipe: &mut Option<DuplexStream>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn forward(sink: &mut Option<BoxedWriter>, data: &[u8]) {
    if let Some(writer) = sink {
        if let Err(e) = writer.write_all(data).await {
            debug!(error = %e, "Output sink closed");
            *sink = None;
        }
    }
}

fn signal_label(signal: Sig) -> String {
    match signal {
        Sig::Custom(name) => name,
        other => format!("{:?}", other),
    }
}
