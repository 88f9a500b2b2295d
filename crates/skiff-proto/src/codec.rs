//! Reader/writer halves of the scp stream

use crate::{status, ControlLine, ProgressFn, ProgressWriter, ProtocolError};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::trace;

/// Maximum accepted length of a control or message line (64KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Receiving half of an scp stream
pub struct ScpReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> ScpReader<R> {
    /// Wrap a raw byte stream
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Read one status byte.
    ///
    /// `0x00` is success; `0x01` and `0x02` are followed by a message line and
    /// surface as [`ProtocolError::Remote`].
    pub async fn read_status(&mut self) -> Result<(), ProtocolError> {
        let mut byte = [0u8; 1];
        if self.inner.read(&mut byte).await? == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }

        match byte[0] {
            status::OK => Ok(()),
            code @ (status::WARNING | status::ERROR) => Err(self.remote_error(code).await),
            other => Err(ProtocolError::UnexpectedStatus(other)),
        }
    }

    /// Read a newline-terminated line, without the newline
    pub async fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut buf = Vec::new();
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        (&mut self.inner).take(limit).read_until(b'\n', &mut buf).await?;

        if buf.last() == Some(&b'\n') {
            buf.pop();
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        if buf.len() > MAX_LINE_LENGTH {
            return Err(ProtocolError::LineTooLong {
                max: MAX_LINE_LENGTH,
            });
        }
        Err(ProtocolError::UnexpectedEof)
    }

    /// Read the control line announcing the next file.
    ///
    /// A status prefix in place of the line means the sender gave up and is
    /// reported as [`ProtocolError::Remote`].
    pub async fn read_control(&mut self) -> Result<ControlLine, ProtocolError> {
        let first = self.inner.fill_buf().await?.first().copied();
        match first {
            None => Err(ProtocolError::UnexpectedEof),
            Some(code @ (status::WARNING | status::ERROR)) => {
                self.inner.consume(1);
                Err(self.remote_error(code).await)
            }
            Some(_) => {
                let line = self.read_line().await?;
                trace!("Received control line {:?}", line);
                ControlLine::parse(&line)
            }
        }
    }

    /// Copy exactly `size` payload bytes into `dest`.
    ///
    /// The payload's trailing NUL is not consumed; read it with
    /// [`read_status`](Self::read_status).
    pub async fn receive_payload<W>(
        &mut self,
        size: u64,
        dest: &mut W,
        progress: Option<ProgressFn>,
    ) -> Result<u64, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut writer = ProgressWriter::new(dest, size, progress);
        let copied = tokio::io::copy_buf(&mut (&mut self.inner).take(size), &mut writer).await?;
        if copied < size {
            return Err(ProtocolError::ShortTransfer {
                expected: size,
                actual: copied,
            });
        }
        writer.complete();
        trace!("Received {} payload bytes", copied);
        Ok(copied)
    }

    /// Unwrap the underlying stream, dropping any buffered bytes
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    async fn remote_error(&mut self, code: u8) -> ProtocolError {
        let message = match self.read_line().await {
            Ok(message) => message,
            Err(e) => return e,
        };
        ProtocolError::Remote {
            fatal: code == status::ERROR,
            message,
        }
    }
}

/// Sending half of an scp stream
pub struct ScpWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ScpWriter<W> {
    /// Wrap a raw byte stream
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Acknowledge the previous step
    pub async fn send_ok(&mut self) -> Result<(), ProtocolError> {
        self.send(&[status::OK]).await
    }

    /// Report a problem to the peer. Newlines in `message` are flattened.
    pub async fn send_error(&mut self, fatal: bool, message: &str) -> Result<(), ProtocolError> {
        let code = if fatal { status::ERROR } else { status::WARNING };
        let mut buf = Vec::with_capacity(message.len() + 2);
        buf.push(code);
        buf.extend(message.bytes().map(|b| if b == b'\n' { b' ' } else { b }));
        buf.push(b'\n');
        self.send(&buf).await
    }

    /// Announce a file
    pub async fn write_control(&mut self, line: &ControlLine) -> Result<(), ProtocolError> {
        trace!("Sending control line {}", line);
        self.send(line.encode().as_bytes()).await
    }

    /// Copy exactly `size` bytes from `source` onto the stream
    pub async fn send_payload<R>(
        &mut self,
        source: &mut R,
        size: u64,
        progress: Option<ProgressFn>,
    ) -> Result<u64, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer = ProgressWriter::new(&mut self.inner, size, progress);
        let copied = tokio::io::copy(&mut source.take(size), &mut writer).await?;
        if copied < size {
            return Err(ProtocolError::ShortTransfer {
                expected: size,
                actual: copied,
            });
        }
        writer.complete();
        trace!("Sent {} payload bytes", copied);
        Ok(copied)
    }

    /// Terminate the payload with a NUL byte
    pub async fn finish_payload(&mut self) -> Result<(), ProtocolError> {
        self.send(&[0]).await
    }

    /// Close the write direction
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> W {
        self.inner
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
