//! Duplex byte-channel abstraction over the frame codec.
//!
//! The session client only sees the `Transport` trait, so the child
//! process's stdio pipes and an in-memory stream for tests are
//! interchangeable.

use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::lsp::codec;
use crate::lsp::error::ProbeError;
use crate::lsp::types::Message;

#[async_trait]
pub trait Transport: Send {
    /// Frame a pre-serialized JSON payload and write it to the channel.
    async fn send(&mut self, payload: &str) -> Result<(), ProbeError>;

    /// Decode the next frame. `None` means a zero-length frame arrived and
    /// no message was produced this cycle.
    async fn recv(&mut self) -> Result<Option<Message>, ProbeError>;
}

/// A transport over any read/write pair of byte streams.
pub struct ChannelTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ChannelTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        ChannelTransport { reader, writer }
    }
}

#[async_trait]
impl<R, W> Transport for ChannelTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &str) -> Result<(), ProbeError> {
        codec::write_frame(&mut self.writer, payload).await
    }

    async fn recv(&mut self) -> Result<Option<Message>, ProbeError> {
        codec::read_message(&mut self.reader).await
    }
}

pub type StdioTransport = ChannelTransport<BufReader<ChildStdout>, ChildStdin>;

/// Spawn the server process with piped stdio. Stdin and stdout carry the
/// protocol; stderr is handed back for diagnostic logging only.
pub fn spawn_server(
    program: &str,
    args: &[String],
) -> anyhow::Result<(Child, StdioTransport, ChildStderr)> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn server '{program}'"))?;

    let writer = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to take server stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to take server stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("failed to take server stderr"))?;

    let transport = ChannelTransport::new(BufReader::new(stdout), writer);
    Ok((child, transport, stderr))
}
