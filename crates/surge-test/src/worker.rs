//! Simulated worker node
//!
//! Speaks the coordinator's wire protocol over a real TCP connection, follows
//! ramp directives, and sends reports on demand.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use surge_core::{Inbound, NodeId, Outbound, SurgeError, SurgeResult};

use crate::profile::ReportGenerator;

/// How long to wait for the coordinator before giving up
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A ramp directive as received
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Directive {
    pub clients: u64,
    pub step: u64,
}

/// A simulated worker connected to a coordinator
pub struct SimulatedWorker {
    node_id: NodeId,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Clients the last directive asked for
    target: u64,
    /// Directives received so far
    directives: Vec<Directive>,
    recv_timeout: Duration,
}

impl SimulatedWorker {
    /// Connect and wait for the `register` greeting
    pub async fn connect(addr: SocketAddr) -> SurgeResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let node_id = match recv_line(&mut lines, DEFAULT_RECV_TIMEOUT).await? {
            Some(Outbound::Register { node_id }) => node_id,
            Some(other) => {
                return Err(SurgeError::MalformedMessage(format!(
                    "expected register, got {other:?}"
                )))
            }
            None => return Err(SurgeError::Io(std::io::ErrorKind::UnexpectedEof.into())),
        };
        tracing::debug!(node = %node_id, "simulated worker registered");

        Ok(SimulatedWorker {
            node_id,
            lines,
            writer,
            target: 0,
            directives: Vec::new(),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        })
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Clients currently requested by the coordinator
    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Wait for the next ramp directive. `None` when the coordinator closed
    /// the connection.
    pub async fn next_directive(&mut self) -> SurgeResult<Option<Directive>> {
        loop {
            match recv_line(&mut self.lines, self.recv_timeout).await? {
                Some(Outbound::Ramp { clients, step }) => {
                    let directive = Directive { clients, step };
                    self.target = clients;
                    self.directives.push(directive);
                    return Ok(Some(directive));
                }
                Some(Outbound::Register { .. }) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Send a report with the given metrics payload
    pub async fn report(&mut self, metrics: Value) -> SurgeResult<()> {
        let line = Inbound::report(metrics).to_line()?;
        self.send_raw(&line).await
    }

    /// Report the current target using generated QoE figures
    pub async fn report_with(&mut self, generator: &mut ReportGenerator) -> SurgeResult<()> {
        let metrics = generator.next_metrics(self.target);
        self.report(metrics).await
    }

    /// Send an arbitrary line, valid or not
    pub async fn send_raw(&mut self, line: &str) -> SurgeResult<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Send raw bytes with no framing added
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> SurgeResult<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Close the connection
    pub async fn close(mut self) -> SurgeResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

async fn recv_line(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    timeout: Duration,
) -> SurgeResult<Option<Outbound>> {
    let line = tokio::time::timeout(timeout, lines.next_line())
        .await
        .map_err(|_| SurgeError::Io(std::io::ErrorKind::TimedOut.into()))??;
    match line {
        Some(line) => Ok(Some(Outbound::from_line(&line)?)),
        None => Ok(None),
    }
}
