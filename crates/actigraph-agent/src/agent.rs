//! The agent actor: one task owning the buffer and the connection.
//!
//! All interaction goes through [`AgentHandle`]: commands flow in over
//! an unbounded channel, the coarse connection status flows out over a
//! watch channel. The actor never blocks capture; events recorded while
//! disconnected or mid-reconnect are buffered and flushed later.

use std::collections::VecDeque;
use std::time::Duration;

use actigraph_types::{ActivitySample, ConnectionStatus, now_millis};
use actigraph_wire::{ClientMessage, Frame, ServerMessage};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::buffer::EventBuffer;
use crate::error::{AgentError, AgentResult};

/// Agent tuning knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector address.
    pub server_addr: String,
    /// Interval between flush attempts while connected.
    pub flush_interval: Duration,
    /// How long acknowledged events are kept in the buffer.
    pub retention_window: Duration,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
    /// Reconnect attempts before the agent suspends (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl AgentConfig {
    /// Creates a config for the given collector address with default tuning.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            flush_interval: Duration::from_secs(60),
            retention_window: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

enum Command {
    SignIn { token: String },
    SignOut,
    Record(ActivitySample),
}

/// Handle to a running agent task.
pub struct AgentHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Spawns the agent task. The agent starts signed out and idle.
    pub fn spawn(config: AgentConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let retention = config.retention_window;
        let backoff = Backoff::new(config.backoff_base, config.backoff_cap);
        let actor = Actor {
            config,
            buffer: EventBuffer::new(retention),
            backoff,
            token: None,
            suspended: false,
            commands: command_rx,
            status: status_tx,
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            status: status_rx,
            task,
        }
    }

    /// Provides a token and starts (or resumes) connecting.
    pub fn sign_in(&self, token: impl Into<String>) -> AgentResult<()> {
        self.send(Command::SignIn {
            token: token.into(),
        })
    }

    /// Drops the token and disconnects. Buffered events are kept.
    pub fn sign_out(&self) -> AgentResult<()> {
        self.send(Command::SignOut)
    }

    /// Records a captured sample. Never blocks; the sample is stamped
    /// and buffered by the agent task.
    pub fn record(&self, sample: ActivitySample) -> AgentResult<()> {
        self.send(Command::Record(sample))
    }

    /// Returns the current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Returns a watch receiver for status changes.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stops the agent and waits for its task to finish.
    pub async fn shutdown(self) {
        drop(self.commands);
        let _ = self.task.await;
    }

    fn send(&self, command: Command) -> AgentResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AgentError::Stopped)
    }
}

/// Why a connection attempt or session ended.
enum Outcome {
    /// The user signed out; stop connecting until the next sign-in.
    SignedOut,
    /// The collector rejected the current token; it is discarded.
    AuthRejected,
    /// Transport failure; retry with backoff. `errored` distinguishes a
    /// corrupt stream or I/O fault from a plain close or refused
    /// connect, for the status surface.
    Lost { errored: bool },
    /// The handle was dropped; the task exits.
    Shutdown,
}

struct Actor {
    config: AgentConfig,
    buffer: EventBuffer,
    backoff: Backoff,
    token: Option<String>,
    suspended: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            // Idle until signed in. Capture keeps landing in the buffer.
            while self.token.is_none() || self.suspended {
                match self.commands.recv().await {
                    Some(Command::SignIn { token }) => {
                        self.token = Some(token);
                        self.suspended = false;
                        self.backoff.reset();
                    }
                    Some(Command::SignOut) => self.token = None,
                    Some(Command::Record(sample)) => self.buffer.record(sample.stamp()),
                    None => return,
                }
            }

            let outcome = self.run_connection().await;
            // However the session ended, the in-flight ack is never
            // coming; the next flush must be free to re-send.
            self.buffer.clear_pending();

            match outcome {
                Outcome::Shutdown => return,
                Outcome::SignedOut => {
                    self.token = None;
                    self.backoff.reset();
                    self.set_status(ConnectionStatus::Disconnected);
                }
                Outcome::AuthRejected => {
                    self.token = None;
                    self.set_status(ConnectionStatus::Error);
                }
                Outcome::Lost { errored } => {
                    self.set_status(if errored {
                        ConnectionStatus::Error
                    } else {
                        ConnectionStatus::Disconnected
                    });

                    let max = self.config.max_reconnect_attempts;
                    if max != 0 && self.backoff.attempts() >= max {
                        warn!(attempts = max, "reconnect attempts exhausted, suspending");
                        self.suspended = true;
                        self.set_status(ConnectionStatus::Error);
                        continue;
                    }

                    let delay = self.backoff.next_delay();
                    debug!(?delay, "reconnecting after backoff");
                    if !self.wait(delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleeps for `delay` while continuing to serve commands. A sign-in
    /// cuts the sleep short so a fresh token connects immediately.
    /// Returns false when the handle is gone.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::SignIn { token }) => {
                        self.token = Some(token);
                        self.backoff.reset();
                        return true;
                    }
                    Some(Command::SignOut) => {
                        self.token = None;
                        return true;
                    }
                    Some(Command::Record(sample)) => self.buffer.record(sample.stamp()),
                    None => return false,
                },
            }
        }
    }

    /// Connects, authenticates, then streams until something ends the
    /// session.
    async fn run_connection(&mut self) -> Outcome {
        let Some(token) = self.token.clone() else {
            return Outcome::SignedOut;
        };

        debug!(addr = %self.config.server_addr, "connecting");
        let mut stream = match TcpStream::connect(&self.config.server_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "connect failed");
                return Outcome::Lost { errored: false };
            }
        };

        if send_message(&mut stream, &ClientMessage::Auth {
            token: token.clone(),
        })
        .await
        .is_err()
        {
            return Outcome::Lost { errored: true };
        }

        // One verdict arrives per auth sent, in order. A token refresh
        // while a verdict is outstanding queues a second auth; the old
        // token's rejection must not discard the new one.
        let mut awaiting_verdict = VecDeque::from([token]);

        let mut buf = BytesMut::with_capacity(8 * 1024);

        // Handshake first; nothing else is sent until a token is accepted.
        loop {
            tokio::select! {
                msg = read_message(&mut stream, &mut buf) => match msg {
                    Ok(ServerMessage::AuthOk) => {
                        awaiting_verdict.pop_front();
                        break;
                    }
                    Ok(ServerMessage::AuthFail { reason }) => {
                        let rejected = awaiting_verdict.pop_front();
                        if rejected == self.token {
                            warn!(%reason, "authentication rejected");
                            return Outcome::AuthRejected;
                        }
                        debug!(%reason, "superseded token rejected, awaiting newer verdict");
                    }
                    Ok(other) => debug!(?other, "unexpected pre-auth message"),
                    Err(e) => {
                        debug!(error = %e, "handshake failed");
                        return Outcome::Lost {
                            errored: !matches!(e, AgentError::ConnectionClosed),
                        };
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Record(sample)) => self.buffer.record(sample.stamp()),
                    Some(Command::SignIn { token }) => {
                        self.token = Some(token.clone());
                        if send_message(&mut stream, &ClientMessage::Auth {
                            token: token.clone(),
                        })
                        .await
                        .is_err()
                        {
                            return Outcome::Lost { errored: true };
                        }
                        awaiting_verdict.push_back(token);
                    }
                    Some(Command::SignOut) => return Outcome::SignedOut,
                    None => return Outcome::Shutdown,
                },
            }
        }

        info!(addr = %self.config.server_addr, "connected and authenticated");
        self.backoff.reset();
        self.set_status(ConnectionStatus::Connected);

        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first
        // flush happens one full interval after connecting.
        flush.tick().await;

        loop {
            tokio::select! {
                _ = flush.tick() => {
                    if let Some((batch_id, events)) = self.buffer.begin_flush() {
                        debug!(%batch_id, events = events.len(), "flushing batch");
                        if send_message(
                            &mut stream,
                            &ClientMessage::ActivityBatch { events, batch_id },
                        )
                        .await
                        .is_err()
                        {
                            return Outcome::Lost { errored: true };
                        }
                    }
                }
                msg = read_message(&mut stream, &mut buf) => match msg {
                    Ok(ServerMessage::BatchAck { batch_id }) => {
                        if !self.buffer.acknowledge(batch_id, now_millis()) {
                            debug!(%batch_id, "stale ack ignored");
                        }
                    }
                    Ok(ServerMessage::Error { message }) => {
                        // The batch was refused; let the next flush retry it.
                        warn!(%message, "collector reported error");
                        self.buffer.clear_pending();
                    }
                    Ok(ServerMessage::AuthOk) => {
                        awaiting_verdict.pop_front();
                        debug!("re-authenticated");
                    }
                    Ok(ServerMessage::AuthFail { reason }) => {
                        let rejected = awaiting_verdict.pop_front();
                        if rejected == self.token {
                            warn!(%reason, "re-authentication rejected");
                            return Outcome::AuthRejected;
                        }
                        debug!(%reason, "superseded token rejected");
                    }
                    Err(e) => {
                        debug!(error = %e, "connection lost");
                        return Outcome::Lost {
                            errored: !matches!(e, AgentError::ConnectionClosed),
                        };
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Record(sample)) => self.buffer.record(sample.stamp()),
                    Some(Command::SignIn { token }) => {
                        // Token refresh: re-authenticate on the live connection.
                        self.token = Some(token.clone());
                        if send_message(&mut stream, &ClientMessage::Auth {
                            token: token.clone(),
                        })
                        .await
                        .is_err()
                        {
                            return Outcome::Lost { errored: true };
                        }
                        awaiting_verdict.push_back(token);
                    }
                    Some(Command::SignOut) => return Outcome::SignedOut,
                    None => return Outcome::Shutdown,
                },
            }
        }
    }

    /// Emits only on actual change; repeated disconnects while already
    /// disconnected are invisible to watchers.
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn send_message(stream: &mut TcpStream, message: &ClientMessage) -> AgentResult<()> {
    let mut out = BytesMut::new();
    message.to_frame()?.encode(&mut out);
    stream.write_all(&out).await?;
    Ok(())
}

/// Reads one server message, accumulating partial frames in `buf`.
///
/// Cancel safe: bytes already read stay in `buf`, so dropping this
/// future from a `select!` loses nothing.
async fn read_message(stream: &mut TcpStream, buf: &mut BytesMut) -> AgentResult<ServerMessage> {
    loop {
        if let Some(frame) = Frame::decode(buf)? {
            return Ok(ServerMessage::from_frame(&frame)?);
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(AgentError::ConnectionClosed);
        }
    }
}
