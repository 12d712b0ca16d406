//! One authenticated ClientQuery session.
//!
//! A [`Session`] owns exactly one line transport and tracks its health
//! through a small state machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --auth ok--> Ready
//!      ^                        │ auth rejected → AuthError
//!      │                        └ transport failure → ConnectError
//!      ├── Ready --I/O error / close-------------------┐
//!      │                                               │
//!      └── Degraded --keep-alive fails-----------------┘
//!          Ready --no line within idle window--> Degraded
//!          Degraded --keep-alive ok / line arrives--> Ready
//! ```
//!
//! The session performs exactly one connect attempt per call; retry and
//! reconnect policy belongs to the owning supervisor. No other component
//! mutates the state.

// Rust guideline compliant 2025-01

use std::fmt;
use std::io;
use std::time::Duration;

use crate::codec;
use crate::transport::{connect_cause, TcpTransport, Transport};

/// Connection health as owned and mutated by the session alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable transport.
    Disconnected,
    /// Transport opening in progress.
    Connecting,
    /// Transport open, auth handshake in progress.
    Authenticating,
    /// Authenticated and healthy.
    Ready,
    /// No traffic within the idle window; health unconfirmed.
    Degraded,
}

/// Why a connect attempt failed at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCause {
    /// Remote actively refused the connection.
    Refused,
    /// Host could not be resolved or routed.
    Unreachable,
    /// The connect or handshake timed out.
    Timeout,
    /// The connection dropped mid-handshake.
    Closed,
}

impl fmt::Display for ConnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "connection refused"),
            Self::Unreachable => write!(f, "host unreachable"),
            Self::Timeout => write!(f, "timed out"),
            Self::Closed => write!(f, "closed during handshake"),
        }
    }
}

/// Errors surfaced by session operations.
///
/// A read timeout is deliberately NOT here: it is a normal outcome
/// reported as [`ReadOutcome::Timeout`] so callers can branch without
/// inspecting an error taxonomy.
#[derive(Debug)]
pub enum QueryError {
    /// Transport-level connect failure, by cause.
    Connect(ConnectCause),
    /// Explicit protocol-level auth rejection.
    Auth(String),
    /// Write retries exhausted; the session is now disconnected.
    Send(String),
    /// Remote closed the connection cleanly.
    Closed,
    /// A command produced no response line before the response timeout.
    ResponseTimeout,
    /// Every event registration failed; the listener cannot start.
    Registration(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(cause) => write!(f, "connect failed: {cause}"),
            Self::Auth(msg) => write!(f, "authentication rejected: {msg}"),
            Self::Send(msg) => write!(f, "send failed: {msg}"),
            Self::Closed => write!(f, "connection closed by remote"),
            Self::ResponseTimeout => write!(f, "no response before timeout"),
            Self::Registration(msg) => write!(f, "event registration failed: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Outcome of a bounded read: either a full line or the elapsed bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One normalized protocol line.
    Line(String),
    /// Nothing arrived within the bound. Not an error.
    Timeout,
}

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// API key sent in the auth handshake.
    pub apikey: String,
    /// Bound on transport open and on each handshake line.
    pub connect_timeout: Duration,
    /// Bound on each expected command-response line.
    pub response_timeout: Duration,
    /// First delay of the write retry backoff; doubles per retry.
    pub send_retry_base: Duration,
    /// Write retries after the initial attempt before giving up.
    pub send_retry_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25639,
            apikey: String::new(),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(2),
            send_retry_base: Duration::from_secs(5),
            send_retry_limit: 3,
        }
    }
}

/// One authenticated connection to the remote query socket.
///
/// The transport is exclusively owned; command/response traffic and the
/// event stream cannot be interleaved by two callers because every
/// operation takes `&mut self`.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    state: SessionState,
    config: SessionConfig,
}

impl Session<TcpTransport> {
    /// Open the TCP transport and authenticate. Exactly one attempt.
    ///
    /// # Errors
    ///
    /// [`QueryError::Connect`] for transport-level failures (with cause),
    /// [`QueryError::Auth`] for an explicit protocol rejection.
    pub async fn connect(config: &SessionConfig) -> Result<Self, QueryError> {
        log::info!("Connecting to query at {}:{}", config.host, config.port);
        let transport =
            TcpTransport::open(&config.host, config.port, config.connect_timeout).await?;
        Self::authenticate(transport, config).await
    }
}

impl<T: Transport> Session<T> {
    /// Run the auth handshake over an already-open transport.
    ///
    /// Writes `auth apikey=<key>` and reads lines until one carries the
    /// success marker (`msg=ok`) or an error line with a non-zero id.
    /// Pre-auth banner lines are skipped.
    pub async fn authenticate(mut transport: T, config: &SessionConfig) -> Result<Self, QueryError> {
        let auth_line = format!("auth apikey={}", config.apikey);
        transport
            .write_line(&auth_line)
            .await
            .map_err(|e| QueryError::Connect(connect_cause(&e)))?;

        loop {
            let line = tokio::time::timeout(config.connect_timeout, transport.next_line())
                .await
                .map_err(|_| QueryError::Connect(ConnectCause::Timeout))?
                .map_err(|e| QueryError::Connect(connect_cause(&e)))?
                .ok_or(QueryError::Connect(ConnectCause::Closed))?;

            let line = codec::normalize(&line);
            // The success marker is itself an error line (`error id=0
            // msg=ok`), so it must be checked first.
            if line.contains("msg=ok") {
                log::info!("Query connection established");
                return Ok(Self {
                    transport,
                    state: SessionState::Ready,
                    config: config.clone(),
                });
            }
            if line.starts_with("error") {
                log::error!("Query authentication failed");
                log::debug!("Auth rejection line: {line}");
                let msg = codec::parse_error(&line)
                    .map(|status| status.msg)
                    .unwrap_or(line);
                return Err(QueryError::Auth(msg));
            }
            // Greeting/banner output before the auth result; keep reading.
            log::debug!("Skipping pre-auth line: {line}");
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Write one command line, retrying with exponential backoff.
    ///
    /// Retries start at `send_retry_base` and double per attempt. When
    /// the retry budget is exhausted the session transitions to
    /// Disconnected and the caller must reconnect before further writes.
    pub async fn write_line(&mut self, line: &str) -> Result<(), QueryError> {
        let mut delay = self.config.send_retry_base;
        let mut attempt: u32 = 0;
        loop {
            match self.transport.write_line(line).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.config.send_retry_limit {
                        self.state = SessionState::Disconnected;
                        return Err(QueryError::Send(format!(
                            "write failed after {} attempts: {e}",
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    log::warn!(
                        "Write failed ({e}); retry {attempt}/{} in {:?}",
                        self.config.send_retry_limit,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Read one line, waiting at most `timeout`.
    ///
    /// An elapsed bound is a [`ReadOutcome::Timeout`] value, not an
    /// error; it also degrades a Ready session (traffic is overdue). Any
    /// arriving line restores Ready.
    ///
    /// # Errors
    ///
    /// [`QueryError::Closed`] on remote close or a reset-class I/O error,
    /// [`QueryError::Connect`] for other transport failures; both leave
    /// the session Disconnected.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<ReadOutcome, QueryError> {
        match tokio::time::timeout(timeout, self.transport.next_line()).await {
            Err(_elapsed) => {
                if self.state == SessionState::Ready {
                    self.state = SessionState::Degraded;
                }
                Ok(ReadOutcome::Timeout)
            }
            Ok(Ok(Some(line))) => {
                self.state = SessionState::Ready;
                Ok(ReadOutcome::Line(codec::normalize(&line)))
            }
            Ok(Ok(None)) => {
                self.state = SessionState::Disconnected;
                Err(QueryError::Closed)
            }
            Ok(Err(e)) => {
                self.state = SessionState::Disconnected;
                match e.kind() {
                    io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::UnexpectedEof => Err(QueryError::Closed),
                    _ => Err(QueryError::Connect(connect_cause(&e))),
                }
            }
        }
    }

    /// Write a command and collect up to `lines` response lines.
    ///
    /// The remote answers a failed command with only its error line, so a
    /// response timeout after at least one line ends the response
    /// normally; a timeout before any line is a [`QueryError::ResponseTimeout`].
    pub async fn send_command(
        &mut self,
        line: &str,
        lines: usize,
    ) -> Result<Vec<String>, QueryError> {
        log::debug!("Sending command: {line}");
        self.write_line(line).await?;

        let mut response = Vec::with_capacity(lines);
        for _ in 0..lines {
            match self.read_line(self.config.response_timeout).await? {
                ReadOutcome::Line(line) => response.push(line),
                ReadOutcome::Timeout if response.is_empty() => {
                    return Err(QueryError::ResponseTimeout)
                }
                ReadOutcome::Timeout => break,
            }
        }
        Ok(response)
    }

    /// Fire a low-cost command to keep the transport from idling out.
    ///
    /// Write-only by design: on an event-dedicated session the response
    /// lines surface in the listener loop and are dropped there, so a
    /// keep-alive can never swallow a pushed event. Failure is reported,
    /// never silently retried; the caller decides whether to reconnect.
    pub async fn keep_alive(&mut self) -> Result<(), QueryError> {
        log::debug!("Sending keep-alive request");
        match self.transport.write_line("whoami").await {
            Ok(()) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                log::error!("Keep-alive request failed: {e}");
                self.state = SessionState::Disconnected;
                Err(QueryError::Send(format!("keep-alive failed: {e}")))
            }
        }
    }
}
