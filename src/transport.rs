//! Shared line-stream transport.
//!
//! Thin wrapper around `tokio::net::TcpStream` with `LinesCodec` framing.
//! All protocol consumers in the crate go through the [`Transport`] trait
//! rather than touching the socket directly, so tests can substitute a
//! scripted fake and the session never depends on a concrete stream.
//!
//! A single [`TcpTransport::open`] function handles address resolution,
//! the connect timeout, and error-cause mapping. By centralizing the
//! connection logic, future enhancements (TLS, keep-alive socket options,
//! metrics) automatically apply to all consumers.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::session::{ConnectCause, QueryError};

/// A reliable, ordered stream of protocol lines.
///
/// `next_line` returns `Ok(None)` on clean remote close; both methods
/// fail promptly once the underlying stream is gone, so owning loops can
/// react without waiting out OS-level timeouts.
#[async_trait]
pub trait Transport: Send {
    /// Write one line; the implementation appends the `\n` delimiter.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Read the next full line, without its delimiter.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// TCP transport with newline framing.
#[derive(Debug)]
pub struct TcpTransport {
    framed: Framed<TcpStream, LinesCodec>,
}

impl TcpTransport {
    /// Connect to `host:port` within `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Connect`] carrying the specific cause
    /// (refused / unreachable / timeout / closed).
    pub async fn open(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, QueryError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| QueryError::Connect(ConnectCause::Timeout))?
            .map_err(|e| QueryError::Connect(connect_cause(&e)))?;

        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new()),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.framed.send(line).await.map_err(into_io_error)
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(into_io_error(e)),
        }
    }
}

/// Map an I/O error from a connect attempt to its cause.
pub(crate) fn connect_cause(e: &io::Error) -> ConnectCause {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ConnectCause::Refused,
        io::ErrorKind::TimedOut => ConnectCause::Timeout,
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ConnectCause::Closed,
        // Address resolution failures and routing errors land here.
        _ => ConnectCause::Unreachable,
    }
}

fn into_io_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line length limit exceeded")
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_refused_port_reports_cause() {
        // Port 1 on loopback is essentially never listening.
        let result = TcpTransport::open("127.0.0.1", 1, Duration::from_secs(5)).await;
        match result {
            Err(QueryError::Connect(cause)) => {
                assert!(matches!(
                    cause,
                    ConnectCause::Refused | ConnectCause::Unreachable
                ));
            }
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_unresolvable_host_reports_unreachable() {
        let result =
            TcpTransport::open("nonexistent.invalid", 25639, Duration::from_secs(5)).await;
        match result {
            Err(QueryError::Connect(cause)) => {
                assert!(matches!(
                    cause,
                    ConnectCause::Unreachable | ConnectCause::Timeout
                ));
            }
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_line_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"error id=0 msg=ok\r\n").await.unwrap();
            let mut buf = [0u8; 64];
            use tokio::io::AsyncReadExt;
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let mut transport = TcpTransport::open("127.0.0.1", addr.port(), Duration::from_secs(5))
            .await
            .unwrap();

        transport.write_line("whoami").await.unwrap();
        let line = transport.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("error id=0 msg=ok"));

        let received = server.await.unwrap();
        assert_eq!(received, "whoami\n");
    }

    #[tokio::test]
    async fn test_next_line_reports_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::open("127.0.0.1", addr.port(), Duration::from_secs(5))
            .await
            .unwrap();

        let line = transport.next_line().await.unwrap();
        assert_eq!(line, None);
    }
}
