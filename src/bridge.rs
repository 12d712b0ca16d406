//! Bridge supervisor.
//!
//! Owns the connect/reconnect policy the session itself deliberately
//! does not have: a bounded number of connect attempts with a fixed
//! delay per cycle, jittered exponential backoff between cycles after a
//! lost connection, event re-registration on every reconnect (the
//! listener registers at the start of each run), and shutdown
//! propagation into every sleep.
//!
//! ```text
//! run()
//!   └─ loop: connect (≤ N attempts, fixed delay)
//!        ├─ ok  → EventListener::run()  ── lost → backoff, reconnect
//!        │                              ── shutdown → return Ok
//!        │                              ── registration dead → return Err
//!        ├─ auth rejected → backoff, retry (bounded, never instant)
//!        └─ attempts exhausted → return Err (terminal)
//! ```

// Rust guideline compliant 2025-01

use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::listener::{EventListener, ListenerConfig};
use crate::router::Router;
use crate::session::{ConnectCause, QueryError, Session, SessionConfig};
use crate::transport::TcpTransport;

/// Reconnection backoff configuration.
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

/// Supervises one event-listening connection for its whole lifetime.
#[derive(Debug)]
pub struct Bridge {
    session_config: SessionConfig,
    listener_config: ListenerConfig,
    connect_attempts: u32,
    connect_retry_delay: Duration,
    router: Router,
    shutdown: watch::Receiver<bool>,
}

impl Bridge {
    /// Wire a bridge from loaded configuration.
    pub fn new(config: &Config, router: Router, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            session_config: config.session_config(),
            listener_config: config.listener_config(),
            connect_attempts: config.connect_attempts.max(1),
            connect_retry_delay: Duration::from_secs(config.connect_retry_delay_secs),
            router,
            shutdown,
        }
    }

    /// Run until shutdown or terminal failure.
    ///
    /// # Errors
    ///
    /// Terminal conditions only: a full connect cycle failing
    /// ([`QueryError::Connect`]), repeated auth rejection
    /// ([`QueryError::Auth`]), or a deaf listener
    /// ([`QueryError::Registration`]). Ordinary connection loss is
    /// handled internally by reconnecting.
    pub async fn run(mut self) -> Result<(), QueryError> {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;
        let mut auth_failures: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            match self.connect_with_retries().await {
                Ok(session) => {
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    auth_failures = 0;

                    let listener = EventListener::new(
                        session,
                        self.listener_config.clone(),
                        self.router.clone(),
                        self.shutdown.clone(),
                    );
                    match listener.run().await {
                        Ok(()) => {
                            log::info!("Listener stopped on shutdown request");
                            return Ok(());
                        }
                        Err(e @ QueryError::Registration(_)) => {
                            log::error!("Terminating: {e}");
                            return Err(e);
                        }
                        Err(e) => {
                            log::warn!("Listener terminated: {e}");
                        }
                    }
                }
                Err(QueryError::Auth(msg)) => {
                    // A rejected key rarely fixes itself; retry a bounded
                    // number of times, each after the full backoff sleep.
                    auth_failures += 1;
                    if auth_failures >= self.connect_attempts {
                        log::error!("Authentication rejected {auth_failures} times; giving up");
                        return Err(QueryError::Auth(msg));
                    }
                    log::error!("Authentication rejected: {msg}");
                }
                Err(e) => {
                    log::error!("Could not establish query connection: {e}");
                    return Err(e);
                }
            }

            // Exponential backoff with jitter before the next cycle.
            let jitter_ms = rand::random::<u64>() % 1000;
            let wait = Duration::from_millis(backoff_secs * 1000 + jitter_ms);
            log::info!("Reconnecting in {:.1}s...", wait.as_secs_f32());

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Shutdown during reconnect backoff");
                        return Ok(());
                    }
                }
            }
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }

    /// One connect cycle: up to `connect_attempts` tries, fixed delay.
    ///
    /// Auth rejections abort the cycle immediately (more attempts with
    /// the same key cannot succeed); transport failures burn an attempt
    /// each.
    async fn connect_with_retries(&self) -> Result<Session<TcpTransport>, QueryError> {
        let mut last: Option<QueryError> = None;
        for attempt in 1..=self.connect_attempts {
            log::debug!("Connection attempt {attempt}/{}", self.connect_attempts);
            match Session::connect(&self.session_config).await {
                Ok(session) => return Ok(session),
                Err(e @ QueryError::Auth(_)) => return Err(e),
                Err(e) => {
                    log::warn!("Connection attempt {attempt} failed: {e}");
                    last = Some(e);
                }
            }

            if attempt < self.connect_attempts {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.connect_retry_delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }
        Err(last.unwrap_or(QueryError::Connect(ConnectCause::Timeout)))
    }
}
