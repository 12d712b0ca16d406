//! Event listener loop for one query session.
//!
//! The listener owns its session exclusively and dedicates it to the
//! event stream: after registering the configured notifications it sits
//! in a bounded-read loop, forwarding every parsed event to the router.
//! Idle-window timeouts become keep-alive pings; malformed lines are
//! logged and dropped (one bad line must never take the stream down);
//! transport loss terminates the loop and is reported to the owning
//! supervisor, which decides about reconnecting.

// Rust guideline compliant 2025-01

use std::time::Duration;
use tokio::sync::watch;

use crate::codec::{self, Value};
use crate::router::Router;
use crate::session::{QueryError, ReadOutcome, Session};
use crate::transport::Transport;

/// Listener configuration, owned copies of the relevant config values.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Event names to register for.
    pub events: Vec<String>,
    /// Server connection handle to register on (0 = all tabs).
    pub schandlerid: i64,
    /// Idle window before a keep-alive is sent.
    pub idle_timeout: Duration,
}

/// Reads the event stream of one session and feeds the router.
#[derive(Debug)]
pub struct EventListener<T: Transport> {
    session: Session<T>,
    config: ListenerConfig,
    router: Router,
    shutdown: watch::Receiver<bool>,
}

impl<T: Transport> EventListener<T> {
    /// Bind a listener to an authenticated session.
    pub fn new(
        session: Session<T>,
        config: ListenerConfig,
        router: Router,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            config,
            router,
            shutdown,
        }
    }

    /// Register events and run the listen loop.
    ///
    /// Returns `Ok(())` only on requested shutdown (after best-effort
    /// unregistration).
    ///
    /// # Errors
    ///
    /// [`QueryError::Registration`] if every registration failed;
    /// connection-level errors from the loop, reported upward for the
    /// supervisor's reconnect policy.
    pub async fn run(mut self) -> Result<(), QueryError> {
        let registered = self.register().await?;
        log::info!(
            "Listening for events ({registered}/{} registered)",
            self.config.events.len()
        );

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                self.unregister().await;
                return Ok(());
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.unregister().await;
                        return Ok(());
                    }
                }
                outcome = self.session.read_line(self.config.idle_timeout) => {
                    match outcome {
                        Ok(ReadOutcome::Line(line)) => self.handle_line(&line).await,
                        Ok(ReadOutcome::Timeout) => {
                            self.session.keep_alive().await?;
                        }
                        Err(e) => {
                            log::error!("Lost query connection: {e}");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Parse one line and forward it; parse failures are not fatal.
    async fn handle_line(&self, line: &str) {
        match codec::parse_event(line) {
            Ok(event) => {
                log::debug!("Received event {:?}", event.name);
                self.router.route(event).await;
            }
            Err(e) => {
                // Keep-alive responses and other non-event lines land
                // here; the stream continues regardless.
                log::debug!("Dropping unparseable line: {e}");
            }
        }
    }

    /// Register every configured event.
    ///
    /// A single failed registration is logged and skipped -- that event
    /// is simply never delivered. Returns how many registrations
    /// succeeded.
    ///
    /// # Errors
    ///
    /// [`QueryError::Registration`] when no registration succeeded (the
    /// listener would be deaf); connection-level errors propagate.
    async fn register(&mut self) -> Result<usize, QueryError> {
        if self.config.events.is_empty() {
            return Err(QueryError::Registration("no events configured".to_string()));
        }

        let mut registered = 0;
        for event in self.config.events.clone() {
            log::debug!("Registering for event {event:?}");
            let command = codec::format_command(
                "clientnotifyregister",
                &[
                    ("schandlerid", Value::Int(self.config.schandlerid)),
                    ("event", Value::Text(event.clone())),
                ],
            );
            match self.session.send_command(&command, 1).await {
                Ok(lines) => match lines.first().map(|l| codec::parse_error(l)) {
                    Some(Ok(status)) if status.ok() => {
                        log::info!("Registered for event {event:?}");
                        registered += 1;
                    }
                    Some(Ok(status)) => {
                        log::warn!(
                            "Registration for event {event:?} failed: id={} msg={}",
                            status.id,
                            status.msg
                        );
                    }
                    Some(Err(e)) => {
                        log::warn!("Registration for event {event:?} got odd reply: {e}");
                    }
                    None => {
                        log::warn!("Registration for event {event:?} got no reply");
                    }
                },
                Err(QueryError::ResponseTimeout) => {
                    log::warn!("Registration for event {event:?} timed out");
                }
                Err(e) => return Err(e),
            }
        }

        if registered == 0 {
            return Err(QueryError::Registration(format!(
                "all {} event registrations failed",
                self.config.events.len()
            )));
        }
        Ok(registered)
    }

    /// Best-effort unregistration on shutdown.
    async fn unregister(&mut self) {
        log::debug!("Unregistering from event notifications");
        if let Err(e) = self.session.send_command("clientnotifyunregister", 1).await {
            log::debug!("Event unregistration failed: {e}");
        }
    }
}
