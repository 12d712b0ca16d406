//! Outbound responder worker.
//!
//! Consumes the router's dedicated outbound queue and answers failed
//! chat-command lookups over its own command session, so reply traffic
//! never touches the event-dedicated transport. Send failures are
//! logged and the job dropped; the session is reopened lazily for the
//! next job.

// Rust guideline compliant 2025-01

use tokio::sync::{mpsc, watch};

use crate::codec::{self, Value};
use crate::router::Job;
use crate::session::{Session, SessionConfig};
use crate::transport::TcpTransport;

/// Background worker answering [`Job::Response`] jobs.
#[derive(Debug)]
pub struct Responder {
    session_config: SessionConfig,
    outbound_rx: mpsc::Receiver<Job>,
    shutdown: watch::Receiver<bool>,
}

impl Responder {
    /// Create a responder; the command session opens lazily on first use.
    pub fn new(
        session_config: SessionConfig,
        outbound_rx: mpsc::Receiver<Job>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_config,
            outbound_rx,
            shutdown,
        }
    }

    /// Consume jobs until shutdown or until the queue closes.
    pub async fn run(mut self) {
        log::info!("Responder worker started");
        let mut session: Option<Session<TcpTransport>> = None;
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                job = self.outbound_rx.recv() => {
                    match job {
                        Some(job) => Self::handle_job(&self.session_config, &mut session, job).await,
                        None => {
                            log::info!("Responder worker: queue closed");
                            return;
                        }
                    }
                }
            }
        }

        // Drain whatever is already queued before going away, but do not
        // reopen a session for it.
        while let Ok(job) = self.outbound_rx.try_recv() {
            if session.is_some() {
                Self::handle_job(&self.session_config, &mut session, job).await;
            }
        }
        log::info!("Responder worker shutting down");
    }

    /// Answer one job; failures are logged, never fatal to the worker.
    async fn handle_job(
        config: &SessionConfig,
        session: &mut Option<Session<TcpTransport>>,
        job: Job,
    ) {
        let Some(command) = reply_command(&job) else {
            log::warn!("Responder worker: unanswerable job, dropping");
            return;
        };

        if session.is_none() {
            match Session::connect(config).await {
                Ok(s) => *session = Some(s),
                Err(e) => {
                    log::warn!("Responder worker: could not open session: {e}");
                    return;
                }
            }
        }

        if let Some(s) = session.as_mut() {
            match s.send_command(&command, 1).await {
                Ok(lines) => match lines.first().map(|l| codec::parse_error(l)) {
                    Some(Ok(status)) if status.ok() => {}
                    Some(Ok(status)) => {
                        log::warn!(
                            "Responder worker: reply rejected: id={} msg={}",
                            status.id,
                            status.msg
                        );
                    }
                    _ => log::warn!("Responder worker: odd reply to sendtextmessage"),
                },
                Err(e) => {
                    log::warn!("Responder worker: send failed: {e}");
                    // Presume the session dead; reopen for the next job.
                    *session = None;
                }
            }
        }
    }
}

/// Build the `sendtextmessage` line answering a response job.
///
/// Replies mirror the origin: same target mode, addressed at the
/// invoker. Returns `None` when the origin event lacks an invoker id
/// (nothing to answer) or the job is not a response.
#[must_use]
pub fn reply_command(job: &Job) -> Option<String> {
    let Job::Response { event, text } = job else {
        return None;
    };
    let row = event.rows.first()?;
    let invoker = row.get_int("invokerid")?;
    let targetmode = row.get_int("targetmode").unwrap_or(1);

    Some(codec::format_command(
        "sendtextmessage",
        &[
            ("targetmode", Value::Int(targetmode)),
            ("target", Value::Int(invoker)),
            ("msg", Value::Text(codec::escape_text(text))),
        ],
    ))
}
