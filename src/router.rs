//! Event routing to module work queues.
//!
//! The router is the last stage of the inbound pipeline: it receives
//! parsed events in dispatcher order and decides which of the bot's
//! module queues gets a [`Job`]. Chat messages carrying the command
//! prefix are looked up in the command table; everything else goes
//! through the static event table. Destinations form a closed set
//! ([`ModuleId`]) bound to explicit queue handles at construction, so
//! there is no stringly-typed dispatch at runtime.
//!
//! Routing a single event is synchronous with respect to ordering: the
//! router never reorders, and blocks only on a full destination queue
//! (bounded-queue backpressure, accepted by design).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::codec::{self, Event, CHAT_MESSAGE_EVENT};

/// Reply sent when a chat command has no table entry.
const COMMAND_NOT_FOUND: &str = "Command not found.";

/// The closed set of job-consuming modules.
///
/// Known at configuration time; config files name these in lower case
/// and unknown names fail deserialization at startup instead of
/// surfacing as dead-letter strings at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleId {
    /// Client/channel manipulation (moves, kicks).
    Control,
    /// Chat interaction commands.
    Chat,
    /// Join/leave bookkeeping.
    Presence,
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Chat => write!(f, "chat"),
            Self::Presence => write!(f, "presence"),
        }
    }
}

/// Where a job was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// One of the module queues.
    Module(ModuleId),
    /// The dedicated outbound reply queue.
    Outbound,
}

/// A unit of routed work handed to a consumer queue.
///
/// Owned by the receiving consumer once enqueued; the router keeps
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// A routed server event or chat command.
    Event {
        /// Event name, or the bare command word for chat commands.
        name: String,
        /// The event that produced this job.
        event: Event,
        /// Queue this job was dispatched to.
        destination: Destination,
    },
    /// An outbound chat reply (failed command lookup).
    Response {
        /// The chat event being answered.
        event: Event,
        /// Reply text, unescaped.
        text: String,
    },
}

/// Static routing configuration.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Prefix marking a chat message as a command (`!`).
    pub command_prefix: String,
    /// Event name to destination module(s). One, several (broadcast), or
    /// absent (dropped).
    pub event_routes: HashMap<String, Vec<ModuleId>>,
    /// Chat command word to owning module.
    pub command_routes: HashMap<String, ModuleId>,
}

/// Extract a chat command from an unescaped message body.
///
/// Returns the command word and its whitespace-separated arguments when
/// the body starts with `prefix` immediately followed by a word token;
/// `None` for ordinary chat.
#[must_use]
pub fn parse_chat_command(body: &str, prefix: &str) -> Option<(String, Vec<String>)> {
    let rest = body.strip_prefix(prefix)?;
    let word: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if word.is_empty() {
        return None;
    }
    let args = rest[word.len()..]
        .split_whitespace()
        .map(str::to_string)
        .collect();
    Some((word, args))
}

/// Routes parsed events to module queues, in arrival order.
#[derive(Debug, Clone)]
pub struct Router {
    table: RoutingTable,
    queues: HashMap<ModuleId, mpsc::Sender<Job>>,
    outbound: mpsc::Sender<Job>,
}

impl Router {
    /// Bind a routing table to its queue handles.
    ///
    /// # Errors
    ///
    /// Fails if the table references a module that has no bound queue;
    /// this is a wiring bug caught at startup, not at dispatch time.
    pub fn new(
        table: RoutingTable,
        queues: HashMap<ModuleId, mpsc::Sender<Job>>,
        outbound: mpsc::Sender<Job>,
    ) -> anyhow::Result<Self> {
        for module in table
            .event_routes
            .values()
            .flatten()
            .chain(table.command_routes.values())
        {
            if !queues.contains_key(module) {
                anyhow::bail!("routing table references module {module} with no bound queue");
            }
        }
        Ok(Self {
            table,
            queues,
            outbound,
        })
    }

    /// Route one event. Blocks only on destination-queue backpressure.
    ///
    /// Unknown event names and unroutable chat are never errors; they
    /// are logged at low severity and dropped.
    pub async fn route(&self, event: Event) {
        if event.name == CHAT_MESSAGE_EVENT {
            self.route_chat(event).await;
        } else {
            self.route_event(event).await;
        }
    }

    /// Handle a chat-message notification.
    async fn route_chat(&self, event: Event) {
        let Some(body) = event.rows.first().and_then(|row| row.get("msg")) else {
            log::debug!("Chat notification without msg attribute; dropping");
            return;
        };
        let body = codec::unescape_text(&body.to_string());

        let Some((command, _args)) = parse_chat_command(&body, &self.table.command_prefix)
        else {
            // Ordinary chat is expected and common.
            log::debug!("Ignoring chat message: {body:?}");
            return;
        };

        match self.table.command_routes.get(&command) {
            Some(module) => {
                log::debug!("Routing command {command:?} to module {module}");
                self.enqueue(
                    *module,
                    Job::Event {
                        name: command,
                        event,
                        destination: Destination::Module(*module),
                    },
                )
                .await;
            }
            None => {
                log::debug!("Received invalid command {command:?}");
                let job = Job::Response {
                    event,
                    text: COMMAND_NOT_FOUND.to_string(),
                };
                if self.outbound.send(job).await.is_err() {
                    log::error!("Outbound queue closed; dropping reply");
                }
            }
        }
    }

    /// Handle a server-wide event via the static event table.
    async fn route_event(&self, event: Event) {
        let Some(modules) = self.table.event_routes.get(&event.name) else {
            log::debug!("Event not handled: {:?}", event.name);
            return;
        };
        if modules.is_empty() {
            log::debug!("Event {:?} routed to no modules", event.name);
            return;
        }
        for module in modules {
            self.enqueue(
                *module,
                Job::Event {
                    name: event.name.clone(),
                    event: event.clone(),
                    destination: Destination::Module(*module),
                },
            )
            .await;
        }
    }

    async fn enqueue(&self, module: ModuleId, job: Job) {
        let Some(queue) = self.queues.get(&module) else {
            // Router::new validated the table, so this means the set of
            // queues changed underneath us.
            log::error!("No queue bound for module {module}; dropping job");
            return;
        };
        if queue.send(job).await.is_err() {
            log::error!("Queue for module {module} closed; dropping job");
        }
    }
}
