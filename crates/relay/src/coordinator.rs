//! The coordinator: the single owner of the connection registry.
//!
//! Three queues feed one loop. Registrations are drained before
//! unregistrations, and both before broadcasts, so a connection that moved
//! and then sent a message is already in its new conversation when the
//! message fans out. A long run of control events yields to one waiting
//! broadcast every `CONTROL_BURST` events. Persistence runs inline on the
//! loop, which keeps broadcasts strictly in submission order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use agora_config::RelayConfig;
use agora_database::ConversationKind;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::protocol::{DeliveredMessage, ServerFrame};
use crate::registry::{ConnectionId, MoveOutcome, OutboundSender, Registry, RegistrySnapshot};
use crate::store::RelayStore;

/// Consecutive registrations and unregistrations handled before a waiting
/// broadcast is let through.
const CONTROL_BURST: usize = 32;

/// A freshly accepted connection.
pub struct NewConnection {
    pub id: ConnectionId,
    pub user_id: i64,
    pub conversation_id: i64,
    pub outbound: OutboundSender,
}

/// A chat message accepted from a client, not yet persisted.
#[derive(Debug, Clone)]
pub struct ChatSubmission {
    pub conversation_id: i64,
    pub kind: ConversationKind,
    pub sender_id: i64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

enum Registration {
    Connect(NewConnection),
    Move {
        id: ConnectionId,
        conversation_id: i64,
    },
    Inspect(oneshot::Sender<RegistrySnapshot>),
}

enum Broadcast {
    Chat(ChatSubmission),
    Publish {
        conversation_id: i64,
        frame: ServerFrame,
    },
}

enum Event {
    Register(Registration),
    Unregister(ConnectionId),
    Broadcast(Broadcast),
}

impl Event {
    fn kind(&self) -> &'static str {
        match self {
            Event::Register(Registration::Connect(_)) => "connect",
            Event::Register(Registration::Move { .. }) => "register",
            Event::Register(Registration::Inspect(_)) => "inspect",
            Event::Unregister(_) => "unregister",
            Event::Broadcast(Broadcast::Chat(_)) => "chat",
            Event::Broadcast(Broadcast::Publish { .. }) => "publish",
        }
    }
}

/// Cloneable entry point to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Broadcast>,
}

impl CoordinatorHandle {
    /// Admit a new connection; it is acknowledged with `connected`.
    pub async fn connect(&self, connection: NewConnection) -> RelayResult<()> {
        self.register_tx
            .send(Registration::Connect(connection))
            .await
            .map_err(|_| RelayError::CoordinatorUnavailable)
    }

    /// Move a connection to `conversation_id`; it is acknowledged with
    /// `registered`. Access must already have been checked.
    pub async fn register(&self, id: ConnectionId, conversation_id: i64) -> RelayResult<()> {
        self.register_tx
            .send(Registration::Move {
                id,
                conversation_id,
            })
            .await
            .map_err(|_| RelayError::CoordinatorUnavailable)
    }

    /// Remove a connection. Safe to call more than once.
    pub async fn unregister(&self, id: ConnectionId) -> RelayResult<()> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| RelayError::CoordinatorUnavailable)
    }

    /// Persist a chat message, then deliver it to the conversation.
    pub async fn submit_broadcast(&self, submission: ChatSubmission) -> RelayResult<()> {
        self.broadcast_tx
            .send(Broadcast::Chat(submission))
            .await
            .map_err(|_| RelayError::CoordinatorUnavailable)
    }

    /// Deliver an already-built frame to a conversation without persisting it.
    pub async fn publish(&self, conversation_id: i64, frame: ServerFrame) -> RelayResult<()> {
        self.broadcast_tx
            .send(Broadcast::Publish {
                conversation_id,
                frame,
            })
            .await
            .map_err(|_| RelayError::CoordinatorUnavailable)
    }

    /// Read the registry through the coordinator, ordered after every
    /// registration already queued.
    pub async fn snapshot(&self) -> RelayResult<RegistrySnapshot> {
        let (reply, response) = oneshot::channel();
        self.register_tx
            .send(Registration::Inspect(reply))
            .await
            .map_err(|_| RelayError::CoordinatorUnavailable)?;
        response.await.map_err(|_| RelayError::CoordinatorUnavailable)
    }
}

pub struct Coordinator {
    store: Arc<dyn RelayStore>,
    registry: Mutex<Registry>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn RelayStore>, config: &RelayConfig) -> (Self, CoordinatorHandle) {
        let (register_tx, register_rx) = mpsc::channel(config.control_queue_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.control_queue_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue_capacity);
        let handle = CoordinatorHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
        };

        let coordinator = Self {
            store,
            registry: Mutex::new(Registry::new()),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };

        (coordinator, handle)
    }

    /// Start the loop on the runtime. It stops once every handle is dropped.
    pub fn spawn(store: Arc<dyn RelayStore>, config: &RelayConfig) -> (CoordinatorHandle, JoinHandle<()>) {
        let (coordinator, handle) = Self::new(store, config);
        let task = tokio::spawn(coordinator.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!("relay coordinator started");

        let mut control_streak = 0;
        loop {
            // After CONTROL_BURST control events in a row, a waiting broadcast goes first.
            let overdue = if control_streak >= CONTROL_BURST {
                self.broadcast_rx.try_recv().ok().map(Event::Broadcast)
            } else {
                None
            };

            let event = match overdue {
                Some(event) => event,
                None => tokio::select! {
                    biased;
                    Some(registration) = self.register_rx.recv() => Event::Register(registration),
                    Some(id) = self.unregister_rx.recv() => Event::Unregister(id),
                    Some(broadcast) = self.broadcast_rx.recv() => Event::Broadcast(broadcast),
                    else => break,
                },
            };

            control_streak = match event {
                Event::Broadcast(_) => 0,
                _ => control_streak + 1,
            };

            let kind = event.kind();
            if let Err(panic) = AssertUnwindSafe(self.handle(event)).catch_unwind().await {
                error!(
                    event = kind,
                    panic = %panic_message(panic.as_ref()),
                    "coordinator event handler panicked, continuing"
                );
            }
        }

        info!("relay coordinator stopped");
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Register(Registration::Connect(connection)) => self.on_connect(connection).await,
            Event::Register(Registration::Move {
                id,
                conversation_id,
            }) => self.on_register(id, conversation_id).await,
            Event::Register(Registration::Inspect(reply)) => {
                let snapshot = self.registry.lock().await.snapshot();
                let _ = reply.send(snapshot);
            }
            Event::Unregister(id) => self.on_unregister(id).await,
            Event::Broadcast(Broadcast::Chat(submission)) => self.on_chat(submission).await,
            Event::Broadcast(Broadcast::Publish {
                conversation_id,
                frame,
            }) => self.on_publish(conversation_id, frame).await,
        }
    }

    async fn on_connect(&self, connection: NewConnection) {
        let NewConnection {
            id,
            user_id,
            conversation_id,
            outbound,
        } = connection;

        let mut registry = self.registry.lock().await;
        if !registry.insert(id, user_id, conversation_id, outbound) {
            warn!(conn_id = %id, user_id, "connection already registered");
            return;
        }
        registry.offer(
            id,
            ServerFrame::Connected {
                user_id,
                conversation_id,
            },
        );
        debug!(conn_id = %id, user_id, conversation_id, connections = registry.len(), "connection registered");
    }

    async fn on_register(&self, id: ConnectionId, conversation_id: i64) {
        let mut registry = self.registry.lock().await;
        match registry.move_to(id, conversation_id) {
            MoveOutcome::UnknownConnection => {
                debug!(conn_id = %id, conversation_id, "register for unknown connection ignored");
                return;
            }
            MoveOutcome::Unchanged => {
                debug!(conn_id = %id, conversation_id, "connection already in conversation");
            }
            MoveOutcome::Moved { from } => {
                debug!(conn_id = %id, from, to = conversation_id, "connection moved");
            }
        }
        registry.offer(id, ServerFrame::Registered { conversation_id });
    }

    async fn on_unregister(&self, id: ConnectionId) {
        match self.registry.lock().await.remove(id) {
            Some((user_id, conversation_id)) => {
                debug!(conn_id = %id, user_id, conversation_id, "connection unregistered");
            }
            None => debug!(conn_id = %id, "connection already unregistered"),
        }
    }

    async fn on_chat(&self, submission: ChatSubmission) {
        let ChatSubmission {
            conversation_id,
            kind,
            sender_id,
            content,
            timestamp,
        } = submission;

        let persisted = match kind {
            ConversationKind::Direct => {
                self.store
                    .create_message(conversation_id, sender_id, &content)
                    .await
            }
            ConversationKind::Group { group_id } => {
                self.store
                    .create_group_message(group_id, sender_id, &content)
                    .await
            }
        };
        let message_id = match persisted {
            Ok(id) => id,
            Err(e) => {
                error!(conversation_id, sender_id, error = %e, "failed to persist message, dropping it");
                return;
            }
        };

        let sender = match self.store.get_user(sender_id).await {
            Ok(user) => user,
            Err(e) => {
                error!(message_id, sender_id, error = %e, "failed to load sender, message not delivered");
                return;
            }
        };
        let sender_name = sender.display_name();

        // Only direct conversations notify absent participants.
        let participants = match kind {
            ConversationKind::Direct => match self.store.get_participants(conversation_id).await {
                Ok(participants) => participants,
                Err(e) => {
                    warn!(message_id, conversation_id, error = %e, "participant lookup failed, skipping notifications");
                    Vec::new()
                }
            },
            ConversationKind::Group { .. } => Vec::new(),
        };

        let frame = ServerFrame::ChatMessage(DeliveredMessage {
            id: message_id,
            conversation_id,
            sender_id,
            sender_name: sender_name.clone(),
            sender_avatar: sender.avatar,
            content,
            timestamp,
        });

        let (delivery, absent) = {
            let mut registry = self.registry.lock().await;
            let delivery = registry.deliver(conversation_id, &frame);
            let absent: Vec<i64> = participants
                .iter()
                .map(|p| p.user_id)
                .filter(|user_id| *user_id != sender_id)
                .filter(|user_id| !registry.is_present(*user_id, conversation_id))
                .collect();
            (delivery, absent)
        };

        info!(
            message_id,
            conversation_id,
            kind = kind.as_str(),
            sender_id,
            delivered = delivery.delivered,
            dropped = delivery.dropped.len(),
            "message delivered"
        );

        for receiver_id in absent {
            if let Err(e) = self
                .store
                .create_message_notification(receiver_id, sender_id, conversation_id, &sender_name)
                .await
            {
                warn!(message_id, receiver_id, error = %e, "failed to create message notification");
            }
        }
    }

    async fn on_publish(&self, conversation_id: i64, frame: ServerFrame) {
        let kind = frame.kind();
        let delivery = self.registry.lock().await.deliver(conversation_id, &frame);
        debug!(
            conversation_id,
            frame = kind,
            delivered = delivery.delivered,
            dropped = delivery.dropped.len(),
            "event published"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
