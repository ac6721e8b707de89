//! One WebSocket connection: an inbound loop and an outbound loop.
//!
//! The outbound loop is the only writer of application frames. It drains the
//! connection's queue, coalescing whatever is already waiting into a single
//! flush, and pings the peer on every keepalive tick. The inbound loop reads
//! under a deadline that any received frame renews. When either loop ends the
//! other is aborted and the connection is unregistered. The read deadline
//! never extends past the token's expiry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::access::{authorize, can_access};
use crate::claims::Claims;
use crate::coordinator::{ChatSubmission, NewConnection};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{ChatFrame, ClientFrame, ServerFrame, GLOBAL_CONVERSATION};
use crate::registry::ConnectionId;
use crate::state::RelayState;

type SharedWriter<S> = Arc<Mutex<S>>;

const MAX_BATCH: usize = 64;

/// Run a connection from accept to teardown.
///
/// The requested initial conversation is honoured only for participants;
/// anyone else starts in the global conversation.
pub async fn serve(socket: WebSocket, state: RelayState, claims: Claims, requested_conversation: i64) {
    let conn_id = ConnectionId::new();
    let user_id = claims.user_id;

    let conversation_id = initial_conversation(&state, user_id, requested_conversation).await;

    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let replies = outbound_tx.downgrade();

    if let Err(e) = state
        .coordinator
        .connect(NewConnection {
            id: conn_id,
            user_id,
            conversation_id,
            outbound: outbound_tx,
        })
        .await
    {
        warn!(conn_id = %conn_id, user_id, error = %e, "rejecting connection");
        return;
    }

    info!(conn_id = %conn_id, user_id, conversation_id, "websocket connected");

    let (sink, stream) = socket.split();
    let writer = Arc::new(Mutex::new(sink));

    let mut outbound_task = tokio::spawn(write_loop(
        conn_id,
        writer.clone(),
        outbound_rx,
        state.config.keepalive_interval(),
        state.config.write_wait(),
    ));

    let inbound = Inbound {
        conn_id,
        claims,
        conversation_id,
        replies,
        state: state.clone(),
    };
    let mut inbound_task = tokio::spawn(inbound.run(stream));

    let reason = tokio::select! {
        result = &mut inbound_task => {
            outbound_task.abort();
            result
        },
        result = &mut outbound_task => {
            inbound_task.abort();
            result
        },
    };

    match reason {
        Ok(Ok(())) => debug!(conn_id = %conn_id, "connection loop finished"),
        Ok(Err(e)) => debug!(conn_id = %conn_id, error = %e, "connection loop ended with error"),
        Err(e) => warn!(conn_id = %conn_id, error = %e, "connection task failed"),
    }

    if let Err(e) = state.coordinator.unregister(conn_id).await {
        debug!(conn_id = %conn_id, error = %e, "unregister skipped");
    }

    let _ = writer.lock().await.close().await;
    info!(conn_id = %conn_id, user_id, "websocket disconnected");
}

async fn initial_conversation(state: &RelayState, user_id: i64, requested: i64) -> i64 {
    if requested == GLOBAL_CONVERSATION {
        return GLOBAL_CONVERSATION;
    }
    if can_access(state.store.as_ref(), user_id, requested).await {
        requested
    } else {
        warn!(user_id, conversation_id = requested, "initial conversation denied, starting in global");
        GLOBAL_CONVERSATION
    }
}

async fn write_loop<S>(
    conn_id: ConnectionId,
    writer: SharedWriter<S>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    keepalive: Duration,
    write_wait: Duration,
) -> RelayResult<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(first) = next else {
                    debug!(conn_id = %conn_id, "outbound queue closed");
                    let _ = timeout(write_wait, async {
                        writer.lock().await.close().await
                    })
                    .await;
                    return Ok(());
                };

                let mut batch = vec![first];
                while batch.len() < MAX_BATCH {
                    match outbound.try_recv() {
                        Ok(frame) => batch.push(frame),
                        Err(_) => break,
                    }
                }

                timeout(write_wait, write_batch(conn_id, &writer, batch))
                    .await
                    .map_err(|_| RelayError::Transport("write deadline exceeded".into()))??;
            }
            _ = ticker.tick() => {
                timeout(write_wait, async {
                    writer.lock().await.send(Message::Ping(Vec::new())).await
                })
                .await
                .map_err(|_| RelayError::Transport("ping deadline exceeded".into()))??;
            }
        }
    }
}

async fn write_batch<S>(
    conn_id: ConnectionId,
    writer: &SharedWriter<S>,
    batch: Vec<ServerFrame>,
) -> RelayResult<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut sink = writer.lock().await;
    let count = batch.len();

    for frame in batch {
        match frame.encode() {
            Ok(text) => sink.feed(Message::Text(text)).await?,
            Err(e) => warn!(conn_id = %conn_id, frame = frame.kind(), error = %e, "dropping unencodable frame"),
        }
    }
    sink.flush().await?;

    if count > 1 {
        debug!(conn_id = %conn_id, count, "flushed coalesced frames");
    }
    Ok(())
}

struct Inbound {
    conn_id: ConnectionId,
    claims: Claims,
    conversation_id: i64,
    replies: mpsc::WeakSender<ServerFrame>,
    state: RelayState,
}

impl Inbound {
    async fn run(mut self, mut stream: SplitStream<WebSocket>) -> RelayResult<()> {
        let pong_wait = self.state.config.pong_wait();
        let token_deadline = instant_at(self.claims.expires_at);
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let message = match timeout_at(deadline.min(token_deadline), stream.next()).await {
                Err(_) if Instant::now() >= token_deadline => {
                    info!(conn_id = %self.conn_id, user_id = self.claims.user_id, "token expired, closing connection");
                    return Err(RelayError::Unauthenticated("token expired".into()));
                }
                Err(_) => return Err(RelayError::Transport("read deadline exceeded".into())),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(message))) => message,
            };
            deadline = Instant::now() + pong_wait;

            let frame = match message {
                Message::Text(text) => ClientFrame::decode(text.as_bytes())?,
                Message::Binary(bytes) => ClientFrame::decode(&bytes)?,
                Message::Pong(_) | Message::Ping(_) => continue,
                Message::Close(_) => return Ok(()),
            };

            self.dispatch(frame).await?;
        }
    }

    /// Handle one decoded frame. A stopped coordinator or a full outbound
    /// queue is fatal.
    async fn dispatch(&mut self, frame: ClientFrame) -> RelayResult<()> {
        match frame {
            ClientFrame::Register { conversation_id } => self.register(conversation_id).await,
            ClientFrame::ChatMessage(chat) => self.chat(chat).await,
            ClientFrame::Ping => self.reply(ServerFrame::Pong),
            ClientFrame::Pong => Ok(()),
            ClientFrame::Unknown => {
                debug!(conn_id = %self.conn_id, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    async fn register(&mut self, conversation_id: i64) -> RelayResult<()> {
        let user_id = self.claims.user_id;

        if conversation_id != GLOBAL_CONVERSATION {
            if let Err(e) = authorize(self.state.store.as_ref(), user_id, conversation_id).await {
                warn!(conn_id = %self.conn_id, error = %e, "register denied");
                return Ok(());
            }
        }

        self.state
            .coordinator
            .register(self.conn_id, conversation_id)
            .await?;
        self.conversation_id = conversation_id;
        Ok(())
    }

    async fn chat(&mut self, chat: ChatFrame) -> RelayResult<()> {
        let user_id = self.claims.user_id;

        if chat.sender_id.is_some_and(|declared| declared != user_id) {
            debug!(conn_id = %self.conn_id, user_id, "ignoring client-declared sender");
        }

        let conversation_id = chat
            .conversation_id
            .filter(|id| *id != GLOBAL_CONVERSATION)
            .unwrap_or(self.conversation_id);

        if conversation_id == GLOBAL_CONVERSATION {
            debug!(conn_id = %self.conn_id, "chat message without a conversation ignored");
            return Ok(());
        }
        if chat.content.is_empty() {
            debug!(conn_id = %self.conn_id, conversation_id, "empty chat message ignored");
            return Ok(());
        }
        if let Err(e) = authorize(self.state.store.as_ref(), user_id, conversation_id).await {
            warn!(conn_id = %self.conn_id, error = %e, "chat message denied");
            return Ok(());
        }

        let conversation = match self.state.store.get_conversation(conversation_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                warn!(conn_id = %self.conn_id, conversation_id, "chat message for missing conversation");
                return Ok(());
            }
            Err(e) => {
                warn!(conn_id = %self.conn_id, conversation_id, error = %e, "conversation lookup failed");
                return Ok(());
            }
        };

        self.state
            .coordinator
            .submit_broadcast(ChatSubmission {
                conversation_id,
                kind: conversation.kind(),
                sender_id: user_id,
                content: chat.content,
                timestamp: chat.timestamp.unwrap_or_else(Utc::now),
            })
            .await
    }

    /// Queue a direct reply. A full queue ends the connection, as it does
    /// for fan-out; a closed one means teardown is already under way.
    fn reply(&self, frame: ServerFrame) -> RelayResult<()> {
        let Some(outbound) = self.replies.upgrade() else {
            return Ok(());
        };
        match outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.conn_id, "outbound queue full, disconnecting");
                Err(RelayError::Transport("outbound queue full".into()))
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.conn_id, "reply dropped, outbound queue closed");
                Ok(())
            }
        }
    }
}

fn instant_at(at: DateTime<Utc>) -> Instant {
    let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + remaining
}
