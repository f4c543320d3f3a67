use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use natter_core::{CoreError, Services};
use natter_types::api::Claims;
use natter_types::events::{AckOutcome, AckReply, ClientCommand, ClientFrame, ServerEvent};
use natter_types::models::{ChatId, UserId};

use crate::dispatcher::Dispatcher;
use crate::rooms::SessionId;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// How long an unauthenticated socket may take to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle one WebSocket connection.
///
/// `claims` is `Some` when a token was already verified at the HTTP upgrade.
/// Otherwise the first `identify` frame must arrive within the timeout.
pub async fn handle_connection(
    socket: WebSocket,
    services: Services,
    dispatcher: Dispatcher,
    claims: Option<Claims>,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match claims {
        Some(claims) => claims,
        None => match wait_for_identify(&mut receiver, &services).await {
            Some(claims) => claims,
            None => {
                warn!("WebSocket client failed to identify, closing");
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        },
    };

    info!("{} ({}) connected to gateway", claims.username, claims.sub);

    run_connection_loop(sender, receiver, services, dispatcher, claims).await;
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    services: &Services,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame {
                    command: ClientCommand::Identify { token },
                    ..
                }) => return services.identity.verify(&token).ok(),
                _ => debug!("Ignoring frame before identify"),
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    services: Services,
    dispatcher: Dispatcher,
    claims: Claims,
) {
    let (session_id, mut events) = dispatcher.connect(&claims.sub);
    let session = Session {
        id: session_id,
        user_id: claims.sub,
        username: claims.username,
        services,
        dispatcher: dispatcher.clone(),
    };
    let (user_id, username) = (session.user_id.clone(), session.username.clone());

    // Registered before `ready`, so nothing emitted after the client sees
    // `ready` can be missed.
    let ready = ServerEvent::Ready {
        user_id: user_id.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.disconnect(session_id);
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room + personal events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = session.handle_text(text.as_str()).await {
                        session.dispatcher.send_to_session(session.id, reply);
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let left = dispatcher.disconnect(session_id);
    info!(
        "{} ({}) disconnected from gateway ({} rooms left)",
        username,
        user_id,
        left.len()
    );
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.name(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

/// An authenticated socket's identity plus the services it drives.
struct Session {
    id: SessionId,
    user_id: UserId,
    username: String,
    services: Services,
    dispatcher: Dispatcher,
}

impl Session {
    /// Handle one text frame. Returns the ack to send back, if the client
    /// asked for one. Failures never end the session.
    async fn handle_text(&self, text: &str) -> Option<ServerEvent> {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "{} ({}) bad frame: {} -- raw: {}",
                    self.username,
                    self.user_id,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                let ack = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|raw| raw.get("ack").and_then(Value::as_u64))?;
                return Some(ack_reply(
                    ack,
                    Err(CoreError::invalid(format!("Malformed frame: {}", e))),
                ));
            }
        };

        let result = self.handle_command(frame.command).await;
        if let Err(e) = &result {
            match e {
                CoreError::Internal(inner) => {
                    error!("{} ({}) command failed: {:#}", self.username, self.user_id, inner)
                }
                other => debug!("{} ({}) command rejected: {}", self.username, self.user_id, other),
            }
        }

        frame.ack.map(|id| ack_reply(id, result))
    }

    async fn handle_command(&self, command: ClientCommand) -> Result<Value, CoreError> {
        match command {
            ClientCommand::Identify { .. } => {
                debug!("{} ({}) sent identify twice", self.username, self.user_id);
                Ok(Value::Null)
            }

            ClientCommand::JoinChats { chat_ids } => self.join_chats(chat_ids).await,

            ClientCommand::SendMessage {
                chat_id,
                content,
                kind,
            } => {
                if chat_id.trim().is_empty() {
                    return Err(CoreError::invalid("chatId and content are required"));
                }
                let message = self
                    .services
                    .ledger
                    .create_message(&chat_id, &self.user_id, &content, kind.as_deref())
                    .await?;
                serde_json::to_value(&message).map_err(|e| CoreError::Internal(e.into()))
            }

            ClientCommand::TypingStart { chat_id } => {
                let event = ServerEvent::TypingStart {
                    chat_id: chat_id.clone(),
                    user_id: self.user_id.clone(),
                };
                self.relay_typing(&chat_id, event);
                Ok(Value::Null)
            }

            ClientCommand::TypingStop { chat_id } => {
                let event = ServerEvent::TypingStop {
                    chat_id: chat_id.clone(),
                    user_id: self.user_id.clone(),
                };
                self.relay_typing(&chat_id, event);
                Ok(Value::Null)
            }
        }
    }

    /// Only chats the user belongs to are joined; the rest are reported back.
    async fn join_chats(&self, chat_ids: Vec<ChatId>) -> Result<Value, CoreError> {
        let mut joined: Vec<ChatId> = Vec::new();
        let mut rejected: Vec<ChatId> = Vec::new();

        for chat_id in chat_ids {
            if joined.contains(&chat_id) || rejected.contains(&chat_id) {
                continue;
            }
            if self.services.chats.is_participant(&chat_id, &self.user_id).await? {
                self.dispatcher.join_chat(self.id, &chat_id);
                joined.push(chat_id);
            } else {
                rejected.push(chat_id);
            }
        }

        if !rejected.is_empty() {
            warn!(
                "{} ({}) refused {} chat rooms",
                self.username,
                self.user_id,
                rejected.len()
            );
        }
        info!(
            "{} ({}) joined {} chat rooms",
            self.username,
            self.user_id,
            joined.len()
        );

        Ok(json!({ "joined": joined, "rejected": rejected }))
    }

    fn relay_typing(&self, chat_id: &str, event: ServerEvent) {
        if !self.dispatcher.in_chat(self.id, chat_id) {
            debug!(
                "{} ({}) typing in unjoined chat {}, ignored",
                self.username, self.user_id, chat_id
            );
            return;
        }
        self.dispatcher.emit_to_room_except(chat_id, event, self.id);
    }
}

fn ack_reply(id: u64, result: Result<Value, CoreError>) -> ServerEvent {
    let outcome = match result {
        Ok(data) => AckOutcome::Data(data),
        Err(e) => AckOutcome::Error(e.public_message()),
    };
    ServerEvent::Ack(AckReply { id, outcome })
}
