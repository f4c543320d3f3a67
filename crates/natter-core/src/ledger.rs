use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use natter_db::models::MessageRow;
use natter_db::{Database, from_db_time, queries, to_db_time};
use tracing::{debug, info};

use natter_types::events::ServerEvent;
use natter_types::models::{Message, MessageKind};

use crate::chats::member_chat;
use crate::error::{CoreError, Result};
use crate::notify::Notifier;
use crate::{blocking, new_id, now, resolve};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Message persistence, read receipts and history. `create_message` is the
/// only write path for messages; REST and the gateway both call it.
#[derive(Clone)]
pub struct MessageLedger {
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
}

impl MessageLedger {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Newest first. `before` is an exclusive RFC 3339 cursor.
    pub async fn list_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        before: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        let before = before.map(parse_cursor).transpose()?;
        // Zero still yields one message.
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        blocking(&self.db, move |db| {
            db.with_conn(|conn| {
                member_chat(conn, &chat_id, &user_id)?;
                let rows = queries::list_messages(conn, &chat_id, before.as_deref(), limit)?;
                Ok(resolve::messages(conn, rows)?)
            })
        })
        .await
    }

    /// Validate, persist, move the chat pointer, then broadcast `message:new`.
    ///
    /// The insert and the pointer move commit together. The broadcast happens
    /// after commit but before the writer lock is released, so events in a
    /// room go out in commit order.
    pub async fn create_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
        kind: Option<&str>,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(CoreError::invalid("content is required"));
        }
        let kind = match kind {
            None => MessageKind::default(),
            Some(raw) => MessageKind::parse(raw)
                .ok_or_else(|| CoreError::invalid(format!("Unsupported message type: {}", raw)))?,
        };

        let (chat_id, sender_id, content) =
            (chat_id.to_string(), sender_id.to_string(), content.to_string());
        let notifier = self.notifier.clone();

        let message = blocking(&self.db, move |db| {
            db.with_conn_mut(|conn| {
                let tx = conn.transaction().context("begin transaction")?;

                let chat = member_chat(&tx, &chat_id, &sender_id)?;
                let last = chat.last_message_at.as_deref().map(from_db_time).transpose()?;

                let row = MessageRow {
                    id: new_id(),
                    chat_id,
                    sender_id,
                    content,
                    kind: kind.as_str().to_string(),
                    created_at: to_db_time(next_timestamp(now(), last)),
                };
                queries::insert_message(&tx, &row)?;
                queries::add_reader(&tx, &row.id, &row.sender_id)?;
                queries::set_last_message(&tx, &row.chat_id, &row.id, &row.created_at)?;
                let message = resolve::message(&tx, row)?;

                tx.commit().context("commit transaction")?;

                notifier.to_room(&message.chat_id, ServerEvent::MessageNew(message.clone()));
                Ok(message)
            })
        })
        .await?;

        debug!(
            "Message {} in chat {} from {}",
            message.id, message.chat_id, message.sender.username
        );
        Ok(message)
    }

    /// Adds `user_id` to the message's read set. Idempotent; `message:read`
    /// is broadcast every time regardless. Returns true on the first read.
    pub async fn mark_read(&self, chat_id: &str, message_id: &str, user_id: &str) -> Result<bool> {
        let (chat_id, message_id, user_id) =
            (chat_id.to_string(), message_id.to_string(), user_id.to_string());
        let notifier = self.notifier.clone();

        let event = ServerEvent::MessageRead {
            chat_id: chat_id.clone(),
            message_id: message_id.clone(),
            user_id: user_id.clone(),
        };
        let first_read = blocking(&self.db, move |db| {
            db.with_conn(|conn| {
                member_chat(conn, &chat_id, &user_id)?;
                queries::get_message(conn, &chat_id, &message_id)?
                    .ok_or_else(|| CoreError::not_found("Message not found"))?;

                let first_read = queries::add_reader(conn, &message_id, &user_id)?;
                notifier.to_room(&chat_id, event);
                if first_read {
                    info!("Message {} read by {}", message_id, user_id);
                }
                Ok(first_read)
            })
        })
        .await?;

        Ok(first_read)
    }
}

/// Stored times carry microseconds. A finer cursor is rounded up so that
/// every message strictly older than it still matches.
fn parse_cursor(raw: &str) -> Result<String> {
    let t = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| CoreError::invalid("before must be an RFC 3339 timestamp"))?
        .with_timezone(&Utc);
    let truncated = t.trunc_subsecs(6);
    let cursor = if truncated < t {
        truncated + Duration::microseconds(1)
    } else {
        truncated
    };
    Ok(to_db_time(cursor))
}

/// Message times strictly increase within a chat, so the last-message
/// pointer and the `before` cursor are never ambiguous.
fn next_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}
