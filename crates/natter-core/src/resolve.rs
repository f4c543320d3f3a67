//! Turns store rows into resolved wire models: participants, senders and
//! friend-request parties become `UserSummary`s, read receipts are attached.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use natter_db::models::{ChatRow, FriendRequestRow, MessageRow, UserRow};
use natter_db::{Connection, from_db_time, queries};
use tracing::warn;

use natter_types::models::{
    Chat, ChatKind, FriendRequest, FriendRequestStatus, Message, MessageKind, UserSummary,
};

pub(crate) fn summary(row: UserRow) -> UserSummary {
    UserSummary {
        id: row.id,
        username: row.username,
        name: row.name,
        email: row.email,
    }
}

/// Placeholder for a user id that no longer resolves.
fn unknown_user(id: &str) -> UserSummary {
    UserSummary {
        id: id.to_string(),
        username: "unknown".to_string(),
        name: String::new(),
        email: String::new(),
    }
}

fn summaries(conn: &Connection, ids: &[String]) -> Result<HashMap<String, UserSummary>> {
    let rows = queries::get_users(conn, ids)?;
    Ok(rows
        .into_iter()
        .map(|row| (row.id.clone(), summary(row)))
        .collect())
}

fn lookup(users: &HashMap<String, UserSummary>, id: &str) -> UserSummary {
    users.get(id).cloned().unwrap_or_else(|| {
        warn!("Dangling user reference '{}'", id);
        unknown_user(id)
    })
}

// -- Messages --

pub(crate) fn messages(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let mut sender_ids: Vec<String> = rows.iter().map(|r| r.sender_id.clone()).collect();
    sender_ids.sort();
    sender_ids.dedup();
    let senders = summaries(conn, &sender_ids)?;

    let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut readers: HashMap<String, Vec<String>> = HashMap::new();
    for (message_id, user_id) in queries::readers_for_messages(conn, &message_ids)? {
        readers.entry(message_id).or_default().push(user_id);
    }

    rows.into_iter()
        .map(|row| {
            let kind = MessageKind::parse(&row.kind)
                .ok_or_else(|| anyhow!("Corrupt kind '{}' on message '{}'", row.kind, row.id))?;
            Ok(Message {
                sender: lookup(&senders, &row.sender_id),
                read_by: readers.remove(&row.id).unwrap_or_default(),
                created_at: from_db_time(&row.created_at)?,
                id: row.id,
                chat_id: row.chat_id,
                content: row.content,
                kind,
            })
        })
        .collect()
}

pub(crate) fn message(conn: &Connection, row: MessageRow) -> Result<Message> {
    messages(conn, vec![row])?
        .pop()
        .ok_or_else(|| anyhow!("message vanished during resolve"))
}

// -- Chats --

pub(crate) fn chats(conn: &Connection, rows: Vec<ChatRow>) -> Result<Vec<Chat>> {
    let mut participants: Vec<(String, Vec<String>)> = Vec::with_capacity(rows.len());
    let mut all_ids: Vec<String> = Vec::new();
    for row in &rows {
        let ids = queries::participant_ids(conn, &row.id)?;
        all_ids.extend(ids.iter().cloned());
        participants.push((row.id.clone(), ids));
    }
    all_ids.sort();
    all_ids.dedup();
    let users = summaries(conn, &all_ids)?;

    let last_ids: Vec<String> = rows.iter().filter_map(|r| r.last_message_id.clone()).collect();
    let mut last_messages: HashMap<String, Message> =
        messages(conn, queries::get_messages_by_ids(conn, &last_ids)?)?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

    rows.into_iter()
        .zip(participants)
        .map(|(row, (_, ids))| {
            let kind = ChatKind::parse(&row.kind)
                .ok_or_else(|| anyhow!("Corrupt kind '{}' on chat '{}'", row.kind, row.id))?;
            let last_message = row
                .last_message_id
                .as_deref()
                .and_then(|id| last_messages.remove(id))
                .map(Box::new);
            Ok(Chat {
                participants: ids.iter().map(|id| lookup(&users, id)).collect(),
                last_message,
                last_message_at: row.last_message_at.as_deref().map(from_db_time).transpose()?,
                created_at: from_db_time(&row.created_at)?,
                updated_at: from_db_time(&row.updated_at)?,
                name: if kind == ChatKind::Group { row.name } else { None },
                id: row.id,
                kind,
            })
        })
        .collect()
}

pub(crate) fn chat(conn: &Connection, row: ChatRow) -> Result<Chat> {
    chats(conn, vec![row])?
        .pop()
        .ok_or_else(|| anyhow!("chat vanished during resolve"))
}

// -- Friend requests --

pub(crate) fn friend_requests(
    conn: &Connection,
    rows: Vec<FriendRequestRow>,
) -> Result<Vec<FriendRequest>> {
    let mut ids: Vec<String> = rows
        .iter()
        .flat_map(|r| [r.from_id.clone(), r.to_id.clone()])
        .collect();
    ids.sort();
    ids.dedup();
    let users = summaries(conn, &ids)?;

    rows.into_iter()
        .map(|row| {
            let status = FriendRequestStatus::parse(&row.status).ok_or_else(|| {
                anyhow!("Corrupt status '{}' on friend request '{}'", row.status, row.id)
            })?;
            Ok(FriendRequest {
                from: lookup(&users, &row.from_id),
                to: lookup(&users, &row.to_id),
                status,
                created_at: from_db_time(&row.created_at)?,
                updated_at: from_db_time(&row.updated_at)?,
                id: row.id,
            })
        })
        .collect()
}

pub(crate) fn friend_request(conn: &Connection, row: FriendRequestRow) -> Result<FriendRequest> {
    friend_requests(conn, vec![row])?
        .pop()
        .ok_or_else(|| anyhow!("friend request vanished during resolve"))
}
