//! Single-statement queries. Each takes a `&Connection` so callers can run
//! several of them inside one transaction (a `Transaction` derefs to it).

use crate::models::{ChatRow, FriendRequestRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row, params};

// -- Users --

const USER_COLUMNS: &str = "id, username, name, email, password, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        password: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_user(conn: &Connection, user: &UserRow) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, name, email, password, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.username,
            user.name,
            user.email,
            user.password,
            user.created_at
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    conn.query_row(&sql, [id], user_from_row).optional()
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
    conn.query_row(&sql, [email], user_from_row).optional()
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
    conn.query_row(&sql, [username], user_from_row).optional()
}

pub fn user_exists(conn: &Connection, id: &str) -> Result<bool> {
    exists(conn, "SELECT 1 FROM users WHERE id = ?1", &[&id])
}

/// Batch-fetch users. Order is unspecified; unknown ids are skipped.
pub fn get_users(conn: &Connection, ids: &[String]) -> Result<Vec<UserRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {} FROM users WHERE id IN ({})",
        USER_COLUMNS,
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(ids).as_slice(), user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Friendships --

pub fn are_friends(conn: &Connection, user_id: &str, other_id: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
        &[&user_id, &other_id],
    )
}

/// Adds one direction of a friendship. Re-adding is a no-op.
pub fn add_friend(conn: &Connection, user_id: &str, friend_id: &str, now: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, friend_id, now],
    )?;
    Ok(())
}

pub fn list_friends(conn: &Connection, user_id: &str) -> Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.name, u.email, u.password, u.created_at
         FROM friendships f
         JOIN users u ON u.id = f.friend_id
         WHERE f.user_id = ?1
         ORDER BY u.username",
    )?;
    let rows = stmt
        .query_map([user_id], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Friend requests --

const REQUEST_COLUMNS: &str = "id, from_id, to_id, status, created_at, updated_at";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<FriendRequestRow> {
    Ok(FriendRequestRow {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn insert_friend_request(conn: &Connection, request: &FriendRequestRow) -> Result<()> {
    conn.execute(
        "INSERT INTO friend_requests (id, from_id, to_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            request.id,
            request.from_id,
            request.to_id,
            request.status,
            request.created_at,
            request.updated_at
        ],
    )?;
    Ok(())
}

/// True if a pending request exists from `a` to `b` or from `b` to `a`.
pub fn pending_request_between(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT 1 FROM friend_requests
         WHERE status = 'pending'
           AND ((from_id = ?1 AND to_id = ?2) OR (from_id = ?2 AND to_id = ?1))",
        &[&a, &b],
    )
}

pub fn get_friend_request(conn: &Connection, id: &str) -> Result<Option<FriendRequestRow>> {
    let sql = format!("SELECT {} FROM friend_requests WHERE id = ?1", REQUEST_COLUMNS);
    conn.query_row(&sql, [id], request_from_row).optional()
}

pub fn list_friend_requests(conn: &Connection, user_id: &str) -> Result<Vec<FriendRequestRow>> {
    let sql = format!(
        "SELECT {} FROM friend_requests
         WHERE from_id = ?1 OR to_id = ?1
         ORDER BY created_at DESC, rowid DESC",
        REQUEST_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], request_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves a pending request to `status`. Returns false if the request was no
/// longer pending, so only one responder can win.
pub fn resolve_friend_request(
    conn: &Connection,
    id: &str,
    status: &str,
    now: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE friend_requests SET status = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'pending'",
        params![id, status, now],
    )?;
    Ok(changed == 1)
}

// -- Chats --

const CHAT_COLUMNS: &str =
    "id, kind, name, last_message_id, last_message_at, created_at, updated_at";

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        last_message_id: row.get(3)?,
        last_message_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn insert_chat(conn: &Connection, chat: &ChatRow) -> Result<()> {
    conn.execute(
        "INSERT INTO chats
           (id, kind, name, last_message_id, last_message_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chat.id,
            chat.kind,
            chat.name,
            chat.last_message_id,
            chat.last_message_at,
            chat.created_at,
            chat.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_chat(conn: &Connection, id: &str) -> Result<Option<ChatRow>> {
    let sql = format!("SELECT {} FROM chats WHERE id = ?1", CHAT_COLUMNS);
    conn.query_row(&sql, [id], chat_from_row).optional()
}

/// Chat row only if `user_id` is a participant.
pub fn get_chat_for_member(conn: &Connection, id: &str, user_id: &str) -> Result<Option<ChatRow>> {
    if !is_participant(conn, id, user_id)? {
        return Ok(None);
    }
    get_chat(conn, id)
}

pub fn chats_for_user(conn: &Connection, user_id: &str) -> Result<Vec<ChatRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.kind, c.name, c.last_message_id, c.last_message_at,
                c.created_at, c.updated_at
         FROM chats c
         JOIN chat_participants p ON p.chat_id = c.id
         WHERE p.user_id = ?1
         ORDER BY c.updated_at DESC, c.rowid DESC",
    )?;
    let rows = stmt
        .query_map([user_id], chat_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_chat_name(conn: &Connection, id: &str, name: &str, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE chats SET name = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, name, now],
    )?;
    Ok(())
}

pub fn touch_chat(conn: &Connection, id: &str, now: &str) -> Result<()> {
    conn.execute("UPDATE chats SET updated_at = ?2 WHERE id = ?1", params![id, now])?;
    Ok(())
}

/// Moves the last-message pointer. Also bumps `updated_at` so the chat sorts
/// first in listings.
pub fn set_last_message(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE chats SET last_message_id = ?2, last_message_at = ?3, updated_at = ?3
         WHERE id = ?1",
        params![chat_id, message_id, at],
    )?;
    Ok(())
}

// -- Participants --

pub fn add_participant(conn: &Connection, chat_id: &str, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
        params![chat_id, user_id],
    )?;
    Ok(())
}

pub fn remove_participant(conn: &Connection, chat_id: &str, user_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        params![chat_id, user_id],
    )?;
    Ok(())
}

pub fn is_participant(conn: &Connection, chat_id: &str, user_id: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        &[&chat_id, &user_id],
    )
}

/// Participant ids in the order they joined.
pub fn participant_ids(conn: &Connection, chat_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY rowid")?;
    let ids = stmt
        .query_map([chat_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

// -- Messages --

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, kind, created_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_message(conn: &Connection, message: &MessageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_id, content, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.chat_id,
            message.sender_id,
            message.content,
            message.kind,
            message.created_at
        ],
    )?;
    Ok(())
}

/// A message, only if it belongs to `chat_id`.
pub fn get_message(conn: &Connection, chat_id: &str, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE id = ?1 AND chat_id = ?2",
        MESSAGE_COLUMNS
    );
    conn.query_row(&sql, [id, chat_id], message_from_row).optional()
}

pub fn get_messages_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<MessageRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {} FROM messages WHERE id IN ({})",
        MESSAGE_COLUMNS,
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(ids).as_slice(), message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Newest first, optionally strictly older than `before`.
pub fn list_messages(
    conn: &Connection,
    chat_id: &str,
    before: Option<&str>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {} FROM messages
         WHERE chat_id = ?1 AND (?2 IS NULL OR created_at < ?2)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![chat_id, before, limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Read receipts --

/// Records that `user_id` read the message. Returns true if this was new.
pub fn add_reader(conn: &Connection, message_id: &str, user_id: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
        params![message_id, user_id],
    )?;
    Ok(inserted == 1)
}

/// Batch-fetch read receipts as (message_id, user_id) pairs in read order.
pub fn readers_for_messages(
    conn: &Connection,
    message_ids: &[String],
) -> Result<Vec<(String, String)>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT message_id, user_id FROM message_reads
         WHERE message_id IN ({}) ORDER BY rowid",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(message_ids).as_slice(), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Helpers --

fn exists(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<bool> {
    let found = conn.query_row(sql, params, |_| Ok(())).optional()?;
    Ok(found.is_some())
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn as_params(ids: &[String]) -> Vec<&dyn ToSql> {
    ids.iter().map(|id| id as &dyn ToSql).collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn user(id: &str) -> UserRow {
        UserRow {
            id: id.to_string(),
            username: format!("user-{}", id),
            name: id.to_uppercase(),
            email: format!("{}@example.com", id),
            password: "hash".to_string(),
            created_at: "2024-01-01T00:00:00.000000Z".to_string(),
        }
    }

    fn chat(id: &str) -> ChatRow {
        ChatRow {
            id: id.to_string(),
            kind: "group".to_string(),
            name: None,
            last_message_id: None,
            last_message_at: None,
            created_at: "2024-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn pending_index_rejects_duplicate_ordered_pair() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_user(conn, &user("a"))?;
            insert_user(conn, &user("b"))?;

            let mut request = FriendRequestRow {
                id: "r1".into(),
                from_id: "a".into(),
                to_id: "b".into(),
                status: "pending".into(),
                created_at: "2024-01-01T00:00:00.000000Z".into(),
                updated_at: "2024-01-01T00:00:00.000000Z".into(),
            };
            insert_friend_request(conn, &request)?;

            request.id = "r2".into();
            assert!(insert_friend_request(conn, &request).is_err());
            assert!(pending_request_between(conn, "b", "a")?);

            // Once resolved, the pair may be requested again.
            let at = "2024-01-02T00:00:00.000000Z";
            assert!(resolve_friend_request(conn, "r1", "rejected", at)?);
            assert!(!resolve_friend_request(conn, "r1", "accepted", at)?);
            insert_friend_request(conn, &request)?;
            Ok::<_, anyhow::Error>(())
        })
        .unwrap();
    }

    #[test]
    fn participants_keep_join_order() {
        let db = Database::open_in_memory().unwrap();
        let ids = db
            .with_conn(|conn| {
                for id in ["c", "a", "b"] {
                    insert_user(conn, &user(id))?;
                }
                insert_chat(conn, &chat("chat"))?;
                for id in ["c", "a", "b", "a"] {
                    add_participant(conn, "chat", id)?;
                }
                remove_participant(conn, "chat", "a")?;
                participant_ids(conn, "chat")
            })
            .unwrap();

        assert_eq!(ids, vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn list_messages_cursor_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let page = db
            .with_conn(|conn| {
                insert_user(conn, &user("a"))?;
                insert_chat(conn, &chat("chat"))?;
                for (id, at) in [
                    ("m1", "2024-01-01T00:00:01.000000Z"),
                    ("m2", "2024-01-01T00:00:02.000000Z"),
                    ("m3", "2024-01-01T00:00:03.000000Z"),
                ] {
                    insert_message(
                        conn,
                        &MessageRow {
                            id: id.into(),
                            chat_id: "chat".into(),
                            sender_id: "a".into(),
                            content: "x".into(),
                            kind: "text".into(),
                            created_at: at.into(),
                        },
                    )?;
                }
                list_messages(conn, "chat", Some("2024-01-01T00:00:03.000000Z"), 10)
            })
            .unwrap();

        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }
}
