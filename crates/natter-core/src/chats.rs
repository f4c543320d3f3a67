use std::collections::HashSet;
use std::sync::Arc;

use natter_db::models::ChatRow;
use natter_db::{Connection, Database, queries, to_db_time};
use tracing::{debug, info};

use natter_types::events::ServerEvent;
use natter_types::models::{Chat, ChatKind, UserId};

use crate::error::{CoreError, Result};
use crate::notify::Notifier;
use crate::{blocking, new_id, now, resolve};

/// Input for [`ChatRegistry::create_chat`].
#[derive(Debug, Clone)]
pub struct NewChat {
    pub kind: ChatKind,
    /// The other party of a direct chat
    pub peer: Option<UserId>,
    /// Members of a group chat besides the creator
    pub participant_ids: Vec<UserId>,
    pub name: Option<String>,
}

/// Patch applied by [`ChatRegistry::update_chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatUpdate {
    pub name: Option<String>,
    pub add_participants: Vec<UserId>,
    pub remove_participants: Vec<UserId>,
}

/// Result of an update, with enough context to fan out notifications.
struct Applied {
    chat: Chat,
    before: Vec<UserId>,
    changed: bool,
}

/// Chat creation, membership and lookup.
#[derive(Clone)]
pub struct ChatRegistry {
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
}

impl ChatRegistry {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    pub async fn create_chat(&self, creator: &str, new: NewChat) -> Result<Chat> {
        let participants = participants_for(creator, &new)?;
        let name = match new.kind {
            ChatKind::Group => new.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            ChatKind::Direct => None,
        };

        let kind = new.kind;
        let chat = blocking(&self.db, move |db| {
            db.with_tx(|tx| {
                ensure_users_exist(tx, &participants)?;

                let at = to_db_time(now());
                let row = ChatRow {
                    id: new_id(),
                    kind: kind.as_str().to_string(),
                    name,
                    last_message_id: None,
                    last_message_at: None,
                    created_at: at.clone(),
                    updated_at: at,
                };
                queries::insert_chat(tx, &row)?;
                for user_id in &participants {
                    queries::add_participant(tx, &row.id, user_id)?;
                }
                Ok(resolve::chat(tx, row)?)
            })
        })
        .await?;

        info!(
            "Chat {} ({}) created by {} with {} participants",
            chat.id,
            chat.kind.as_str(),
            creator,
            chat.participants.len()
        );

        // Nobody has joined the room yet, so go through personal channels.
        for participant in &chat.participants {
            self.notifier
                .to_user(&participant.id, ServerEvent::ChatCreated(chat.clone()));
        }

        Ok(chat)
    }

    /// Chats containing the user, most recently updated first.
    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        let user_id = user_id.to_string();
        blocking(&self.db, move |db| {
            db.with_conn(|conn| {
                let rows = queries::chats_for_user(conn, &user_id)?;
                Ok(resolve::chats(conn, rows)?)
            })
        })
        .await
    }

    /// Absent chats and chats the user is not in give the same NotFound.
    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> Result<Chat> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        blocking(&self.db, move |db| {
            db.with_conn(|conn| {
                let row = member_chat(conn, &chat_id, &user_id)?;
                Ok(resolve::chat(conn, row)?)
            })
        })
        .await
    }

    pub async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        blocking(&self.db, move |db| {
            db.with_conn(|conn| Ok(queries::is_participant(conn, &chat_id, &user_id)?))
        })
        .await
    }

    /// Rename a group and/or change membership. Any participant may add or
    /// remove any other participant.
    pub async fn update_chat(
        &self,
        chat_id: &str,
        user_id: &str,
        update: ChatUpdate,
    ) -> Result<Chat> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        let applied = blocking(&self.db, move |db| {
            db.with_tx(|tx| apply_update(tx, &chat_id, &user_id, update))
        })
        .await?;

        let Applied {
            chat,
            before,
            changed,
        } = applied;
        if !changed {
            debug!("Chat {} update was a no-op", chat.id);
            return Ok(chat);
        }

        let removed: Vec<UserId> = before
            .iter()
            .filter(|id| !chat.has_participant(id))
            .cloned()
            .collect();
        if !removed.is_empty() {
            self.notifier.evict(&chat.id, &removed);
        }

        // Removed users learn about their removal too.
        let mut audience: Vec<UserId> = chat.participant_ids();
        audience.extend(removed.iter().cloned());
        for id in &audience {
            self.notifier.to_user(id, ServerEvent::ChatUpdated(chat.clone()));
        }

        info!(
            "Chat {} updated: {} participants, {} removed",
            chat.id,
            chat.participants.len(),
            removed.len()
        );
        Ok(chat)
    }
}

/// Validates the create input and returns the deduplicated participant list,
/// creator first.
fn participants_for(creator: &str, new: &NewChat) -> Result<Vec<UserId>> {
    match new.kind {
        ChatKind::Direct => {
            let peer = new
                .peer
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| CoreError::invalid("participantId is required for direct chat"))?;
            if peer == creator {
                return Err(CoreError::invalid("Cannot start a direct chat with yourself"));
            }
            Ok(vec![creator.to_string(), peer.to_string()])
        }
        ChatKind::Group => {
            if new.participant_ids.is_empty() {
                return Err(CoreError::invalid("participantIds is required for group chat"));
            }
            let participants = dedup(
                std::iter::once(creator)
                    .chain(new.participant_ids.iter().map(|id| id.trim()))
                    .filter(|id| !id.is_empty()),
            );
            if participants.len() < 2 {
                return Err(CoreError::invalid(
                    "Group chat needs at least one other participant",
                ));
            }
            Ok(participants)
        }
    }
}

fn apply_update(
    conn: &Connection,
    chat_id: &str,
    user_id: &str,
    update: ChatUpdate,
) -> Result<Applied> {
    let row = member_chat(conn, chat_id, user_id)?;
    let kind = ChatKind::parse(&row.kind)
        .ok_or_else(|| anyhow::anyhow!("Corrupt kind '{}' on chat '{}'", row.kind, row.id))?;
    let before = queries::participant_ids(conn, chat_id)?;

    let to_add: Vec<UserId> = dedup(update.add_participants.iter().map(|id| id.trim()))
        .into_iter()
        .filter(|id| !id.is_empty() && !before.contains(id))
        .collect();
    let to_remove: Vec<UserId> = dedup(update.remove_participants.iter().map(|id| id.trim()))
        .into_iter()
        .filter(|id| before.contains(id))
        .collect();

    if kind == ChatKind::Direct && !(to_add.is_empty() && to_remove.is_empty()) {
        return Err(CoreError::invalid("Participants of a direct chat cannot change"));
    }
    ensure_users_exist(conn, &to_add)?;

    let at = to_db_time(now());
    let mut changed = false;

    // Names only mean something for groups; ignored otherwise.
    if let Some(name) = update.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        if kind == ChatKind::Group && row.name.as_deref() != Some(name) {
            queries::set_chat_name(conn, chat_id, name, &at)?;
            changed = true;
        }
    }

    for id in &to_add {
        queries::add_participant(conn, chat_id, id)?;
    }
    for id in &to_remove {
        queries::remove_participant(conn, chat_id, id)?;
    }

    if !(to_add.is_empty() && to_remove.is_empty()) {
        // Only groups get here; they keep at least two members.
        if queries::participant_ids(conn, chat_id)?.len() < 2 {
            return Err(CoreError::invalid(
                "Group chat needs at least one other participant",
            ));
        }
        queries::touch_chat(conn, chat_id, &at)?;
        changed = true;
    }

    let row = queries::get_chat(conn, chat_id)?
        .ok_or_else(|| CoreError::not_found("Chat not found"))?;
    Ok(Applied {
        chat: resolve::chat(conn, row)?,
        before,
        changed,
    })
}

/// The chat row, or NotFound when it is absent or `user_id` is not in it.
pub(crate) fn member_chat(conn: &Connection, chat_id: &str, user_id: &str) -> Result<ChatRow> {
    queries::get_chat_for_member(conn, chat_id, user_id)?
        .ok_or_else(|| CoreError::not_found("Chat not found"))
}

fn ensure_users_exist(conn: &Connection, ids: &[UserId]) -> Result<()> {
    let found: HashSet<String> = queries::get_users(conn, ids)?
        .into_iter()
        .map(|u| u.id)
        .collect();
    match ids.iter().find(|id| !found.contains(*id)) {
        Some(missing) => Err(CoreError::invalid(format!("Unknown participant: {}", missing))),
        None => Ok(()),
    }
}

/// Order-preserving dedup.
fn dedup<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<UserId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}
