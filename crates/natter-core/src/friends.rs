use std::sync::Arc;

use natter_db::models::FriendRequestRow;
use natter_db::{Database, queries, to_db_time};
use tracing::info;

use natter_types::models::{Decision, FriendRequest, FriendRequestStatus, UserSummary};

use crate::error::{CoreError, Result};
use crate::{blocking, new_id, now, resolve};

/// Friend requests and the symmetric friend relation.
#[derive(Clone)]
pub struct FriendGraph {
    db: Arc<Database>,
}

impl FriendGraph {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn request_friend(&self, from: &str, to: &str) -> Result<FriendRequest> {
        let to = to.trim();
        if to.is_empty() {
            return Err(CoreError::invalid("toUserId is required"));
        }
        if to == from {
            return Err(CoreError::invalid("Cannot send friend request to yourself"));
        }

        let (from, to) = (from.to_string(), to.to_string());
        let request = blocking(&self.db, move |db| {
            // Checks and insert share one transaction so two racing requests
            // cannot both pass the pending check.
            db.with_tx(|tx| {
                if !queries::user_exists(tx, &to)? {
                    return Err(CoreError::not_found("User not found"));
                }
                if queries::are_friends(tx, &from, &to)? {
                    return Err(CoreError::conflict("Users are already friends"));
                }
                if queries::pending_request_between(tx, &from, &to)? {
                    return Err(CoreError::conflict("Friend request already sent"));
                }

                let at = to_db_time(now());
                let row = FriendRequestRow {
                    id: new_id(),
                    from_id: from,
                    to_id: to,
                    status: FriendRequestStatus::Pending.as_str().to_string(),
                    created_at: at.clone(),
                    updated_at: at,
                };
                queries::insert_friend_request(tx, &row)?;
                Ok(resolve::friend_request(tx, row)?)
            })
        })
        .await?;

        info!(
            "Friend request {} from {} to {}",
            request.id, request.from.username, request.to.username
        );
        Ok(request)
    }

    /// Every request the user sent or received, newest first.
    pub async fn list_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>> {
        let user_id = user_id.to_string();
        blocking(&self.db, move |db| {
            db.with_conn(|conn| {
                let rows = queries::list_friend_requests(conn, &user_id)?;
                Ok(resolve::friend_requests(conn, rows)?)
            })
        })
        .await
    }

    /// Accept or reject a pending request addressed to `user_id`.
    ///
    /// Acceptance writes the status and both friendship directions in one
    /// transaction; each step is idempotent on its own.
    pub async fn respond(
        &self,
        request_id: &str,
        user_id: &str,
        decision: Decision,
    ) -> Result<FriendRequest> {
        let (request_id, user_id) = (request_id.to_string(), user_id.to_string());
        let request = blocking(&self.db, move |db| {
            db.with_tx(|tx| {
                let row = queries::get_friend_request(tx, &request_id)?
                    .ok_or_else(|| CoreError::not_found("Friend request not found"))?;

                if row.to_id != user_id {
                    return Err(CoreError::Forbidden(
                        "Not allowed to respond to this request".into(),
                    ));
                }

                let at = to_db_time(now());
                let status = decision.status();
                if !queries::resolve_friend_request(tx, &row.id, status.as_str(), &at)? {
                    return Err(CoreError::conflict("Request already processed"));
                }

                if decision == Decision::Accept {
                    queries::add_friend(tx, &row.from_id, &row.to_id, &at)?;
                    queries::add_friend(tx, &row.to_id, &row.from_id, &at)?;
                }

                let row = queries::get_friend_request(tx, &row.id)?
                    .ok_or_else(|| CoreError::not_found("Friend request not found"))?;
                Ok(resolve::friend_request(tx, row)?)
            })
        })
        .await?;

        info!(
            "Friend request {} {} by {}",
            request.id,
            request.status.as_str(),
            request.to.username
        );
        Ok(request)
    }

    pub async fn list_friends(&self, user_id: &str) -> Result<Vec<UserSummary>> {
        let user_id = user_id.to_string();
        blocking(&self.db, move |db| {
            db.with_conn(|conn| {
                let rows = queries::list_friends(conn, &user_id)?;
                Ok(rows.into_iter().map(resolve::summary).collect())
            })
        })
        .await
    }
}
