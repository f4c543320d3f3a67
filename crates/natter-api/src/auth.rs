use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use natter_core::{CoreError, blocking};
use natter_db::models::UserRow;
use natter_db::{queries, to_db_time};
use natter_types::api::{Claims, SignInRequest, SignInResponse, SignUpRequest, SignUpResponse};
use natter_types::models::UserSummary;

use crate::AppState;
use crate::error::ApiResult;

const DEFAULT_DISPLAY_NAME: &str = "ChatApp";
const MIN_PASSWORD_LEN: usize = 8;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if !(3..=32).contains(&username.chars().count()) {
        return Err(CoreError::invalid("Username must be 3 to 32 characters").into());
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(CoreError::invalid("Password must be at least 8 characters").into());
    }
    if !email.contains('@') {
        return Err(CoreError::invalid("Email is invalid").into());
    }
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
    let password = req.password;

    let user = blocking(&state.services.db, move |db| {
        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
            .to_string();

        db.with_tx(|tx| {
            if queries::get_user_by_username(tx, &username)?.is_some() {
                return Err(CoreError::conflict("Username already taken"));
            }
            if queries::get_user_by_email(tx, &email)?.is_some() {
                return Err(CoreError::conflict("Email already registered"));
            }

            let row = UserRow {
                id: Uuid::new_v4().to_string(),
                username,
                name,
                email,
                password: password_hash,
                created_at: to_db_time(chrono::Utc::now()),
            };
            queries::insert_user(tx, &row)?;
            Ok(row)
        })
    })
    .await?;

    info!("{} ({}) signed up", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            message: "User created".to_string(),
            id: user.id,
        }),
    ))
}

pub async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> ApiResult<Json<SignInResponse>> {
    let email = req.email.trim().to_string();
    let password = req.password;

    let user = blocking(&state.services.db, move |db| {
        let user = db
            .with_conn(|conn| Ok::<_, CoreError>(queries::get_user_by_email(conn, &email)?))?
            .ok_or_else(invalid_credentials)?;

        // Verify password
        let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
            CoreError::Internal(anyhow::anyhow!("stored hash for {} unreadable: {}", user.id, e))
        })?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| {
                warn!("Failed sign-in for {}", user.username);
                invalid_credentials()
            })?;

        Ok(user)
    })
    .await?;

    let token = state.services.identity.issue(&user.id, &user.username)?;
    info!("{} ({}) signed in", user.username, user.id);

    Ok(Json(SignInResponse {
        token,
        id: user.id,
        username: user.username,
        name: user.name,
    }))
}

/// The caller's own profile.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserSummary>> {
    let user = blocking(&state.services.db, move |db| {
        db.with_conn(|conn| Ok::<_, CoreError>(queries::get_user(conn, &claims.sub)?))?
            .ok_or_else(|| CoreError::not_found("User not found"))
    })
    .await?;

    Ok(Json(UserSummary {
        id: user.id,
        username: user.username,
        name: user.name,
        email: user.email,
    }))
}

fn invalid_credentials() -> CoreError {
    CoreError::Unauthorized("Invalid email or password".into())
}
