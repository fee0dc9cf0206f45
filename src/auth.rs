use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use mysql::{params, prelude::Queryable};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::database::AppState;
use crate::error::AppError;
use newsdesk::generate_token;

/// Flat permission levels. Admin implies everything editor can do, editor
/// implies everything user can do; checked by membership, not a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "editor" => Some(Role::Editor),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::User => "user",
        }
    }

    pub fn can_access_dashboard(&self) -> bool {
        matches!(self, Role::Admin | Role::Editor)
    }

    pub fn can_manage_users(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Authenticated requester, attached to the request by `require_session`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub token: String,
}

pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = *uuid::Uuid::new_v4().as_bytes();
        argon2::hash_encoded(password.as_bytes(), &salt, &argon2::Config::default())
            .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
    })
    .await
    .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
}

pub async fn verify_password(encoded: String, password: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        argon2::verify_encoded(&encoded, password.as_bytes())
            .map_err(|e| AppError::Internal(format!("password verification failed: {}", e)))
    })
    .await
    .map_err(|e| AppError::Internal(format!("verification task failed: {}", e)))?
}

fn bearer_token(req: &Request) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

/// Resolves the bearer token to a session + user and attaches `CurrentUser`.
/// Regular `user` sessions idle longer than the configured window are dropped
/// and the request rejected, mirroring the forced logout of inactive readers.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    let mut conn = state.conn()?;

    let row: Option<(u64, String, String, String, i64)> = conn.exec_first(
        "SELECT u.id, u.name, u.email, u.role,
                TIMESTAMPDIFF(SECOND, s.last_seen_at, NOW())
         FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token = :token",
        params! { "token" => &token },
    )?;

    let (id, name, email, role_str, idle_secs) =
        row.ok_or_else(|| AppError::Unauthorized("invalid session".to_string()))?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| AppError::Internal(format!("unknown role in database: {}", role_str)))?;

    if role == Role::User && idle_secs > state.config.user_idle_secs {
        conn.exec_drop(
            "DELETE FROM sessions WHERE token = :token",
            params! { "token" => &token },
        )?;
        tracing::info!(user_id = id, "idle session expired");
        return Err(AppError::Unauthorized("session expired".to_string()));
    }

    conn.exec_drop(
        "UPDATE sessions SET last_seen_at = NOW() WHERE token = :token",
        params! { "token" => &token },
    )?;

    req.extensions_mut().insert(CurrentUser {
        id,
        name,
        email,
        role,
        token,
    });
    Ok(next.run(req).await)
}

pub async fn require_dashboard(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| AppError::Unauthorized("login required".to_string()))?;
    if !user.role.can_access_dashboard() {
        return Err(AppError::Forbidden(
            "dashboard access requires the editor or admin role".to_string(),
        ));
    }
    Ok(next.run(req).await)
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| AppError::Unauthorized("login required".to_string()))?;
    if !user.role.can_manage_users() {
        return Err(AppError::Forbidden(
            "user management requires the admin role".to_string(),
        ));
    }
    Ok(next.run(req).await)
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    user: AuthUser,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("login started");
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let mut conn = state.conn()?;
    let row: Option<(u64, String, String, String, String)> = conn.exec_first(
        "SELECT id, name, email, password_hash, role FROM users WHERE email = :email",
        params! { "email" => body.email.trim() },
    )?;
    let (id, name, email, password_hash, role_str) =
        row.ok_or_else(|| AppError::Unauthorized("invalid credentials".to_string()))?;

    if !verify_password(password_hash, body.password).await? {
        tracing::info!(user_id = id, "login rejected");
        return Err(AppError::Unauthorized("invalid credentials".to_string()));
    }
    let role = Role::parse(&role_str)
        .ok_or_else(|| AppError::Internal(format!("unknown role in database: {}", role_str)))?;

    let token = generate_token();
    conn.exec_drop(
        "INSERT INTO sessions (token, user_id) VALUES (:token, :user_id)",
        params! { "token" => &token, "user_id" => id },
    )?;
    tracing::info!(user_id = id, "login succeeded");

    Ok(Json(LoginResponse {
        token,
        user: AuthUser {
            id,
            name,
            email,
            role,
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    conn.exec_drop(
        "DELETE FROM sessions WHERE token = :token",
        params! { "token" => &user.token },
    )?;
    tracing::info!(user_id = user.id, "logout");
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<AuthUser> {
    Json(AuthUser {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_round_trips() {
        for role in [Role::Admin, Role::Editor, Role::User] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn only_admin_manages_users() {
        assert!(Role::Admin.can_manage_users());
        assert!(!Role::Editor.can_manage_users());
        assert!(!Role::User.can_manage_users());
    }

    #[test]
    fn admin_and_editor_reach_dashboard() {
        assert!(Role::Admin.can_access_dashboard());
        assert!(Role::Editor.can_access_dashboard());
        assert!(!Role::User.can_access_dashboard());
    }
}
