use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use mysql::{params, prelude::Queryable, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{hash_password, Role};
use crate::database::AppState;
use crate::error::AppError;
use crate::pagination::{ListResponse, PageMeta, PageQuery};

#[derive(Serialize)]
pub struct UserSummary {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub verified_at: Option<String>,
    pub post_count: u64,
    pub created_at: String,
}

type UserRow = (u64, String, String, String, Option<String>, u64, String);

fn user_from_row(row: UserRow) -> UserSummary {
    let (id, name, email, role, verified_at, post_count, created_at) = row;
    UserSummary {
        id,
        name,
        email,
        role,
        verified_at,
        post_count,
        created_at,
    }
}

const SELECT_USER: &str = "SELECT u.id, u.name, u.email, u.role,
    DATE_FORMAT(u.verified_at, '%Y-%m-%d %H:%i:%s'),
    (SELECT COUNT(*) FROM posts p WHERE p.user_id = u.id) AS post_count,
    DATE_FORMAT(u.created_at, '%Y-%m-%d %H:%i:%s')
 FROM users u";

#[derive(Deserialize)]
pub struct UserListQuery {
    q: Option<String>,
    role: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

pub async fn admin_list(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("list_users started");
    let mut conn = state.conn()?;

    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        clauses.push("(u.name LIKE ? OR u.email LIKE ?)");
        let like = format!("%{}%", q.trim());
        values.push(Value::from(like.clone()));
        values.push(Value::from(like));
    }
    if let Some(role) = query.role.as_deref() {
        let role = Role::parse(role)
            .ok_or_else(|| AppError::Validation(format!("unknown role filter: {}", role)))?;
        clauses.push("u.role = ?");
        values.push(Value::from(role.as_str()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: u64 = conn
        .exec_first(
            format!("SELECT COUNT(*) FROM users u{}", where_sql),
            values.clone(),
        )?
        .unwrap_or(0);
    let page = PageQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let (meta, offset) = PageMeta::resolve(&page, &state.config, total);

    values.push(Value::from(meta.per_page));
    values.push(Value::from(offset));
    let items = conn.exec_map(
        format!(
            "{}{} ORDER BY u.created_at DESC LIMIT ? OFFSET ?",
            SELECT_USER, where_sql
        ),
        values,
        user_from_row,
    )?;

    Ok(Json(ListResponse { items, meta }))
}

#[derive(Deserialize)]
pub struct CreateUserInput {
    name: String,
    email: String,
    password: String,
    role: Option<String>,
}

fn validate_identity(name: &str, email: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation(
            "email must be a valid address".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateUserInput>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("create_user started");
    validate_identity(&body.name, &body.email)?;
    validate_password(&body.password)?;
    let role = match body.role.as_deref() {
        None => Role::User,
        Some(r) => Role::parse(r)
            .ok_or_else(|| AppError::Validation(format!("unknown role: {}", r)))?,
    };

    let mut conn = state.conn()?;
    let email = body.email.trim().to_lowercase();
    let taken: Option<u64> = conn.exec_first(
        "SELECT id FROM users WHERE email = :email",
        params! { "email" => &email },
    )?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!(
            "email {} is already registered",
            email
        )));
    }

    let password_hash = hash_password(body.password).await?;
    // Admin-created accounts are born verified; there is no mail round trip.
    conn.exec_drop(
        "INSERT INTO users (name, email, password_hash, role, verified_at)
         VALUES (:name, :email, :password_hash, :role, NOW())",
        params! {
            "name" => body.name.trim(),
            "email" => &email,
            "password_hash" => &password_hash,
            "role" => role.as_str(),
        },
    )?;
    let id = conn.last_insert_id();
    tracing::info!(user_id = id, role = role.as_str(), "user created");

    let row: Option<UserRow> = conn.exec_first(
        format!("{} WHERE u.id = :id", SELECT_USER),
        params! { "id" => id },
    )?;
    let user =
        row.ok_or_else(|| AppError::Internal("user vanished right after insert".to_string()))?;
    Ok((StatusCode::CREATED, Json(user_from_row(user))))
}

#[derive(Deserialize)]
pub struct UpdateUserInput {
    name: String,
    email: String,
    role: String,
    password: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<UpdateUserInput>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(user_id = id, "update_user started");
    validate_identity(&body.name, &body.email)?;
    let role = Role::parse(&body.role)
        .ok_or_else(|| AppError::Validation(format!("unknown role: {}", body.role)))?;

    let mut conn = state.conn()?;
    let existing: Option<String> = conn.exec_first(
        "SELECT role FROM users WHERE id = :id",
        params! { "id" => id },
    )?;
    let old_role =
        existing.ok_or_else(|| AppError::NotFound(format!("user {} not found", id)))?;

    let email = body.email.trim().to_lowercase();
    let taken: Option<u64> = conn.exec_first(
        "SELECT id FROM users WHERE email = :email AND id <> :id",
        params! { "email" => &email, "id" => id },
    )?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!(
            "email {} is already registered",
            email
        )));
    }

    conn.exec_drop(
        "UPDATE users SET name = :name, email = :email, role = :role WHERE id = :id",
        params! {
            "name" => body.name.trim(),
            "email" => &email,
            "role" => role.as_str(),
            "id" => id,
        },
    )?;

    if let Some(password) = body.password {
        validate_password(&password)?;
        let password_hash = hash_password(password).await?;
        conn.exec_drop(
            "UPDATE users SET password_hash = :password_hash WHERE id = :id",
            params! { "password_hash" => &password_hash, "id" => id },
        )?;
    }

    // Stale sessions must not keep the old privilege level alive.
    if old_role != role.as_str() {
        conn.exec_drop(
            "DELETE FROM sessions WHERE user_id = :id",
            params! { "id" => id },
        )?;
        tracing::info!(user_id = id, "sessions dropped after role change");
    }

    let row: Option<UserRow> = conn.exec_first(
        format!("{} WHERE u.id = :id", SELECT_USER),
        params! { "id" => id },
    )?;
    let user =
        row.ok_or_else(|| AppError::Internal("user vanished during update".to_string()))?;
    Ok(Json(user_from_row(user)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(user_id = id, "delete_user started");
    let mut conn = state.conn()?;

    let exists: Option<u64> = conn.exec_first(
        "SELECT id FROM users WHERE id = :id",
        params! { "id" => id },
    )?;
    if exists.is_none() {
        return Err(AppError::NotFound(format!("user {} not found", id)));
    }

    let post_count: u64 = conn
        .exec_first(
            "SELECT COUNT(*) FROM posts WHERE user_id = :id",
            params! { "id" => id },
        )?
        .unwrap_or(0);
    if post_count > 0 {
        return Err(AppError::Conflict(
            "user still has posts; reassign or delete them first".to_string(),
        ));
    }

    conn.exec_drop("DELETE FROM users WHERE id = :id", params! { "id" => id })?;
    tracing::info!(user_id = id, "user deleted");
    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_validation_catches_blank_name_and_bad_email() {
        assert!(validate_identity("", "a@b.test").is_err());
        assert!(validate_identity("Ana", "not-an-email").is_err());
        assert!(validate_identity("Ana", "ana@example.test").is_ok());
    }

    #[test]
    fn password_validation_requires_eight_chars() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("longenough").is_ok());
    }
}
