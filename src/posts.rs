use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use mysql::{params, prelude::Queryable, PooledConn, TxOpts, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::CurrentUser;
use crate::config::AppConfig;
use crate::database::AppState;
use crate::error::AppError;
use crate::pagination::{ListResponse, PageMeta, PageQuery};
use newsdesk::{cookie_value, excerpt, generate_token, html_to_text, slug_candidate, slugify};

const EXCERPT_CHARS: usize = 240;
const VIEWER_COOKIE: &str = "nd_viewer";

/// Post lifecycle. Only `published` posts are publicly visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Draft,
    Published,
    Archived,
}

impl Status {
    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "draft" => Some(Status::Draft),
            "published" => Some(Status::Published),
            "archived" => Some(Status::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Published => "published",
            Status::Archived => "archived",
        }
    }
}

#[derive(Deserialize)]
pub struct PostInput {
    title: String,
    slug: Option<String>,
    html: String,
    category_id: u64,
    status: Option<String>,
}

#[derive(Serialize)]
pub struct AdminPostSummary {
    pub id: u64,
    pub title: String,
    pub slug: String,
    pub status: String,
    pub category: String,
    pub author: String,
    pub views: u64,
    pub created_at: String,
    pub updated_at: String,
    pub published_at: Option<String>,
}

#[derive(Serialize)]
pub struct PublicPostSummary {
    pub id: u64,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub banner_path: Option<String>,
    pub category_name: String,
    pub category_slug: String,
    pub author: String,
    pub views: u64,
    pub published_at: Option<String>,
}

type PublicRow = (
    u64,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    u64,
    Option<String>,
);

fn public_from_row(row: PublicRow) -> PublicPostSummary {
    let (id, title, slug, content_text, banner_path, category_name, category_slug, author, views, published_at) =
        row;
    PublicPostSummary {
        id,
        title,
        slug,
        excerpt: excerpt(&content_text, EXCERPT_CHARS),
        banner_path,
        category_name,
        category_slug,
        author,
        views,
        published_at,
    }
}

const SELECT_PUBLIC: &str = "SELECT p.id, p.title, p.slug, p.content_text, p.banner_path,
    c.name, c.slug, u.name, p.views,
    DATE_FORMAT(p.published_at, '%Y-%m-%d %H:%i:%s')
 FROM posts p
 JOIN categories c ON c.id = p.category_id
 JOIN users u ON u.id = p.user_id";

fn order_clause(sort: Option<&str>, dir: Option<&str>) -> Result<String, AppError> {
    let column = match sort.unwrap_or("created_at") {
        "title" => "p.title",
        "created_at" => "p.created_at",
        "updated_at" => "p.updated_at",
        "published_at" => "p.published_at",
        "views" => "p.views",
        other => {
            return Err(AppError::Validation(format!(
                "unsupported sort column: {}",
                other
            )))
        }
    };
    let direction = match dir.unwrap_or("desc") {
        "asc" => "ASC",
        "desc" => "DESC",
        other => {
            return Err(AppError::Validation(format!(
                "unsupported sort direction: {}",
                other
            )))
        }
    };
    Ok(format!(" ORDER BY {} {}", column, direction))
}

fn unique_slug(
    conn: &mut PooledConn,
    base: &str,
    exclude_id: Option<u64>,
) -> Result<String, AppError> {
    for attempt in 1..=500u32 {
        let candidate = slug_candidate(base, attempt);
        let taken: Option<u64> = conn.exec_first(
            "SELECT id FROM posts WHERE slug = :slug",
            params! { "slug" => &candidate },
        )?;
        match taken {
            Some(existing) if Some(existing) == exclude_id => return Ok(candidate),
            Some(_) => continue,
            None => return Ok(candidate),
        }
    }
    Err(AppError::Internal(format!(
        "no free slug found for {}",
        base
    )))
}

fn check_category(conn: &mut PooledConn, category_id: u64) -> Result<(), AppError> {
    let exists: Option<u64> = conn.exec_first(
        "SELECT id FROM categories WHERE id = :id",
        params! { "id" => category_id },
    )?;
    exists
        .map(|_| ())
        .ok_or_else(|| AppError::Validation(format!("category {} does not exist", category_id)))
}

fn validate_input(body: &PostInput) -> Result<Status, AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if body.html.trim().is_empty() {
        return Err(AppError::Validation("content is required".to_string()));
    }
    match body.status.as_deref() {
        None => Ok(Status::Draft),
        Some(s) => Status::parse(s).ok_or_else(|| {
            AppError::Validation(format!(
                "status must be draft, published or archived, got {}",
                s
            ))
        }),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<PostInput>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("create_post started");
    let status = validate_input(&body)?;
    let mut conn = state.conn()?;
    check_category(&mut conn, body.category_id)?;

    let base = match body.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(explicit) => slugify(explicit),
        None => slugify(body.title.trim()),
    };
    let slug = unique_slug(&mut conn, &base, None)?;
    let content_text = html_to_text(&body.html);

    conn.exec_drop(
        "INSERT INTO posts
            (title, slug, html, content_text, user_id, category_id, status, published_at)
         VALUES
            (:title, :slug, :html, :content_text, :user_id, :category_id, :status,
             IF(:status = 'published', NOW(), NULL))",
        params! {
            "title" => body.title.trim(),
            "slug" => &slug,
            "html" => &body.html,
            "content_text" => &content_text,
            "user_id" => user.id,
            "category_id" => body.category_id,
            "status" => status.as_str(),
        },
    )?;
    let id = conn.last_insert_id();
    tracing::info!(post_id = id, slug = %slug, "post created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "slug": slug, "status": status })),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<PostInput>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(post_id = id, "update_post started");
    let status = validate_input(&body)?;
    let mut conn = state.conn()?;

    let existing: Option<(String, String, Option<String>)> = conn.exec_first(
        "SELECT title, slug, DATE_FORMAT(published_at, '%Y-%m-%d %H:%i:%s')
         FROM posts WHERE id = :id",
        params! { "id" => id },
    )?;
    let (old_title, old_slug, published_at) =
        existing.ok_or_else(|| AppError::NotFound(format!("post {} not found", id)))?;
    check_category(&mut conn, body.category_id)?;

    let title = body.title.trim();
    let slug = match body.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(explicit) => unique_slug(&mut conn, &slugify(explicit), Some(id))?,
        None if title != old_title => unique_slug(&mut conn, &slugify(title), Some(id))?,
        None => old_slug,
    };
    let content_text = html_to_text(&body.html);

    // published_at is stamped on the first draft->published transition and
    // preserved across later status changes.
    let newly_published = status == Status::Published && published_at.is_none();
    conn.exec_drop(
        "UPDATE posts SET
            title = :title, slug = :slug, html = :html, content_text = :content_text,
            category_id = :category_id, status = :status,
            published_at = IF(:newly_published, NOW(), published_at)
         WHERE id = :id",
        params! {
            "title" => title,
            "slug" => &slug,
            "html" => &body.html,
            "content_text" => &content_text,
            "category_id" => body.category_id,
            "status" => status.as_str(),
            "newly_published" => newly_published,
            "id" => id,
        },
    )?;

    Ok(Json(json!({ "id": id, "slug": slug, "status": status })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(post_id = id, "delete_post started");
    let mut conn = state.conn()?;
    let row: Option<(Option<String>, Option<String>)> = conn.exec_first(
        "SELECT banner_path, gallery FROM posts WHERE id = :id",
        params! { "id" => id },
    )?;
    let (banner_path, gallery) =
        row.ok_or_else(|| AppError::NotFound(format!("post {} not found", id)))?;

    conn.exec_drop("DELETE FROM posts WHERE id = :id", params! { "id" => id })?;

    // Uploaded files are cleaned up best effort; the rows are already gone.
    if let Some(banner) = banner_path {
        let _ = std::fs::remove_file(state.config.upload_root.join(&banner));
    }
    if let Some(gallery_json) = gallery {
        if let Ok(paths) = serde_json::from_str::<Vec<String>>(&gallery_json) {
            for path in paths {
                let _ = std::fs::remove_file(state.config.upload_root.join(&path));
            }
        }
    }

    tracing::info!(post_id = id, "post deleted");
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct AdminListQuery {
    q: Option<String>,
    status: Option<String>,
    category_id: Option<u64>,
    user_id: Option<u64>,
    sort: Option<String>,
    dir: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

impl AdminListQuery {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

fn build_admin_filters(query: &AdminListQuery) -> Result<(String, Vec<Value>), AppError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        clauses.push("p.title LIKE ?");
        values.push(Value::from(format!("%{}%", q.trim())));
    }
    if let Some(status) = query.status.as_deref() {
        let status = Status::parse(status).ok_or_else(|| {
            AppError::Validation(format!("unknown status filter: {}", status))
        })?;
        clauses.push("p.status = ?");
        values.push(Value::from(status.as_str()));
    }
    if let Some(category_id) = query.category_id {
        clauses.push("p.category_id = ?");
        values.push(Value::from(category_id));
    }
    if let Some(user_id) = query.user_id {
        clauses.push("p.user_id = ?");
        values.push(Value::from(user_id));
    }

    let fragment = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Ok((fragment, values))
}

pub async fn admin_list(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("list_posts started");
    let mut conn = state.conn()?;
    let (where_sql, values) = build_admin_filters(&query)?;
    let order_sql = order_clause(query.sort.as_deref(), query.dir.as_deref())?;

    let total: u64 = conn
        .exec_first(
            format!("SELECT COUNT(*) FROM posts p{}", where_sql),
            values.clone(),
        )?
        .unwrap_or(0);
    let (meta, offset) = PageMeta::resolve(&query.page_query(), &state.config, total);

    let mut values = values;
    values.push(Value::from(meta.per_page));
    values.push(Value::from(offset));
    let items = conn.exec_map(
        format!(
            "SELECT p.id, p.title, p.slug, p.status, c.name, u.name, p.views,
                DATE_FORMAT(p.created_at, '%Y-%m-%d %H:%i:%s'),
                DATE_FORMAT(p.updated_at, '%Y-%m-%d %H:%i:%s'),
                DATE_FORMAT(p.published_at, '%Y-%m-%d %H:%i:%s')
             FROM posts p
             JOIN categories c ON c.id = p.category_id
             JOIN users u ON u.id = p.user_id{}{} LIMIT ? OFFSET ?",
            where_sql, order_sql
        ),
        values,
        |(id, title, slug, status, category, author, views, created_at, updated_at, published_at)| {
            AdminPostSummary {
                id,
                title,
                slug,
                status,
                category,
                author,
                views,
                created_at,
                updated_at,
                published_at,
            }
        },
    )?;

    Ok(Json(ListResponse { items, meta }))
}

pub async fn admin_detail(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    let row: Option<(
        u64,
        String,
        String,
        String,
        String,
        u64,
        u64,
        Option<String>,
        Option<String>,
        u64,
        Option<String>,
        String,
    )> = conn.exec_first(
        "SELECT id, title, slug, html, status, category_id, user_id, banner_path, gallery,
            views, DATE_FORMAT(published_at, '%Y-%m-%d %H:%i:%s'),
            DATE_FORMAT(updated_at, '%Y-%m-%d %H:%i:%s')
         FROM posts WHERE id = :id",
        params! { "id" => id },
    )?;
    let (
        id,
        title,
        slug,
        html,
        status,
        category_id,
        user_id,
        banner_path,
        gallery,
        views,
        published_at,
        updated_at,
    ) = row.ok_or_else(|| AppError::NotFound(format!("post {} not found", id)))?;

    let gallery: Vec<String> = match gallery {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("stored gallery is not valid JSON: {}", e)))?,
        None => Vec::new(),
    };

    Ok(Json(json!({
        "id": id,
        "title": title,
        "slug": slug,
        "html": html,
        "status": status,
        "category_id": category_id,
        "user_id": user_id,
        "banner_path": banner_path,
        "gallery": gallery,
        "views": views,
        "published_at": published_at,
        "updated_at": updated_at,
    })))
}

#[derive(Deserialize)]
pub struct PublicListQuery {
    category: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

pub async fn list_published(
    State(state): State<AppState>,
    Query(query): Query<PublicListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    let mut where_sql = " WHERE p.status = 'published'".to_string();
    let mut values: Vec<Value> = Vec::new();
    if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
        where_sql.push_str(" AND c.slug = ?");
        values.push(Value::from(category));
    }

    let total: u64 = conn
        .exec_first(
            format!(
                "SELECT COUNT(*) FROM posts p JOIN categories c ON c.id = p.category_id{}",
                where_sql
            ),
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
            "{}{} ORDER BY p.published_at DESC LIMIT ? OFFSET ?",
            SELECT_PUBLIC, where_sql
        ),
        values,
        public_from_row,
    )?;

    Ok(Json(ListResponse { items, meta }))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    page: Option<u32>,
    per_page: Option<u32>,
}

pub async fn search_published(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let term = query.q.trim();
    if term.is_empty() {
        return Err(AppError::Validation("q is required".to_string()));
    }
    let like = format!("%{}%", term);
    let mut conn = state.conn()?;

    let total: u64 = conn
        .exec_first(
            "SELECT COUNT(*) FROM posts p
             WHERE p.status = 'published' AND (p.title LIKE ? OR p.content_text LIKE ?)",
            (&like, &like),
        )?
        .unwrap_or(0);
    let page = PageQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let (meta, offset) = PageMeta::resolve(&page, &state.config, total);

    let items = conn.exec_map(
        format!(
            "{} WHERE p.status = 'published' AND (p.title LIKE ? OR p.content_text LIKE ?)
             ORDER BY p.published_at DESC LIMIT ? OFFSET ?",
            SELECT_PUBLIC
        ),
        (&like, &like, meta.per_page, offset),
        public_from_row,
    )?;

    Ok(Json(ListResponse { items, meta }))
}

/// Published posts of a category set, newest first. Shared by the public
/// category page, which folds a root's visible children into `category_ids`.
pub fn published_in_categories(
    conn: &mut PooledConn,
    category_ids: &[u64],
    page: &PageQuery,
    config: &AppConfig,
) -> Result<(Vec<PublicPostSummary>, PageMeta), AppError> {
    let placeholders = vec!["?"; category_ids.len()].join(",");
    let mut values: Vec<Value> = category_ids.iter().map(|id| Value::from(*id)).collect();

    let total: u64 = conn
        .exec_first(
            format!(
                "SELECT COUNT(*) FROM posts p
                 WHERE p.status = 'published' AND p.category_id IN ({})",
                placeholders
            ),
            values.clone(),
        )?
        .unwrap_or(0);
    let (meta, offset) = PageMeta::resolve(page, config, total);

    values.push(Value::from(meta.per_page));
    values.push(Value::from(offset));
    let items = conn.exec_map(
        format!(
            "{} WHERE p.status = 'published' AND p.category_id IN ({})
             ORDER BY p.published_at DESC LIMIT ? OFFSET ?",
            SELECT_PUBLIC, placeholders
        ),
        values,
        public_from_row,
    )?;
    Ok((items, meta))
}

/// Public article page. The view counter moves at most once per viewer token;
/// first-time readers get the token minted here and set as a cookie.
pub async fn read_published(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    let row: Option<(
        u64,
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        String,
        String,
        u64,
        Option<String>,
    )> = conn.exec_first(
        "SELECT p.id, p.title, p.html, p.banner_path, p.gallery, c.name, c.slug, u.name,
            p.views, DATE_FORMAT(p.published_at, '%Y-%m-%d %H:%i:%s')
         FROM posts p
         JOIN categories c ON c.id = p.category_id
         JOIN users u ON u.id = p.user_id
         WHERE p.slug = :slug AND p.status = 'published'",
        params! { "slug" => &slug },
    )?;
    let (
        id,
        title,
        html,
        banner_path,
        gallery,
        category_name,
        category_slug,
        author,
        mut views,
        published_at,
    ) = row.ok_or_else(|| AppError::NotFound(format!("post {} not found", slug)))?;

    let existing_viewer = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| cookie_value(raw, VIEWER_COOKIE))
        .map(|v| v.to_string());
    let viewer = existing_viewer.clone().unwrap_or_else(generate_token);

    {
        let mut tx = conn.start_transaction(TxOpts::default())?;
        let result = tx.exec_iter(
            "INSERT IGNORE INTO post_views (post_id, viewer) VALUES (:post_id, :viewer)",
            params! { "post_id" => id, "viewer" => &viewer },
        )?;
        let first_sighting = result.affected_rows() == 1;
        drop(result);
        if first_sighting {
            tx.exec_drop(
                "UPDATE posts SET views = views + 1 WHERE id = :id",
                params! { "id" => id },
            )?;
            views += 1;
        }
        tx.commit()?;
    }

    let gallery: Vec<String> = match gallery {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("stored gallery is not valid JSON: {}", e)))?,
        None => Vec::new(),
    };

    let mut response_headers = HeaderMap::new();
    if existing_viewer.is_none() {
        let cookie = format!(
            "{}={}; Path=/; Max-Age=31536000; SameSite=Lax",
            VIEWER_COOKIE, viewer
        );
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| AppError::Internal("viewer cookie was not valid ascii".to_string()))?;
        response_headers.insert(header::SET_COOKIE, value);
    }

    Ok((
        response_headers,
        Json(json!({
            "id": id,
            "title": title,
            "slug": slug,
            "html": html,
            "banner_path": banner_path,
            "gallery": gallery,
            "category_name": category_name,
            "category_slug": category_slug,
            "author": author,
            "views": views,
            "published_at": published_at,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_round_trips() {
        for status in [Status::Draft, Status::Published, Status::Archived] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert_eq!(Status::parse("live"), None);
    }

    #[test]
    fn order_clause_rejects_unknown_column() {
        assert!(order_clause(Some("html"), None).is_err());
        assert_eq!(
            order_clause(Some("views"), Some("asc")).unwrap(),
            " ORDER BY p.views ASC"
        );
    }

    #[test]
    fn admin_filters_bind_one_value_per_clause() {
        let query = AdminListQuery {
            q: Some("budget".to_string()),
            status: Some("draft".to_string()),
            category_id: Some(4),
            user_id: None,
            sort: None,
            dir: None,
            page: None,
            per_page: None,
        };
        let (sql, values) = build_admin_filters(&query).unwrap();
        assert_eq!(sql.matches('?').count(), values.len());
        assert!(sql.contains("p.status = ?"));
    }

    #[test]
    fn admin_filters_reject_unknown_status() {
        let query = AdminListQuery {
            q: None,
            status: Some("live".to_string()),
            category_id: None,
            user_id: None,
            sort: None,
            dir: None,
            page: None,
            per_page: None,
        };
        assert!(build_admin_filters(&query).is_err());
    }

    #[test]
    fn public_row_maps_to_excerpted_summary() {
        let row: PublicRow = (
            1,
            "Title".to_string(),
            "title".to_string(),
            "body text".to_string(),
            None,
            "World".to_string(),
            "world".to_string(),
            "Ana".to_string(),
            9,
            Some("2025-01-01 10:00:00".to_string()),
        );
        let summary = public_from_row(row);
        assert_eq!(summary.excerpt, "body text");
        assert_eq!(summary.category_slug, "world");
    }
}
