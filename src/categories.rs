use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use mysql::{params, prelude::Queryable, PooledConn, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::database::AppState;
use crate::error::AppError;
use crate::pagination::{ListResponse, PageMeta, PageQuery};
use crate::posts;
use newsdesk::{slug_candidate, slugify};

#[derive(Deserialize)]
pub struct CategoryInput {
    name: String,
    slug: Option<String>,
    parent_id: Option<u64>,
    visible: Option<bool>,
}

#[derive(Serialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<u64>,
    pub visible: bool,
    pub post_count: u64,
    pub created_at: String,
    pub updated_at: String,
}

type CategoryRow = (
    u64,
    String,
    String,
    Option<u64>,
    bool,
    u64,
    String,
    String,
);

fn category_from_row(row: CategoryRow) -> Category {
    let (id, name, slug, parent_id, visible, post_count, created_at, updated_at) = row;
    Category {
        id,
        name,
        slug,
        parent_id,
        visible,
        post_count,
        created_at,
        updated_at,
    }
}

const SELECT_CATEGORY: &str = "SELECT c.id, c.name, c.slug, c.parent_id, c.visible,
    (SELECT COUNT(*) FROM posts p WHERE p.category_id = c.id) AS post_count,
    DATE_FORMAT(c.created_at, '%Y-%m-%d %H:%i:%s'),
    DATE_FORMAT(c.updated_at, '%Y-%m-%d %H:%i:%s')
 FROM categories c";

/// ORDER BY is always taken from this whitelist, never from raw client input.
fn order_clause(sort: Option<&str>, dir: Option<&str>) -> Result<String, AppError> {
    let column = match sort.unwrap_or("created_at") {
        "name" => "c.name",
        "created_at" => "c.created_at",
        "updated_at" => "c.updated_at",
        "post_count" => "post_count",
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

fn parse_date(value: &str, field: &str) -> Result<String, AppError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("{} must be a YYYY-MM-DD date", field)))?;
    Ok(value.to_string())
}

#[derive(Deserialize)]
pub struct CategoryListQuery {
    q: Option<String>,
    kind: Option<String>,
    visible: Option<bool>,
    min_posts: Option<u64>,
    created_from: Option<String>,
    created_to: Option<String>,
    sort: Option<String>,
    dir: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

impl CategoryListQuery {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Composes the WHERE clause for the admin listing from the optional filters.
/// Returns the SQL fragment and the positional parameters it binds.
fn build_filters(query: &CategoryListQuery) -> Result<(String, Vec<Value>), AppError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        clauses.push("c.name LIKE ?");
        values.push(Value::from(format!("%{}%", q.trim())));
    }
    match query.kind.as_deref() {
        Some("root") => clauses.push("c.parent_id IS NULL"),
        Some("child") => clauses.push("c.parent_id IS NOT NULL"),
        Some(other) => {
            return Err(AppError::Validation(format!(
                "kind must be root or child, got {}",
                other
            )))
        }
        None => {}
    }
    if let Some(visible) = query.visible {
        clauses.push("c.visible = ?");
        values.push(Value::from(visible));
    }
    if let Some(min_posts) = query.min_posts {
        clauses.push("(SELECT COUNT(*) FROM posts p WHERE p.category_id = c.id) >= ?");
        values.push(Value::from(min_posts));
    }
    if let Some(from) = query.created_from.as_deref() {
        clauses.push("c.created_at >= ?");
        values.push(Value::from(parse_date(from, "created_from")?));
    }
    if let Some(to) = query.created_to.as_deref() {
        clauses.push("c.created_at < DATE_ADD(?, INTERVAL 1 DAY)");
        values.push(Value::from(parse_date(to, "created_to")?));
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
    Query(query): Query<CategoryListQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("list_categories started");
    let mut conn = state.conn()?;
    let (where_sql, values) = build_filters(&query)?;
    let order_sql = order_clause(query.sort.as_deref(), query.dir.as_deref())?;

    let total: u64 = conn
        .exec_first(
            format!("SELECT COUNT(*) FROM categories c{}", where_sql),
            values.clone(),
        )?
        .unwrap_or(0);
    let (meta, offset) = PageMeta::resolve(&query.page_query(), &state.config, total);

    let mut values = values;
    values.push(Value::from(meta.per_page));
    values.push(Value::from(offset));
    let items = conn
        .exec_map(
            format!("{}{}{} LIMIT ? OFFSET ?", SELECT_CATEGORY, where_sql, order_sql),
            values,
            category_from_row,
        )?;

    Ok(Json(ListResponse { items, meta }))
}

pub async fn admin_detail(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    let row: Option<CategoryRow> = conn.exec_first(
        format!("{} WHERE c.id = :id", SELECT_CATEGORY),
        params! { "id" => id },
    )?;
    let category =
        row.ok_or_else(|| AppError::NotFound(format!("category {} not found", id)))?;
    Ok(Json(category_from_row(category)))
}

fn unique_slug(
    conn: &mut PooledConn,
    base: &str,
    parent_norm: u64,
    exclude_id: Option<u64>,
) -> Result<String, AppError> {
    for attempt in 1..=500u32 {
        let candidate = slug_candidate(base, attempt);
        let taken: Option<u64> = conn.exec_first(
            "SELECT id FROM categories WHERE parent_id_norm = :norm AND slug = :slug",
            params! { "norm" => parent_norm, "slug" => &candidate },
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

/// Validates the parent reference: it must exist and must itself be a root,
/// keeping the hierarchy at two levels.
fn check_parent(conn: &mut PooledConn, parent_id: u64) -> Result<(), AppError> {
    let parent: Option<Option<u64>> = conn.exec_first(
        "SELECT parent_id FROM categories WHERE id = :id",
        params! { "id" => parent_id },
    )?;
    match parent {
        None => Err(AppError::Validation(format!(
            "parent category {} does not exist",
            parent_id
        ))),
        Some(Some(_)) => Err(AppError::Validation(
            "categories can only be nested one level deep".to_string(),
        )),
        Some(None) => Ok(()),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CategoryInput>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("create_category started");
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    let mut conn = state.conn()?;
    if let Some(parent_id) = body.parent_id {
        check_parent(&mut conn, parent_id)?;
    }

    let base = match body.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(explicit) => slugify(explicit),
        None => slugify(name),
    };
    let parent_norm = body.parent_id.unwrap_or(0);
    let slug = unique_slug(&mut conn, &base, parent_norm, None)?;

    conn.exec_drop(
        "INSERT INTO categories (name, slug, parent_id, visible) VALUES (:name, :slug, :parent_id, :visible)",
        params! {
            "name" => name,
            "slug" => &slug,
            "parent_id" => body.parent_id,
            "visible" => body.visible.unwrap_or(true),
        },
    )?;
    let id = conn.last_insert_id();
    tracing::info!(category_id = id, slug = %slug, "category created");

    let row: Option<CategoryRow> = conn.exec_first(
        format!("{} WHERE c.id = :id", SELECT_CATEGORY),
        params! { "id" => id },
    )?;
    let category = row.ok_or_else(|| {
        AppError::Internal("category vanished right after insert".to_string())
    })?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(category_from_row(category)),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<CategoryInput>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(category_id = id, "update_category started");
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    let mut conn = state.conn()?;

    let existing: Option<(String, String, Option<u64>)> = conn.exec_first(
        "SELECT name, slug, parent_id FROM categories WHERE id = :id",
        params! { "id" => id },
    )?;
    let (old_name, old_slug, old_parent) =
        existing.ok_or_else(|| AppError::NotFound(format!("category {} not found", id)))?;

    if body.parent_id == Some(id) {
        return Err(AppError::Validation(
            "a category cannot be its own parent".to_string(),
        ));
    }
    if let Some(parent_id) = body.parent_id {
        check_parent(&mut conn, parent_id)?;
        let child_count: u64 = conn
            .exec_first(
                "SELECT COUNT(*) FROM categories WHERE parent_id = :id",
                params! { "id" => id },
            )?
            .unwrap_or(0);
        if child_count > 0 {
            return Err(AppError::Validation(
                "a category with children cannot become a child itself".to_string(),
            ));
        }
    }

    // Re-derive the slug when the client supplied one, when the name changed,
    // or when the parent scope changed (per-parent uniqueness).
    let parent_norm = body.parent_id.unwrap_or(0);
    let slug = match body.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(explicit) => unique_slug(&mut conn, &slugify(explicit), parent_norm, Some(id))?,
        None if name != old_name => {
            unique_slug(&mut conn, &slugify(name), parent_norm, Some(id))?
        }
        None if body.parent_id != old_parent => {
            unique_slug(&mut conn, &old_slug, parent_norm, Some(id))?
        }
        None => old_slug,
    };

    conn.exec_drop(
        "UPDATE categories SET name = :name, slug = :slug, parent_id = :parent_id, visible = :visible
         WHERE id = :id",
        params! {
            "name" => name,
            "slug" => &slug,
            "parent_id" => body.parent_id,
            "visible" => body.visible.unwrap_or(true),
            "id" => id,
        },
    )?;

    let row: Option<CategoryRow> = conn.exec_first(
        format!("{} WHERE c.id = :id", SELECT_CATEGORY),
        params! { "id" => id },
    )?;
    let category = row
        .ok_or_else(|| AppError::Internal("category vanished during update".to_string()))?;
    Ok(Json(category_from_row(category)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(category_id = id, "delete_category started");
    let mut conn = state.conn()?;

    let exists: Option<u64> = conn.exec_first(
        "SELECT id FROM categories WHERE id = :id",
        params! { "id" => id },
    )?;
    if exists.is_none() {
        return Err(AppError::NotFound(format!("category {} not found", id)));
    }

    let child_count: u64 = conn
        .exec_first(
            "SELECT COUNT(*) FROM categories WHERE parent_id = :id",
            params! { "id" => id },
        )?
        .unwrap_or(0);
    if child_count > 0 {
        return Err(AppError::Conflict(
            "category still has child categories".to_string(),
        ));
    }
    let post_count: u64 = conn
        .exec_first(
            "SELECT COUNT(*) FROM posts WHERE category_id = :id",
            params! { "id" => id },
        )?
        .unwrap_or(0);
    if post_count > 0 {
        return Err(AppError::Conflict("category still has posts".to_string()));
    }

    conn.exec_drop(
        "DELETE FROM categories WHERE id = :id",
        params! { "id" => id },
    )?;
    tracing::info!(category_id = id, "category deleted");
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Serialize)]
pub struct TreeNode {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub post_count: u64,
    pub children: Vec<TreeNode>,
}

type TreeRow = (u64, String, String, Option<u64>, u64);

/// Builds the public two-level tree from visible-category rows. Children whose
/// parent is hidden (absent from the rows) are dropped with it.
fn assemble_tree(rows: Vec<TreeRow>) -> Vec<TreeNode> {
    let mut roots: Vec<TreeNode> = Vec::new();
    for (id, name, slug, parent_id, post_count) in &rows {
        if parent_id.is_none() {
            roots.push(TreeNode {
                id: *id,
                name: name.clone(),
                slug: slug.clone(),
                post_count: *post_count,
                children: Vec::new(),
            });
        }
    }
    for (id, name, slug, parent_id, post_count) in rows {
        if let Some(parent) = parent_id {
            if let Some(root) = roots.iter_mut().find(|r| r.id == parent) {
                root.children.push(TreeNode {
                    id,
                    name,
                    slug,
                    post_count,
                    children: Vec::new(),
                });
            }
        }
    }
    roots
}

pub async fn public_tree(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    let rows: Vec<TreeRow> = conn.query_map(
        "SELECT c.id, c.name, c.slug, c.parent_id,
            (SELECT COUNT(*) FROM posts p
             WHERE p.category_id = c.id AND p.status = 'published') AS post_count
         FROM categories c WHERE c.visible = 1 ORDER BY c.name",
        |row| row,
    )?;
    Ok(Json(assemble_tree(rows)))
}

pub async fn public_posts(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.conn()?;
    let row: Option<(u64, String, Option<u64>)> = conn.exec_first(
        "SELECT id, name, parent_id FROM categories WHERE slug = :slug AND visible = 1",
        params! { "slug" => &slug },
    )?;
    let (id, name, parent_id) =
        row.ok_or_else(|| AppError::NotFound(format!("category {} not found", slug)))?;

    // A child page only exists while its root is visible.
    if let Some(parent) = parent_id {
        let parent_visible: Option<u64> = conn.exec_first(
            "SELECT id FROM categories WHERE id = :id AND visible = 1",
            params! { "id" => parent },
        )?;
        if parent_visible.is_none() {
            return Err(AppError::NotFound(format!("category {} not found", slug)));
        }
    }

    let mut ids = vec![id];
    if parent_id.is_none() {
        let children: Vec<u64> = conn.exec_map(
            "SELECT id FROM categories WHERE parent_id = :id AND visible = 1",
            params! { "id" => id },
            |child_id| child_id,
        )?;
        ids.extend(children);
    }

    let (items, meta) = posts::published_in_categories(&mut conn, &ids, &page, &state.config)?;
    Ok(Json(json!({
        "category": { "id": id, "name": name, "slug": slug },
        "items": items,
        "meta": meta,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_clause_accepts_whitelisted_columns() {
        assert_eq!(
            order_clause(Some("name"), Some("asc")).unwrap(),
            " ORDER BY c.name ASC"
        );
        assert_eq!(
            order_clause(None, None).unwrap(),
            " ORDER BY c.created_at DESC"
        );
        assert_eq!(
            order_clause(Some("post_count"), Some("desc")).unwrap(),
            " ORDER BY post_count DESC"
        );
    }

    #[test]
    fn order_clause_rejects_unknown_input() {
        assert!(order_clause(Some("password_hash"), None).is_err());
        assert!(order_clause(Some("name"), Some("sideways")).is_err());
    }

    #[test]
    fn filters_compose_in_declaration_order() {
        let query = CategoryListQuery {
            q: Some("news".to_string()),
            kind: Some("root".to_string()),
            visible: Some(true),
            min_posts: Some(3),
            created_from: Some("2024-01-01".to_string()),
            created_to: None,
            sort: None,
            dir: None,
            page: None,
            per_page: None,
        };
        let (sql, values) = build_filters(&query).unwrap();
        assert!(sql.starts_with(" WHERE c.name LIKE ?"));
        assert!(sql.contains("c.parent_id IS NULL"));
        assert!(sql.contains("c.visible = ?"));
        assert!(sql.contains(">= ?"));
        assert!(sql.contains("c.created_at >= ?"));
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn filters_reject_bad_kind_and_date() {
        let mut query = CategoryListQuery {
            q: None,
            kind: Some("grandchild".to_string()),
            visible: None,
            min_posts: None,
            created_from: None,
            created_to: None,
            sort: None,
            dir: None,
            page: None,
            per_page: None,
        };
        assert!(build_filters(&query).is_err());
        query.kind = None;
        query.created_from = Some("01/02/2024".to_string());
        assert!(build_filters(&query).is_err());
    }

    #[test]
    fn tree_drops_orphans_of_hidden_roots() {
        let rows = vec![
            (1, "World".to_string(), "world".to_string(), None, 5),
            (2, "Europe".to_string(), "europe".to_string(), Some(1), 2),
            // parent 9 is hidden, so this child never surfaces
            (3, "Orphan".to_string(), "orphan".to_string(), Some(9), 1),
        ];
        let tree = assemble_tree(rows);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].slug, "world");
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].slug, "europe");
    }
}
