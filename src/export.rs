use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use mysql::prelude::Queryable;

use crate::database::AppState;
use crate::error::AppError;

/// Spreadsheet-friendly CSV: UTF-8 BOM so Excel detects the encoding, and a
/// semicolon delimiter so comma-locales import it in one click.
const BOM: &str = "\u{feff}";
const DELIMITER: char = ';';

fn csv_field(value: &str) -> String {
    if value.contains(DELIMITER) || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string());
    line.push_str("\r\n");
    line
}

fn csv_document(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut out = String::from(BOM);
    out.push_str(&csv_line(
        &header.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
    ));
    for row in rows {
        out.push_str(&csv_line(&row));
    }
    out
}

fn csv_response(filename: &str, body: String) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
}

pub async fn categories_csv(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("export_categories started");
    let mut conn = state.conn()?;
    let rows = conn.query_map(
        "SELECT c.id, c.name, c.slug, COALESCE(parent.slug, ''), c.visible,
            (SELECT COUNT(*) FROM posts p WHERE p.category_id = c.id),
            DATE_FORMAT(c.created_at, '%Y-%m-%d %H:%i:%s')
         FROM categories c
         LEFT JOIN categories parent ON parent.id = c.parent_id
         ORDER BY c.id",
        |(id, name, slug, parent_slug, visible, post_count, created_at): (
            u64,
            String,
            String,
            String,
            bool,
            u64,
            String,
        )| {
            vec![
                id.to_string(),
                name,
                slug,
                parent_slug,
                if visible { "1".to_string() } else { "0".to_string() },
                post_count.to_string(),
                created_at,
            ]
        },
    )?;
    let body = csv_document(
        &["id", "name", "slug", "parent", "visible", "posts", "created_at"],
        rows,
    );
    Ok(csv_response("categories.csv", body))
}

pub async fn posts_csv(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    tracing::info!("export_posts started");
    let mut conn = state.conn()?;
    let rows = conn.query_map(
        "SELECT p.id, p.title, p.slug, p.status, c.name, u.name, p.views,
            COALESCE(DATE_FORMAT(p.published_at, '%Y-%m-%d %H:%i:%s'), ''),
            DATE_FORMAT(p.created_at, '%Y-%m-%d %H:%i:%s')
         FROM posts p
         JOIN categories c ON c.id = p.category_id
         JOIN users u ON u.id = p.user_id
         ORDER BY p.id",
        |(id, title, slug, status, category, author, views, published_at, created_at): (
            u64,
            String,
            String,
            String,
            String,
            String,
            u64,
            String,
            String,
        )| {
            vec![
                id.to_string(),
                title,
                slug,
                status,
                category,
                author,
                views.to_string(),
                published_at,
                created_at,
            ]
        },
    )?;
    let body = csv_document(
        &[
            "id",
            "title",
            "slug",
            "status",
            "category",
            "author",
            "views",
            "published_at",
            "created_at",
        ],
        rows,
    );
    Ok(csv_response("posts.csv", body))
}

pub async fn users_csv(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    tracing::info!("export_users started");
    let mut conn = state.conn()?;
    let rows = conn.query_map(
        "SELECT u.id, u.name, u.email, u.role,
            COALESCE(DATE_FORMAT(u.verified_at, '%Y-%m-%d %H:%i:%s'), ''),
            DATE_FORMAT(u.created_at, '%Y-%m-%d %H:%i:%s')
         FROM users u ORDER BY u.id",
        |(id, name, email, role, verified_at, created_at): (
            u64,
            String,
            String,
            String,
            String,
            String,
        )| {
            vec![
                id.to_string(),
                name,
                email,
                role,
                verified_at,
                created_at,
            ]
        },
    )?;
    let body = csv_document(
        &["id", "name", "email", "role", "verified_at", "created_at"],
        rows,
    );
    Ok(csv_response("users.csv", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_pass_through() {
        assert_eq!(csv_field("hello"), "hello");
    }

    #[test]
    fn delimiter_and_quotes_are_escaped() {
        assert_eq!(csv_field("a;b"), "\"a;b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn document_starts_with_bom_and_header() {
        let doc = csv_document(
            &["id", "name"],
            vec![vec!["1".to_string(), "News; daily".to_string()]],
        );
        assert!(doc.starts_with("\u{feff}id;name\r\n"));
        assert!(doc.ends_with("1;\"News; daily\"\r\n"));
    }
}
