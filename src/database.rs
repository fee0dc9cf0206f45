use mysql::prelude::Queryable;
use mysql::{Opts, Pool, PooledConn};

use crate::config::AppConfig;
use crate::error::AppError;

/// Shared handles every handler needs: the connection pool and the parsed
/// configuration.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: AppConfig,
}

impl AppState {
    pub fn conn(&self) -> Result<PooledConn, AppError> {
        self.pool.get_conn().map_err(AppError::from)
    }
}

pub fn connect_pool(config: &AppConfig) -> Result<Pool, AppError> {
    let opts = Opts::from_url(&config.database_url)
        .map_err(|e| AppError::Internal(format!("invalid DB_URL: {}", e)))?;
    Pool::new(opts).map_err(AppError::from)
}

/// DDL executed at startup. Statements are idempotent so a restart against an
/// existing database is a no-op.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(190) NOT NULL,
        email VARCHAR(190) NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        role VARCHAR(16) NOT NULL DEFAULT 'user',
        verified_at DATETIME NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
        UNIQUE KEY uniq_users_email (email)
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(190) NOT NULL,
        slug VARCHAR(190) NOT NULL,
        parent_id BIGINT UNSIGNED NULL,
        visible TINYINT(1) NOT NULL DEFAULT 1,
        parent_id_norm BIGINT UNSIGNED AS (COALESCE(parent_id, 0)) STORED,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
        UNIQUE KEY uniq_categories_parent_slug (parent_id_norm, slug),
        CONSTRAINT fk_categories_parent FOREIGN KEY (parent_id)
            REFERENCES categories (id)
    )",
    "CREATE TABLE IF NOT EXISTS posts (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        title VARCHAR(255) NOT NULL,
        slug VARCHAR(190) NOT NULL,
        html MEDIUMTEXT NOT NULL,
        content_text MEDIUMTEXT NOT NULL,
        user_id BIGINT UNSIGNED NOT NULL,
        category_id BIGINT UNSIGNED NOT NULL,
        banner_path VARCHAR(255) NULL,
        gallery JSON NULL,
        status VARCHAR(16) NOT NULL DEFAULT 'draft',
        views BIGINT UNSIGNED NOT NULL DEFAULT 0,
        published_at DATETIME NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
        UNIQUE KEY uniq_posts_slug (slug),
        KEY idx_posts_status_published (status, published_at),
        KEY idx_posts_category (category_id),
        CONSTRAINT fk_posts_user FOREIGN KEY (user_id) REFERENCES users (id),
        CONSTRAINT fk_posts_category FOREIGN KEY (category_id) REFERENCES categories (id)
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token CHAR(36) NOT NULL PRIMARY KEY,
        user_id BIGINT UNSIGNED NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_seen_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        KEY idx_sessions_user (user_id),
        CONSTRAINT fk_sessions_user FOREIGN KEY (user_id)
            REFERENCES users (id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS post_views (
        post_id BIGINT UNSIGNED NOT NULL,
        viewer CHAR(36) NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (post_id, viewer),
        CONSTRAINT fk_post_views_post FOREIGN KEY (post_id)
            REFERENCES posts (id) ON DELETE CASCADE
    )",
];

pub fn ensure_schema(pool: &Pool) -> Result<(), AppError> {
    let mut conn = pool.get_conn()?;
    for statement in SCHEMA {
        conn.query_drop(statement)?;
    }
    tracing::debug!("schema ensured ({} statements)", SCHEMA.len());
    Ok(())
}
