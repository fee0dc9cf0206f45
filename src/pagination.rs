use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

// Kept flat (no serde flatten) because form-urlencoded deserialization cannot
// see through flattened numeric fields; list queries carry these two fields
// themselves and rebuild this struct.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl PageMeta {
    /// Resolves client paging input against the configured caps and returns
    /// the meta block plus the SQL offset.
    pub fn resolve(query: &PageQuery, config: &AppConfig, total: u64) -> (PageMeta, u64) {
        let per_page = config.page_size(query.per_page);
        let page = query.page.filter(|p| *p >= 1).unwrap_or(1);
        let offset = u64::from(page - 1) * u64::from(per_page);
        (
            PageMeta {
                page,
                per_page,
                total,
            },
            offset,
        )
    }
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults_to_first_page() {
        let cfg = AppConfig::default();
        let (meta, offset) = PageMeta::resolve(
            &PageQuery {
                page: None,
                per_page: None,
            },
            &cfg,
            42,
        );
        assert_eq!(meta.page, 1);
        assert_eq!(meta.per_page, 20);
        assert_eq!(meta.total, 42);
        assert_eq!(offset, 0);
    }

    #[test]
    fn resolve_computes_offset_and_caps_size() {
        let cfg = AppConfig::default();
        let (meta, offset) = PageMeta::resolve(
            &PageQuery {
                page: Some(3),
                per_page: Some(500),
            },
            &cfg,
            1000,
        );
        assert_eq!(meta.per_page, 100);
        assert_eq!(offset, 200);
    }

    #[test]
    fn resolve_treats_page_zero_as_first() {
        let cfg = AppConfig::default();
        let (meta, offset) = PageMeta::resolve(
            &PageQuery {
                page: Some(0),
                per_page: Some(10),
            },
            &cfg,
            5,
        );
        assert_eq!(meta.page, 1);
        assert_eq!(offset, 0);
    }
}
