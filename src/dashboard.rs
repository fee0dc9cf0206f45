use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use mysql::prelude::Queryable;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::database::AppState;
use crate::error::AppError;

#[derive(Serialize)]
pub struct Bucket {
    pub label: String,
    pub count: u64,
}

/// Walks the last `days` calendar days ending at `today`, filling buckets the
/// GROUP BY left empty with explicit zeros so the chart has no gaps.
fn fill_days(counts: &HashMap<String, u64>, today: NaiveDate, days: i64) -> Vec<Bucket> {
    (0..days)
        .rev()
        .map(|back| {
            let day = today - Duration::days(back);
            let label = day.format("%Y-%m-%d").to_string();
            let count = counts.get(&label).copied().unwrap_or(0);
            Bucket { label, count }
        })
        .collect()
}

fn fill_months(counts: &HashMap<String, u64>, today: NaiveDate, months: i32) -> Vec<Bucket> {
    let end = today.year() * 12 + today.month0() as i32;
    (0..months)
        .rev()
        .map(|back| {
            let absolute = end - back;
            let label = format!("{:04}-{:02}", absolute / 12, absolute % 12 + 1);
            let count = counts.get(&label).copied().unwrap_or(0);
            Bucket { label, count }
        })
        .collect()
}

fn fill_years(counts: &HashMap<String, u64>, current_year: i32) -> Vec<Bucket> {
    let first = counts
        .keys()
        .filter_map(|y| y.parse::<i32>().ok())
        .min()
        .unwrap_or(current_year);
    (first..=current_year)
        .map(|year| {
            let label = year.to_string();
            let count = counts.get(&label).copied().unwrap_or(0);
            Bucket { label, count }
        })
        .collect()
}

#[derive(Deserialize)]
pub struct StatsQuery {
    granularity: Option<String>,
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("dashboard_stats started");
    let granularity = query.granularity.as_deref().unwrap_or("day");
    let mut conn = state.conn()?;
    let today = Utc::now().date_naive();

    let series = match granularity {
        "day" => {
            let rows: Vec<(String, u64)> = conn.query_map(
                "SELECT DATE_FORMAT(created_at, '%Y-%m-%d'), COUNT(*)
                 FROM posts
                 WHERE created_at >= DATE_SUB(CURDATE(), INTERVAL 29 DAY)
                 GROUP BY 1",
                |row| row,
            )?;
            fill_days(&rows.into_iter().collect(), today, 30)
        }
        "month" => {
            let rows: Vec<(String, u64)> = conn.query_map(
                "SELECT DATE_FORMAT(created_at, '%Y-%m'), COUNT(*)
                 FROM posts
                 WHERE created_at >= DATE_SUB(DATE_FORMAT(CURDATE(), '%Y-%m-01'), INTERVAL 11 MONTH)
                 GROUP BY 1",
                |row| row,
            )?;
            fill_months(&rows.into_iter().collect(), today, 12)
        }
        "year" => {
            let rows: Vec<(String, u64)> = conn.query_map(
                "SELECT DATE_FORMAT(created_at, '%Y'), COUNT(*) FROM posts GROUP BY 1",
                |row| row,
            )?;
            fill_years(&rows.into_iter().collect(), today.year())
        }
        other => {
            return Err(AppError::Validation(format!(
                "granularity must be day, month or year, got {}",
                other
            )))
        }
    };

    let totals: Option<(u64, u64, u64, u64, u64, u64)> = conn.query_first(
        "SELECT
            (SELECT COUNT(*) FROM posts WHERE status = 'draft'),
            (SELECT COUNT(*) FROM posts WHERE status = 'published'),
            (SELECT COUNT(*) FROM posts WHERE status = 'archived'),
            (SELECT COUNT(*) FROM categories),
            (SELECT COUNT(*) FROM users),
            (SELECT CAST(COALESCE(SUM(views), 0) AS UNSIGNED) FROM posts)",
    )?;
    let (drafts, published, archived, categories, users, views) =
        totals.ok_or_else(|| AppError::Internal("totals query returned no row".to_string()))?;

    Ok(Json(json!({
        "granularity": granularity,
        "series": series,
        "totals": {
            "posts": { "draft": drafts, "published": published, "archived": archived },
            "categories": categories,
            "users": users,
            "views": views,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_series_is_dense_and_ordered() {
        let mut counts = HashMap::new();
        counts.insert("2026-08-05".to_string(), 3);
        counts.insert("2026-08-01".to_string(), 1);
        let series = fill_days(&counts, date(2026, 8, 5), 30);
        assert_eq!(series.len(), 30);
        assert_eq!(series[0].label, "2026-07-07");
        assert_eq!(series[29].label, "2026-08-05");
        assert_eq!(series[29].count, 3);
        assert_eq!(series[25].count, 1);
        assert_eq!(series[24].count, 0);
    }

    #[test]
    fn month_series_crosses_year_boundary() {
        let counts = HashMap::from([("2025-12".to_string(), 2)]);
        let series = fill_months(&counts, date(2026, 3, 15), 12);
        assert_eq!(series.len(), 12);
        assert_eq!(series[0].label, "2025-04");
        assert_eq!(series[11].label, "2026-03");
        assert_eq!(series[8].label, "2025-12");
        assert_eq!(series[8].count, 2);
    }

    #[test]
    fn year_series_spans_first_post_to_now() {
        let counts = HashMap::from([("2023".to_string(), 7)]);
        let series = fill_years(&counts, 2026);
        let labels: Vec<&str> = series.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2023", "2024", "2025", "2026"]);
        assert_eq!(series[0].count, 7);
        assert_eq!(series[1].count, 0);
    }

    #[test]
    fn empty_year_series_still_emits_current_year() {
        let series = fill_years(&HashMap::new(), 2026);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].label, "2026");
    }
}
