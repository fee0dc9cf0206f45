use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Datelike, Utc};
use image::ImageFormat;
use mysql::{params, prelude::Queryable};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

use crate::database::AppState;
use crate::error::AppError;
use newsdesk::{generate_token, slugify};

/// Banner uploads land in a year/month folder, mirroring how the source blog
/// platforms shelve their media.
fn banner_folder(year: i32, month: u32) -> String {
    format!("banners/{}/{:02}", year, month)
}

fn gallery_folder(post_id: u64) -> String {
    format!("gallery/{}", post_id)
}

fn extension_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Gif => Some("gif"),
        _ => None,
    }
}

/// Stored gallery file name: ordinal prefix keeps the submitted order stable
/// on disk, the slugified stem keeps it readable.
fn gallery_file_name(index: usize, original: &str, format: ImageFormat) -> String {
    let stem = original
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(original);
    let ext = extension_for(format).unwrap_or("bin");
    format!("{:02}-{}.{}", index + 1, slugify(stem), ext)
}

fn post_media(
    conn: &mut mysql::PooledConn,
    post_id: u64,
) -> Result<(Option<String>, Option<String>), AppError> {
    let row: Option<(Option<String>, Option<String>)> = conn.exec_first(
        "SELECT banner_path, gallery FROM posts WHERE id = :id",
        params! { "id" => post_id },
    )?;
    row.ok_or_else(|| AppError::NotFound(format!("post {} not found", post_id)))
}

fn remove_stored(state: &AppState, relative: &str) {
    let _ = fs::remove_file(state.config.upload_root.join(relative));
}

fn write_stored(state: &AppState, relative: &str, bytes: &[u8]) -> Result<(), AppError> {
    let full: PathBuf = state.config.upload_root.join(relative);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&full, bytes)?;
    Ok(())
}

/// Accepts a multipart `file` field, validates it decodes as an image, and
/// stores JPEG/PNG banners re-encoded as WebP. The previous banner file is
/// replaced.
pub async fn upload_banner(
    State(state): State<AppState>,
    Path(post_id): Path<u64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(post_id = post_id, "upload_banner started");
    let mut conn = state.conn()?;
    let (old_banner, _) = post_media(&mut conn, post_id)?;

    let mut upload: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("failed to read upload: {}", e)))?;
            upload = Some(bytes.to_vec());
        }
    }
    let bytes = upload
        .ok_or_else(|| AppError::Validation("multipart field 'file' is required".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("uploaded file is empty".to_string()));
    }

    let format = image::guess_format(&bytes)
        .map_err(|_| AppError::Validation("upload is not a recognized image".to_string()))?;
    let (data, ext): (Vec<u8>, &str) = match format {
        ImageFormat::Jpeg | ImageFormat::Png => {
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| AppError::Validation(format!("image failed to decode: {}", e)))?;
            let rgba = decoded.to_rgba8();
            let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
            (encoder.encode(82.0).to_vec(), "webp")
        }
        ImageFormat::WebP => (bytes, "webp"),
        ImageFormat::Gif => (bytes, "gif"),
        other => {
            return Err(AppError::Validation(format!(
                "unsupported banner format: {:?}",
                other
            )))
        }
    };

    let now = Utc::now();
    let relative = format!(
        "{}/{}.{}",
        banner_folder(now.year(), now.month()),
        generate_token(),
        ext
    );
    write_stored(&state, &relative, &data)?;

    conn.exec_drop(
        "UPDATE posts SET banner_path = :banner_path WHERE id = :id",
        params! { "banner_path" => &relative, "id" => post_id },
    )?;
    if let Some(old) = old_banner {
        remove_stored(&state, &old);
    }
    tracing::info!(post_id = post_id, path = %relative, "banner stored");

    Ok(Json(json!({ "status": "ok", "banner_path": relative })))
}

#[derive(Deserialize)]
pub struct GalleryEntry {
    filename: String,
    base64: String,
}

/// Replaces a post's gallery with the submitted images, preserving submission
/// order. An empty array clears the gallery.
pub async fn update_gallery(
    State(state): State<AppState>,
    Path(post_id): Path<u64>,
    Json(entries): Json<Vec<GalleryEntry>>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(post_id = post_id, count = entries.len(), "update_gallery started");
    let mut conn = state.conn()?;
    let (_, old_gallery) = post_media(&mut conn, post_id)?;

    let mut paths: Vec<String> = Vec::with_capacity(entries.len());
    let mut files: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let bytes = BASE64.decode(&entry.base64).map_err(|_| {
            AppError::BadRequest(format!("entry {} is not valid base64", index + 1))
        })?;
        let format = image::guess_format(&bytes).map_err(|_| {
            AppError::Validation(format!("entry {} is not a recognized image", index + 1))
        })?;
        image::load_from_memory(&bytes).map_err(|e| {
            AppError::Validation(format!("entry {} failed to decode: {}", index + 1, e))
        })?;
        let relative = format!(
            "{}/{}",
            gallery_folder(post_id),
            gallery_file_name(index, &entry.filename, format)
        );
        paths.push(relative.clone());
        files.push((relative, bytes));
    }

    for (relative, bytes) in &files {
        write_stored(&state, relative, bytes)?;
    }

    let gallery_json = if paths.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&paths).map_err(|e| {
            AppError::Internal(format!("gallery serialization failed: {}", e))
        })?)
    };
    conn.exec_drop(
        "UPDATE posts SET gallery = :gallery WHERE id = :id",
        params! { "gallery" => gallery_json.as_deref(), "id" => post_id },
    )?;

    // Old files that are no longer referenced go away best effort.
    if let Some(old_json) = old_gallery {
        if let Ok(old_paths) = serde_json::from_str::<Vec<String>>(&old_json) {
            for old in old_paths {
                if !paths.contains(&old) {
                    remove_stored(&state, &old);
                }
            }
        }
    }
    tracing::info!(post_id = post_id, stored = paths.len(), "gallery updated");

    Ok(Json(json!({ "status": "ok", "gallery": paths })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_folder_pads_month() {
        assert_eq!(banner_folder(2026, 8), "banners/2026/08");
        assert_eq!(banner_folder(2026, 11), "banners/2026/11");
    }

    #[test]
    fn gallery_file_names_keep_order_and_sanitize() {
        assert_eq!(
            gallery_file_name(0, "Strand Promenade.JPG", ImageFormat::Jpeg),
            "01-strand-promenade.jpg"
        );
        assert_eq!(
            gallery_file_name(11, "weird//name", ImageFormat::Png),
            "12-weird-name.png"
        );
    }

    #[test]
    fn extension_rejects_exotic_formats() {
        assert_eq!(extension_for(ImageFormat::Tiff), None);
        assert_eq!(extension_for(ImageFormat::WebP), Some("webp"));
    }
}
