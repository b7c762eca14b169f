use mime_guess::from_path;
use rust_embed::RustEmbed;
use spin_sdk::http::Response;

use crate::config::media_key;
use crate::core::db::Db;
use crate::core::errors::{ApiError, HandlerResult};

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

pub fn serve_static(path: &str) -> HandlerResult {
    let file_path = path.trim_start_matches("/static/");
    if file_path.is_empty() || file_path.contains("..") {
        return Err(ApiError::NotFound(path.to_string()));
    }

    let file = Assets::get(file_path).ok_or_else(|| ApiError::NotFound(path.to_string()))?;
    let mime = from_path(file_path).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("content-type", mime.as_ref())
        .header("cache-control", "public, max-age=3600")
        .body(file.data.to_vec())
        .build())
}

/// Uploaded images live in the store under `media:<path>`.
pub fn serve_media(db: &Db, path: &str) -> HandlerResult {
    let media_path = path.trim_start_matches("/media/");
    if media_path.is_empty() || media_path.contains("..") {
        return Err(ApiError::NotFound(path.to_string()));
    }

    let data = db
        .get_bytes(&media_key(media_path))?
        .ok_or_else(|| ApiError::NotFound(path.to_string()))?;
    let mime = from_path(media_path).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("content-type", mime.as_ref())
        .body(data)
        .build())
}
