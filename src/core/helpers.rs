use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use http::StatusCode;
use rand::rngs::OsRng;
use spin_sdk::http::{Request, Response};

use crate::auth::Viewer;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Path component of the request URI, without the query string.
pub fn request_path(req: &Request) -> String {
    req.path().split('?').next().unwrap_or("/").to_string()
}

pub fn profile_url(username: &str) -> String {
    format!("/profile/{}/", urlencoding::encode(username))
}

pub fn post_url(id: u64) -> String {
    format!("/posts/{}/", id)
}

pub fn html(viewer: &Viewer, status: StatusCode, body: String) -> Response {
    let mut builder = Response::builder();
    builder
        .status(status.as_u16())
        .header("content-type", "text/html; charset=utf-8");
    if let Some(cookie) = viewer.pending_cookie() {
        builder.header("set-cookie", cookie);
    }
    builder.body(body).build()
}

pub fn ok_html(viewer: &Viewer, body: String) -> Response {
    html(viewer, StatusCode::OK, body)
}

pub fn redirect(viewer: &Viewer, location: &str) -> Response {
    let mut builder = Response::builder();
    builder.status(StatusCode::FOUND.as_u16()).header("location", location);
    if let Some(cookie) = viewer.pending_cookie() {
        builder.header("set-cookie", cookie);
    }
    builder.build()
}

pub fn permanent_redirect(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY.as_u16())
        .header("location", location)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(new_token(), new_token());
        assert_eq!(new_token().len(), 32);
    }
}
