pub mod about;
pub mod auth;
pub mod config;
pub mod core;
pub mod feed;
pub mod follow;
pub mod groups;
pub mod models;
pub mod posts;
pub mod templates;
pub mod users;

use std::sync::Arc;

use spin_sdk::http::{Method, Request, Response};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::cache::PageCache;
use crate::core::db::{Db, KvStore, MemoryStore};
use crate::core::errors::{ApiError, HandlerResult};
use crate::core::forms::parse_form;
use crate::core::helpers::{permanent_redirect, request_path};
use crate::core::static_server::{serve_media, serve_static};

/// Shared application state; one per process natively, one per request under Spin.
pub struct App {
    config: Config,
    db: Db,
    cache: PageCache,
}

impl App {
    pub fn new(config: Config, kv: Arc<dyn KvStore>) -> Self {
        let cache = PageCache::new(kv.clone(), config.index_cache_seconds);
        Self {
            db: Db::new(kv),
            cache,
            config,
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Routes one request and turns every failure into an error page.
    pub fn handle(&self, req: Request) -> Response {
        let method = req.method().to_string();
        let path = request_path(&req);

        let response = match self.route(&req, &path) {
            Ok(resp) => resp,
            Err(err) => {
                match &err {
                    ApiError::Internal(_) => {}
                    ApiError::NotFound(_) => debug!(method = %method, path = %path, "no such page"),
                    other => warn!(method = %method, path = %path, error = %other, "request rejected"),
                }
                err.into()
            }
        };

        info!(method = %method, path = %path, status = *response.status(), "request handled");
        response
    }

    fn route(&self, req: &Request, path: &str) -> HandlerResult {
        let is_post = match req.method() {
            Method::Get => false,
            Method::Post => true,
            _ => return Err(ApiError::MethodNotAllowed),
        };

        if path.starts_with("/static/") {
            return if is_post { Err(ApiError::MethodNotAllowed) } else { serve_static(path) };
        }
        if path.starts_with("/media/") {
            return if is_post { Err(ApiError::MethodNotAllowed) } else { serve_media(&self.db, path) };
        }
        if !path.ends_with('/') {
            if is_post {
                return Err(ApiError::NotFound(path.to_string()));
            }
            let uri = req.uri();
            let location = match uri.split_once('?') {
                Some((_, query)) => format!("{}/?{}", path, query),
                None => format!("{}/", path),
            };
            return Ok(permanent_redirect(&location));
        }

        let segments = path_segments(path).ok_or_else(|| ApiError::NotFound(path.to_string()))?;
        let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

        let mut viewer = auth::resolve_viewer(self, req)?;
        let form = if is_post {
            let form = parse_form(req, self.config.max_upload_bytes)?;
            auth::verify_csrf(&viewer, &form)?;
            Some(form)
        } else {
            None
        };
        let v = &mut viewer;

        match (form, parts.as_slice()) {
            (None, []) => feed::index(self, req, v),
            (None, ["group", slug]) => feed::group_list(self, req, v, slug),
            (None, ["profile", username]) => feed::profile(self, req, v, username),
            (None, ["profile", username, "follow"]) => follow::profile_follow(self, req, v, username),
            (None, ["profile", username, "unfollow"]) => follow::profile_unfollow(self, req, v, username),
            (None, ["follow"]) => feed::follow_index(self, req, v),

            (None, ["posts", id]) => posts::post_detail(self, req, v, id),
            (None, ["create"]) => posts::post_create_page(self, req, v),
            (Some(form), ["create"]) => posts::post_create_submit(self, req, v, form),
            (None, ["posts", id, "edit"]) => posts::post_edit_page(self, req, v, id),
            (Some(form), ["posts", id, "edit"]) => posts::post_edit_submit(self, req, v, id, form),
            (Some(form), ["posts", id, "comment"]) => posts::add_comment_submit(self, req, v, id, &form),
            (Some(_), ["posts", id, "delete"]) => posts::post_delete_submit(self, req, v, id),

            (None, ["auth", "signup"]) => users::signup_page(self, v),
            (Some(form), ["auth", "signup"]) => users::signup_submit(self, v, &form),
            (None, ["auth", "login"]) => auth::login_page(self, req, v),
            (Some(form), ["auth", "login"]) => auth::login_submit(self, v, &form),
            (_, ["auth", "logout"]) => auth::logout_view(self, v),
            (None, ["auth", "password_change"]) => users::password_change_page(self, req, v),
            (Some(form), ["auth", "password_change"]) => users::password_change_submit(self, req, v, &form),
            (None, ["auth", "password_change", "done"]) => users::password_change_done(req, v),

            (None, ["about", "author"]) => about::author(v),
            (None, ["about", "tech"]) => about::tech(v),

            (_, parts) if route_exists(parts) => Err(ApiError::MethodNotAllowed),
            _ => Err(ApiError::NotFound(path.to_string())),
        }
    }
}

/// Percent-decoded, non-empty path segments. `None` if a segment is not valid UTF-8.
fn path_segments(path: &str) -> Option<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).ok().map(|d| d.into_owned()))
        .collect()
}

fn route_exists(parts: &[&str]) -> bool {
    matches!(
        parts,
        [] | ["group", _]
            | ["profile", _]
            | ["profile", _, "follow" | "unfollow"]
            | ["follow"]
            | ["create"]
            | ["posts", _]
            | ["posts", _, "edit" | "comment" | "delete"]
            | ["auth", "signup" | "login" | "logout" | "password_change"]
            | ["auth", "password_change", "done"]
            | ["about", "author" | "tech"]
    )
}

#[cfg(target_arch = "wasm32")]
mod component {
    use std::sync::Arc;

    use spin_sdk::http::{Request, Response};
    use spin_sdk::http_component;
    use tracing::warn;

    use crate::config::Config;
    use crate::core::db::{seed_demo_data, SpinStore};
    use crate::App;

    #[http_component]
    fn handle_yatube(req: Request) -> anyhow::Result<Response> {
        let config = Config::from_env();
        let store = Arc::new(SpinStore::new(&config.kv_store));
        let app = App::new(config, store);
        if app.config().seed_demo_data {
            if let Err(e) = seed_demo_data(app.db()) {
                warn!(error = %e, "demo data could not be seeded");
            }
        }
        Ok(app.handle(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_decoded() {
        assert_eq!(path_segments("/").unwrap(), Vec::<String>::new());
        assert_eq!(path_segments("/profile/j%C3%B6rg/").unwrap(), vec!["profile", "jörg"]);
        assert!(path_segments("/profile/%FF/").is_none());
    }

    #[test]
    fn known_routes() {
        assert!(route_exists(&["posts", "1", "comment"]));
        assert!(route_exists(&["about", "tech"]));
        assert!(!route_exists(&["posts", "1", "like"]));
    }
}
