#![allow(dead_code)]

use std::sync::Arc;

use spin_sdk::http::{Method, Request, Response};
use yatube::auth::{create_session, CSRF_FIELD, SESSION_COOKIE};
use yatube::config::{session_key, Config};
use yatube::groups::create_group;
use yatube::models::{Group, Post, Session, User};
use yatube::posts::{create_post, NewPost};
use yatube::users::{create_user, NewUser};
use yatube::App;

pub const SMALL_GIF: &[u8] = b"GIF89a\x02\x00\x01\x00\x80\x00\x00\x00\x00\x00\xFF\xFF\xFF\x21\xF9\x04\x00\x00\x00\x00\x00\x2C\x00\x00\x00\x00\x02\x00\x01\x00\x00\x02\x02\x0C\x0A\x00\x3B";

const BOUNDARY: &str = "----yatube-test-boundary";

pub fn app() -> Arc<App> {
    app_with(Config::default())
}

pub fn app_with(config: Config) -> Arc<App> {
    Arc::new(App::in_memory(config))
}

/// Keys the page cache currently holds in the store.
pub fn cache_entries(app: &App) -> usize {
    app.db()
        .kv()
        .keys()
        .unwrap()
        .iter()
        .filter(|k| k.starts_with(yatube::config::CACHE_PREFIX))
        .count()
}

/// Users get a placeholder hash; tests that log in through the form hash for real.
pub fn user(app: &App, username: &str) -> User {
    create_user(
        app.db(),
        NewUser {
            username: username.to_string(),
            password_hash: "!".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
        },
    )
    .unwrap()
}

pub fn group(app: &App, slug: &str) -> Group {
    create_group(app.db(), &format!("Group {}", slug), slug, "Test description").unwrap()
}

pub fn post(app: &App, author: &str, text: &str, group: Option<&str>) -> Post {
    create_post(
        app.db(),
        NewPost {
            text: text.to_string(),
            author: author.to_string(),
            group: group.map(str::to_string),
            image: None,
        },
    )
    .unwrap()
}

/// Drives `App::handle` directly and keeps the session cookie like a browser.
pub struct TestClient {
    app: Arc<App>,
    session: Option<String>,
}

impl TestClient {
    pub fn new(app: &Arc<App>) -> Self {
        Self {
            app: app.clone(),
            session: None,
        }
    }

    pub fn logged_in(app: &Arc<App>, username: &str) -> Self {
        let mut client = Self::new(app);
        client.force_login(username);
        client
    }

    pub fn force_login(&mut self, username: &str) {
        let session = create_session(self.app.db(), Some(username)).unwrap();
        self.session = Some(session.token);
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn send(&mut self, method: Method, uri: &str, content_type: Option<&str>, body: Vec<u8>) -> Response {
        let mut builder = Request::builder();
        builder.method(method).uri(uri);
        if let Some(token) = &self.session {
            builder.header("cookie", format!("{}={}", SESSION_COOKIE, token));
        }
        if let Some(content_type) = content_type {
            builder.header("content-type", content_type);
        }
        let resp = self.app.handle(builder.body(body).build());

        if let Some(cookie) = resp.header("set-cookie").and_then(|h| h.as_str()) {
            let value = cookie
                .split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            self.session = (!value.is_empty()).then_some(value);
        }
        resp
    }

    pub fn get(&mut self, uri: &str) -> Response {
        self.send(Method::Get, uri, None, Vec::new())
    }

    pub fn request(&mut self, method: Method, uri: &str) -> Response {
        self.send(method, uri, None, Vec::new())
    }

    /// CSRF token of the current session, opening one through the login page if needed.
    pub fn csrf_token(&mut self) -> String {
        if self.session.is_none() {
            self.get("/auth/login/");
        }
        let token = self.session.clone().expect("login page should start a session");
        let session: Session = self.app.db().get_json(&session_key(&token)).unwrap().unwrap();
        session.csrf_token
    }

    pub fn post_form_raw(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.send(Method::Post, uri, Some("application/x-www-form-urlencoded"), body.into_bytes())
    }

    pub fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let csrf = self.csrf_token();
        let mut all = vec![(CSRF_FIELD, csrf.as_str())];
        all.extend_from_slice(fields);
        self.post_form_raw(uri, &all)
    }

    pub fn post_multipart(&mut self, uri: &str, fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Response {
        let csrf = self.csrf_token();
        let mut body = Vec::new();
        for (name, value) in std::iter::once((CSRF_FIELD, csrf.as_str())).chain(fields.iter().copied()) {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((field, file_name, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/gif\r\n\r\n",
                    BOUNDARY, field, file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
        self.send(Method::Post, uri, Some(&content_type), body)
    }
}

pub fn status(resp: &Response) -> u16 {
    *resp.status()
}

pub fn location(resp: &Response) -> Option<String> {
    resp.header("location").and_then(|h| h.as_str()).map(str::to_string)
}

pub fn body(resp: &Response) -> String {
    String::from_utf8_lossy(resp.body()).into_owned()
}

/// Number of post cards rendered on a list page.
pub fn post_cards(resp: &Response) -> usize {
    body(resp).matches("<article class=\"post\"").count()
}
