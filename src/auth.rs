use chrono::{Duration, Utc};
use spin_sdk::http::Request;
use tracing::{debug, info, warn};

use crate::config::{session_key, user_sessions_key};
use crate::core::db::Db;
use crate::core::errors::{ApiError, HandlerResult};
use crate::core::forms::FormData;
use crate::core::helpers::{new_token, ok_html, redirect, request_path, verify_password};
use crate::core::query_params::{encode_next, get_string, parse_query_params};
use crate::models::{Session, User};
use crate::templates::{self, attr, csrf_input};
use crate::users::get_user;
use crate::App;

pub const SESSION_COOKIE: &str = "sessionid";
pub const CSRF_FIELD: &str = "csrfmiddlewaretoken";

/// Who is making the current request.
#[derive(Default, Debug)]
pub struct Viewer {
    user: Option<User>,
    session: Option<Session>,
    pending_cookie: Option<String>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.csrf_token.as_str())
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    /// `Set-Cookie` value to attach to the response, if the session changed.
    pub fn pending_cookie(&self) -> Option<&str> {
        self.pending_cookie.as_deref()
    }

    /// Distinguishes cached pages rendered for different viewers.
    pub fn cache_identity(&self) -> &str {
        self.username().unwrap_or("-")
    }
}

fn session_cookie(token: &str, max_age_seconds: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_seconds
    )
}

pub fn cookie_value(req: &Request, name: &str) -> Option<String> {
    let header = req.header("cookie")?.as_str()?;
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub fn create_session(db: &Db, username: Option<&str>) -> anyhow::Result<Session> {
    let session = Session {
        token: new_token(),
        username: username.map(str::to_string),
        csrf_token: new_token(),
        created_at: Utc::now(),
    };
    db.set_json(&session_key(&session.token), &session)?;

    if let Some(username) = username {
        let _guard = db.write_lock()?;
        let key = user_sessions_key(username);
        let mut tokens: Vec<String> = db.list(&key)?;
        tokens.push(session.token.clone());
        db.set_json(&key, &tokens)?;
    }
    Ok(session)
}

/// Loads a live session; expired sessions are removed on sight.
pub fn load_session(db: &Db, token: &str, session_hours: i64) -> anyhow::Result<Option<Session>> {
    let Some(session) = db.get_json::<Session>(&session_key(token))? else {
        return Ok(None);
    };
    if session.created_at + Duration::hours(session_hours) < Utc::now() {
        debug!("session expired");
        delete_session(db, &session)?;
        return Ok(None);
    }
    Ok(Some(session))
}

pub fn delete_session(db: &Db, session: &Session) -> anyhow::Result<()> {
    db.delete(&session_key(&session.token))?;
    if let Some(username) = &session.username {
        let _guard = db.write_lock()?;
        let key = user_sessions_key(username);
        let mut tokens: Vec<String> = db.list(&key)?;
        tokens.retain(|t| t != &session.token);
        db.set_json(&key, &tokens)?;
    }
    Ok(())
}

/// Drops every session of `username` except `keep`.
pub fn invalidate_user_sessions(db: &Db, username: &str, keep: Option<&str>) -> anyhow::Result<usize> {
    let _guard = db.write_lock()?;
    let key = user_sessions_key(username);
    let tokens: Vec<String> = db.list(&key)?;
    let (kept, dropped): (Vec<String>, Vec<String>) =
        tokens.into_iter().partition(|t| Some(t.as_str()) == keep);
    for token in &dropped {
        db.delete(&session_key(token))?;
    }
    db.set_json(&key, &kept)?;
    Ok(dropped.len())
}

pub fn resolve_viewer(app: &App, req: &Request) -> anyhow::Result<Viewer> {
    let Some(token) = cookie_value(req, SESSION_COOKIE) else {
        return Ok(Viewer::anonymous());
    };
    let Some(session) = load_session(app.db(), &token, app.config().session_hours)? else {
        return Ok(Viewer::anonymous());
    };

    let user = match &session.username {
        Some(username) => {
            let user = get_user(app.db(), username)?;
            if user.is_none() {
                warn!(username = %username, "session refers to a missing user");
            }
            user
        }
        None => None,
    };

    Ok(Viewer {
        user,
        session: Some(session),
        pending_cookie: None,
    })
}

/// Makes sure the viewer has a session (and so a CSRF token) and returns the token.
pub fn ensure_session(app: &App, viewer: &mut Viewer) -> anyhow::Result<String> {
    if let Some(token) = viewer.csrf_token() {
        return Ok(token.to_string());
    }
    let session = create_session(app.db(), None)?;
    viewer.pending_cookie = Some(session_cookie(&session.token, app.config().session_hours * 3600));
    let csrf = session.csrf_token.clone();
    viewer.session = Some(session);
    Ok(csrf)
}

/// Starts an authenticated session, replacing whatever the viewer had.
pub fn login(app: &App, viewer: &mut Viewer, user: User) -> anyhow::Result<()> {
    if let Some(old) = viewer.session.take() {
        delete_session(app.db(), &old)?;
    }
    let session = create_session(app.db(), Some(&user.username))?;
    viewer.pending_cookie = Some(session_cookie(&session.token, app.config().session_hours * 3600));
    viewer.session = Some(session);
    info!(username = %user.username, "user logged in");
    viewer.user = Some(user);
    Ok(())
}

pub fn logout(app: &App, viewer: &mut Viewer) -> anyhow::Result<()> {
    if let Some(session) = viewer.session.take() {
        delete_session(app.db(), &session)?;
        viewer.pending_cookie = Some(session_cookie("", 0));
    }
    if let Some(user) = viewer.user.take() {
        info!(username = %user.username, "user logged out");
    }
    Ok(())
}

pub fn verify_csrf(viewer: &Viewer, form: &FormData) -> Result<(), ApiError> {
    let Some(expected) = viewer.csrf_token() else {
        return Err(ApiError::CsrfFailure("session cookie not set".to_string()));
    };
    match form.get(CSRF_FIELD) {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ApiError::CsrfFailure("token incorrect".to_string())),
        None => Err(ApiError::CsrfFailure("token missing".to_string())),
    }
}

/// Redirect anonymous users to the login page, remembering where they were going.
pub fn login_redirect(viewer: &Viewer, req: &Request) -> spin_sdk::http::Response {
    let location = format!("/auth/login/?next={}", encode_next(&request_path(req)));
    redirect(viewer, &location)
}

/// Only same-site paths are accepted as redirect targets.
fn safe_next(next: &str) -> Option<&str> {
    (next.starts_with('/') && !next.starts_with("//") && !next.contains('\\')).then_some(next)
}

fn render_login(app: &App, viewer: &mut Viewer, username: &str, next: &str, error: Option<&str>) -> HandlerResult {
    let csrf = ensure_session(app, viewer)?;
    let form_errors = error
        .map(|e| format!(r#"<ul class="errorlist">{}</ul>"#, templates::text(e)))
        .unwrap_or_default();
    let body = templates::render_page(
        viewer.user(),
        "Log in",
        "users/login.html",
        &[
            ("csrf", csrf_input(&csrf)),
            ("next", attr(next)),
            ("username", attr(username)),
            ("form_errors", form_errors),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

pub fn login_page(app: &App, req: &Request, viewer: &mut Viewer) -> HandlerResult {
    let params = parse_query_params(&req.uri());
    let next = get_string(&params, "next", Some("")).unwrap_or_default();
    render_login(app, viewer, "", &next, None)
}

pub fn login_submit(app: &App, viewer: &mut Viewer, form: &FormData) -> HandlerResult {
    let username = form.text("username");
    let password = form.get("password").unwrap_or_default();
    let next = form.text("next");

    let user = get_user(app.db(), &username)?;
    match user {
        Some(user) if verify_password(password, &user.password) => {
            login(app, viewer, user)?;
            let target = safe_next(&next).unwrap_or("/").to_string();
            Ok(redirect(viewer, &target))
        }
        _ => {
            warn!(username = %username, "failed login attempt");
            render_login(
                app,
                viewer,
                &username,
                &next,
                Some("Please enter a correct username and password. Both fields may be case-sensitive."),
            )
        }
    }
}

pub fn logout_view(app: &App, viewer: &mut Viewer) -> HandlerResult {
    logout(app, viewer)?;
    let body = templates::render_page(None, "Logged out", "users/logged_out.html", &[])?;
    Ok(ok_html(viewer, body))
}
