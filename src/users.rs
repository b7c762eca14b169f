use std::sync::OnceLock;

use anyhow::bail;
use chrono::Utc;
use regex::Regex;
use spin_sdk::http::Request;
use tracing::info;

use crate::auth::{self, ensure_session, Viewer};
use crate::config::*;
use crate::core::db::Db;
use crate::core::errors::HandlerResult;
use crate::core::forms::{FieldErrors, FormData};
use crate::core::helpers::{hash_password, ok_html, redirect, verify_password};
use crate::models::User;
use crate::templates::{self, attr, csrf_input, field_errors};
use crate::App;

pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

pub fn get_user(db: &Db, username: &str) -> anyhow::Result<Option<User>> {
    if username.is_empty() {
        return Ok(None);
    }
    db.get_json(&user_key(username))
}

pub fn list_usernames(db: &Db) -> anyhow::Result<Vec<String>> {
    db.list(USERS_LIST_KEY)
}

pub fn create_user(db: &Db, new_user: NewUser) -> anyhow::Result<User> {
    let _guard = db.write_lock()?;
    if db.get_json::<User>(&user_key(&new_user.username))?.is_some() {
        bail!("username {} is taken", new_user.username);
    }

    let user = User {
        id: db.next_id("user")?,
        username: new_user.username,
        password: new_user.password_hash,
        first_name: new_user.first_name,
        last_name: new_user.last_name,
        email: new_user.email,
        date_joined: Utc::now(),
    };
    db.set_json(&user_key(&user.username), &user)?;

    let mut users: Vec<String> = db.list(USERS_LIST_KEY)?;
    users.push(user.username.clone());
    db.set_json(USERS_LIST_KEY, &users)?;

    info!(username = %user.username, "user registered");
    Ok(user)
}

pub fn update_user(db: &Db, user: &User) -> anyhow::Result<()> {
    db.set_json(&user_key(&user.username), user)
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[\w.@+-]+$").expect("Regex should compile"))
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile"))
}

pub fn validate_username(username: &str) -> Option<&'static str> {
    if username.is_empty() {
        Some("This field is required.")
    } else if username.chars().count() > MAX_USERNAME_LENGTH {
        Some("Ensure this value has at most 150 characters.")
    } else if !username_regex().is_match(username) {
        Some("Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.")
    } else {
        None
    }
}

/// Password rules; empty result means acceptable.
pub fn password_problems(password: &str, username: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }
    if !username.is_empty() && password.eq_ignore_ascii_case(username) {
        problems.push("The password is too similar to the username.".to_string());
    }
    problems
}

fn render_signup(app: &App, viewer: &mut Viewer, form: &FormData, errors: &FieldErrors) -> HandlerResult {
    let csrf = ensure_session(app, viewer)?;
    let body = templates::render_page(
        viewer.user(),
        "Sign up",
        "users/signup.html",
        &[
            ("csrf", csrf_input(&csrf)),
            ("first_name", attr(&form.text("first_name"))),
            ("last_name", attr(&form.text("last_name"))),
            ("username", attr(&form.text("username"))),
            ("email", attr(&form.text("email"))),
            ("username_errors", field_errors(errors, "username")),
            ("email_errors", field_errors(errors, "email")),
            ("password1_errors", field_errors(errors, "password1")),
            ("password2_errors", field_errors(errors, "password2")),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

pub fn signup_page(app: &App, viewer: &mut Viewer) -> HandlerResult {
    render_signup(app, viewer, &FormData::default(), &FieldErrors::default())
}

pub fn signup_submit(app: &App, viewer: &mut Viewer, form: &FormData) -> HandlerResult {
    let username = form.text("username");
    let email = form.text("email");
    let password1 = form.get("password1").unwrap_or_default();
    let password2 = form.get("password2").unwrap_or_default();

    let mut errors = FieldErrors::default();
    if let Some(problem) = validate_username(&username) {
        errors.add("username", problem);
    } else if get_user(app.db(), &username)?.is_some() {
        errors.add("username", "A user with that username already exists.");
    }
    if !email.is_empty() && !email_regex().is_match(&email) {
        errors.add("email", "Enter a valid email address.");
    }
    if password1.is_empty() {
        errors.add("password1", "This field is required.");
    }
    if password1 != password2 {
        errors.add("password2", "The two password fields didn't match.");
    } else {
        for problem in password_problems(password1, &username) {
            errors.add("password2", problem);
        }
    }

    if !errors.is_empty() {
        return render_signup(app, viewer, form, &errors);
    }

    let user = create_user(
        app.db(),
        NewUser {
            username,
            password_hash: hash_password(password1)?,
            first_name: form.text("first_name"),
            last_name: form.text("last_name"),
            email,
        },
    )?;
    auth::login(app, viewer, user)?;
    Ok(redirect(viewer, "/"))
}

fn render_password_change(app: &App, viewer: &mut Viewer, errors: &FieldErrors) -> HandlerResult {
    let csrf = ensure_session(app, viewer)?;
    let body = templates::render_page(
        viewer.user(),
        "Change password",
        "users/password_change_form.html",
        &[
            ("csrf", csrf_input(&csrf)),
            ("old_password_errors", field_errors(errors, "old_password")),
            ("new_password1_errors", field_errors(errors, "new_password1")),
            ("new_password2_errors", field_errors(errors, "new_password2")),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

pub fn password_change_page(app: &App, req: &Request, viewer: &mut Viewer) -> HandlerResult {
    if !viewer.is_authenticated() {
        return Ok(auth::login_redirect(viewer, req));
    }
    render_password_change(app, viewer, &FieldErrors::default())
}

pub fn password_change_submit(app: &App, req: &Request, viewer: &mut Viewer, form: &FormData) -> HandlerResult {
    let Some(mut user) = viewer.user().cloned() else {
        return Ok(auth::login_redirect(viewer, req));
    };

    let old_password = form.get("old_password").unwrap_or_default();
    let new_password1 = form.get("new_password1").unwrap_or_default();
    let new_password2 = form.get("new_password2").unwrap_or_default();

    let mut errors = FieldErrors::default();
    if !verify_password(old_password, &user.password) {
        errors.add(
            "old_password",
            "Your old password was entered incorrectly. Please enter it again.",
        );
    }
    if new_password1 != new_password2 {
        errors.add("new_password2", "The two password fields didn't match.");
    } else {
        for problem in password_problems(new_password1, &user.username) {
            errors.add("new_password2", problem);
        }
    }
    if !errors.is_empty() {
        return render_password_change(app, viewer, &errors);
    }

    user.password = hash_password(new_password1)?;
    update_user(app.db(), &user)?;

    // every other device is signed out; this one gets a fresh session
    auth::login(app, viewer, user.clone())?;
    let dropped = auth::invalidate_user_sessions(app.db(), &user.username, viewer.session_token())?;
    info!(username = %user.username, dropped, "password changed");
    Ok(redirect(viewer, "/auth/password_change/done/"))
}

pub fn password_change_done(req: &Request, viewer: &mut Viewer) -> HandlerResult {
    if !viewer.is_authenticated() {
        return Ok(auth::login_redirect(viewer, req));
    }
    let body = templates::render_page(
        viewer.user(),
        "Password changed",
        "users/password_change_done.html",
        &[],
    )?;
    Ok(ok_html(viewer, body))
}
