use spin_sdk::http::Request;
use tracing::{debug, info};

use crate::auth::{self, Viewer};
use crate::config::*;
use crate::core::db::Db;
use crate::core::errors::{ApiError, HandlerResult};
use crate::core::helpers::{profile_url, redirect, request_path};
use crate::models::Follow;
use crate::users::{get_user, list_usernames};
use crate::App;

/// Adds the `follower -> author` edge. Returns `false` when nothing changed
/// (edge already present, or an attempt to follow yourself).
pub fn follow_user(db: &Db, follower: &str, author: &str) -> anyhow::Result<bool> {
    if follower == author {
        return Ok(false);
    }

    let _guard = db.write_lock()?;
    let followings_key = followings_key(follower);
    let mut followings: Vec<String> = db.list(&followings_key)?;
    if followings.iter().any(|a| a == author) {
        return Ok(false);
    }
    followings.push(author.to_string());
    db.set_json(&followings_key, &followings)?;

    let followers_key = followers_key(author);
    let mut followers: Vec<String> = db.list(&followers_key)?;
    followers.push(follower.to_string());
    db.set_json(&followers_key, &followers)?;
    Ok(true)
}

/// Removes the edge if present. Returns whether it existed.
pub fn unfollow_user(db: &Db, follower: &str, author: &str) -> anyhow::Result<bool> {
    let _guard = db.write_lock()?;
    let followings_key = followings_key(follower);
    let mut followings: Vec<String> = db.list(&followings_key)?;
    let before = followings.len();
    followings.retain(|a| a != author);
    if followings.len() == before {
        return Ok(false);
    }
    db.set_json(&followings_key, &followings)?;

    let followers_key = followers_key(author);
    let mut followers: Vec<String> = db.list(&followers_key)?;
    followers.retain(|f| f != follower);
    db.set_json(&followers_key, &followers)?;
    Ok(true)
}

pub fn is_following(db: &Db, follower: &str, author: &str) -> anyhow::Result<bool> {
    Ok(get_followings(db, follower)?.iter().any(|a| a == author))
}

pub fn get_followings(db: &Db, username: &str) -> anyhow::Result<Vec<String>> {
    db.list(&followings_key(username))
}

pub fn get_followers(db: &Db, username: &str) -> anyhow::Result<Vec<String>> {
    db.list(&followers_key(username))
}

/// Every edge in the graph, grouped by follower in registration order.
pub fn all_follows(db: &Db) -> anyhow::Result<Vec<Follow>> {
    let mut edges = Vec::new();
    for user in list_usernames(db)? {
        for author in get_followings(db, &user)? {
            edges.push(Follow {
                user: user.clone(),
                author,
            });
        }
    }
    Ok(edges)
}

// === HTTP Handlers ===

pub fn profile_follow(app: &App, req: &Request, viewer: &mut Viewer, username: &str) -> HandlerResult {
    let Some(follower) = viewer.username().map(str::to_string) else {
        return Ok(auth::login_redirect(viewer, req));
    };
    if get_user(app.db(), username)?.is_none() {
        return Err(ApiError::NotFound(request_path(req)));
    }

    if follow_user(app.db(), &follower, username)? {
        info!(follower = %follower, author = username, "followed");
    } else {
        debug!(follower = %follower, author = username, "follow was a no-op");
    }
    Ok(redirect(viewer, &profile_url(username)))
}

pub fn profile_unfollow(app: &App, req: &Request, viewer: &mut Viewer, username: &str) -> HandlerResult {
    let Some(follower) = viewer.username().map(str::to_string) else {
        return Ok(auth::login_redirect(viewer, req));
    };
    if get_user(app.db(), username)?.is_none() {
        return Err(ApiError::NotFound(request_path(req)));
    }

    if unfollow_user(app.db(), &follower, username)? {
        info!(follower = %follower, author = username, "unfollowed");
    }
    Ok(redirect(viewer, &profile_url(username)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use std::sync::Arc;

    fn db() -> Db {
        Db::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn follow_is_unique_per_pair() {
        let db = db();
        assert!(follow_user(&db, "ann", "leo").unwrap());
        assert!(!follow_user(&db, "ann", "leo").unwrap());
        assert_eq!(get_followings(&db, "ann").unwrap(), vec!["leo"]);
        assert_eq!(get_followers(&db, "leo").unwrap(), vec!["ann"]);
    }

    #[test]
    fn cannot_follow_yourself() {
        let db = db();
        assert!(!follow_user(&db, "leo", "leo").unwrap());
        assert!(!is_following(&db, "leo", "leo").unwrap());
    }

    #[test]
    fn unfollow_removes_both_directions() {
        let db = db();
        follow_user(&db, "ann", "leo").unwrap();
        follow_user(&db, "bob", "leo").unwrap();
        assert!(unfollow_user(&db, "ann", "leo").unwrap());
        assert!(!unfollow_user(&db, "ann", "leo").unwrap());
        assert!(!is_following(&db, "ann", "leo").unwrap());
        assert_eq!(get_followers(&db, "leo").unwrap(), vec!["bob"]);
    }
}
