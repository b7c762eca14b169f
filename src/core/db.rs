use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::*;
use crate::core::helpers::hash_password;
use crate::follow::follow_user;
use crate::groups::{create_group, get_group};
use crate::posts::{add_comment, create_post, delete_post, NewPost};
use crate::users::{create_user, get_user, NewUser};

/// Byte-oriented key-value backend.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn keys(&self) -> anyhow::Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> anyhow::Result<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

/// Spin key-value store, opened by label on every operation.
pub struct SpinStore {
    label: String,
}

impl SpinStore {
    pub fn new(label: &str) -> Self {
        Self { label: label.to_string() }
    }

    fn open(&self) -> anyhow::Result<spin_sdk::key_value::Store> {
        spin_sdk::key_value::Store::open(&self.label)
            .map_err(|e| anyhow!("failed to open key-value store {}: {}", self.label, e))
    }
}

impl KvStore for SpinStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.open()?.get(key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(self.open()?.set(key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(self.open()?.delete(key)?)
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.open()?.get_keys()?)
    }
}

/// JSON records on top of a [`KvStore`].
///
/// Read-modify-write sequences (index lists, id counters) must hold the
/// guard returned by [`Db::write_lock`].
pub struct Db {
    kv: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
}

impl Db {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn write_lock(&self) -> anyhow::Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| anyhow!("write lock poisoned"))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.kv.set(key, &serde_json::to_vec(value)?)
    }

    pub fn get_bytes(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.kv.get(key)
    }

    pub fn set_bytes(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.kv.set(key, value)
    }

    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.kv.delete(key)
    }

    pub fn list<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Vec<T>> {
        Ok(self.get_json(key)?.unwrap_or_default())
    }

    /// Caller must hold the write lock.
    pub fn next_id(&self, kind: &str) -> anyhow::Result<u64> {
        let key = sequence_key(kind);
        let next = self.get_json::<u64>(&key)?.unwrap_or(0) + 1;
        self.set_json(&key, &next)?;
        Ok(next)
    }
}

struct DemoUser {
    username: &'static str,
    password: &'static str,
    first_name: &'static str,
    posts: &'static [(&'static str, Option<&'static str>)],
}

const DEMO_GROUPS: &[(&str, &str, &str)] = &[
    ("Travel notes", "travel", "Roads, trains and the places in between."),
    ("Kitchen", "kitchen", "Recipes that survived contact with a real stove."),
];

const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        username: "test",
        password: "test-password",
        first_name: "Test",
        posts: &[("This is my first post on Yatube!", None)],
    },
    DemoUser {
        username: "alice",
        password: "alice-password",
        first_name: "Alice",
        posts: &[
            ("Welcome to my blog! Excited to share thoughts here.", None),
            ("Slow-cooked beans, third attempt. This one worked.", Some("kitchen")),
        ],
    },
    DemoUser {
        username: "bob",
        password: "bob-password",
        first_name: "Bob",
        posts: &[("Night train to the coast. Slept through the best part.", Some("travel"))],
    },
];

/// Creates the demo users, groups and posts unless they already exist.
pub fn seed_demo_data(db: &Db) -> anyhow::Result<()> {
    for (title, slug, description) in DEMO_GROUPS {
        if get_group(db, slug)?.is_none() {
            create_group(db, title, slug, description)?;
        }
    }

    for demo in DEMO_USERS {
        if get_user(db, demo.username)?.is_some() {
            debug!(username = demo.username, "demo user already present");
            continue;
        }
        create_user(
            db,
            NewUser {
                username: demo.username.to_string(),
                password_hash: hash_password(demo.password)?,
                first_name: demo.first_name.to_string(),
                last_name: String::new(),
                email: String::new(),
            },
        )?;
        for (text, group) in demo.posts {
            let post = create_post(
                db,
                NewPost {
                    text: text.to_string(),
                    author: demo.username.to_string(),
                    group: group.map(str::to_string),
                    image: None,
                },
            )?;
            if demo.username == "bob" {
                add_comment(db, post.id, "alice", "Which coast?")?;
            }
        }
    }

    follow_user(db, "test", "bob")?;
    info!("demo data ready");
    Ok(())
}

/// Removes every record, including sessions and cached pages.
pub fn reset_db_data(db: &Db) -> anyhow::Result<()> {
    for id in db.list::<u64>(FEED_KEY)? {
        delete_post(db, id)?;
    }
    for key in db.kv().keys()? {
        db.delete(&key)?;
    }
    info!("store cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Db {
        Db::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn json_round_trip_and_missing_keys() {
        let db = db();
        assert_eq!(db.get_json::<Vec<u64>>("nothing").unwrap(), None);
        assert!(db.list::<u64>("nothing").unwrap().is_empty());
        db.set_json("ids", &vec![3u64, 2, 1]).unwrap();
        assert_eq!(db.list::<u64>("ids").unwrap(), vec![3, 2, 1]);
        db.delete("ids").unwrap();
        assert_eq!(db.get_json::<Vec<u64>>("ids").unwrap(), None);
    }

    #[test]
    fn sequences_are_independent_per_kind() {
        let db = db();
        let _guard = db.write_lock().unwrap();
        assert_eq!(db.next_id("post").unwrap(), 1);
        assert_eq!(db.next_id("post").unwrap(), 2);
        assert_eq!(db.next_id("comment").unwrap(), 1);
    }

    #[test]
    fn seeding_is_idempotent() {
        let db = db();
        seed_demo_data(&db).unwrap();
        let posts = db.list::<u64>(FEED_KEY).unwrap().len();
        let users = db.list::<String>(USERS_LIST_KEY).unwrap().len();
        seed_demo_data(&db).unwrap();
        assert_eq!(db.list::<u64>(FEED_KEY).unwrap().len(), posts);
        assert_eq!(db.list::<String>(USERS_LIST_KEY).unwrap().len(), users);
        assert_eq!(users, 3);
        assert!(crate::follow::is_following(&db, "test", "bob").unwrap());
    }

    #[test]
    fn reset_clears_everything() {
        let db = db();
        seed_demo_data(&db).unwrap();
        reset_db_data(&db).unwrap();
        assert!(db.kv().keys().unwrap().is_empty());
    }
}
