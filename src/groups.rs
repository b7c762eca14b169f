use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::bail;
use regex::Regex;
use tracing::info;

use crate::config::*;
use crate::core::db::Db;
use crate::models::Group;

fn slug_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("Regex should compile"))
}

pub fn create_group(db: &Db, title: &str, slug: &str, description: &str) -> anyhow::Result<Group> {
    if !slug_regex().is_match(slug) {
        bail!("invalid group slug {:?}", slug);
    }
    if title.trim().is_empty() || title.chars().count() > MAX_GROUP_TITLE_LENGTH {
        bail!("group title must be 1-{} characters", MAX_GROUP_TITLE_LENGTH);
    }

    let _guard = db.write_lock()?;
    if db.get_json::<Group>(&group_key(slug))?.is_some() {
        bail!("group slug {} is taken", slug);
    }

    let group = Group {
        title: title.trim().to_string(),
        slug: slug.to_string(),
        description: description.to_string(),
    };
    db.set_json(&group_key(slug), &group)?;

    let mut slugs: Vec<String> = db.list(GROUPS_LIST_KEY)?;
    slugs.push(slug.to_string());
    db.set_json(GROUPS_LIST_KEY, &slugs)?;

    info!(slug, "group created");
    Ok(group)
}

pub fn get_group(db: &Db, slug: &str) -> anyhow::Result<Option<Group>> {
    db.get_json(&group_key(slug))
}

/// Groups in creation order.
pub fn list_groups(db: &Db) -> anyhow::Result<Vec<Group>> {
    let mut groups = Vec::new();
    for slug in db.list::<String>(GROUPS_LIST_KEY)? {
        if let Some(group) = get_group(db, &slug)? {
            groups.push(group);
        }
    }
    Ok(groups)
}

pub fn group_map(db: &Db) -> anyhow::Result<HashMap<String, Group>> {
    Ok(list_groups(db)?
        .into_iter()
        .map(|g| (g.slug.clone(), g))
        .collect())
}
