use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::POST_TITLE_LENGTH;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Group {
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Post {
    pub id: u64,
    pub text: String,
    pub created: DateTime<Utc>,
    /// Author username.
    pub author: String,
    /// Group slug.
    pub group: Option<String>,
    /// Media path, e.g. `posts/cat.gif`.
    pub image: Option<String>,
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.text.chars().take(POST_TITLE_LENGTH).collect();
        f.write_str(&head)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Comment {
    pub id: u64,
    pub post_id: u64,
    pub author: String,
    pub text: String,
    pub created: DateTime<Utc>,
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Directed edge: `user` follows `author`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Follow {
    pub user: String,
    pub author: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Session {
    pub token: String,
    /// `None` for anonymous sessions, which exist only to carry a CSRF token.
    pub username: Option<String>,
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(text: &str) -> Post {
        Post {
            id: 1,
            text: text.to_string(),
            created: Utc::now(),
            author: "leo".to_string(),
            group: None,
            image: None,
        }
    }

    #[test]
    fn post_displays_first_characters_of_text() {
        assert_eq!(post("A very long post about nothing").to_string(), "A very long pos");
        assert_eq!(post("short").to_string(), "short");
        // counts characters, not bytes
        assert_eq!(post("Здесь будет длинный пост").to_string(), "Здесь будет дли");
    }

    #[test]
    fn group_and_comment_display() {
        let group = Group {
            title: "Cats".to_string(),
            slug: "cats".to_string(),
            description: String::new(),
        };
        assert_eq!(group.to_string(), "Cats");

        let comment = Comment {
            id: 3,
            post_id: 1,
            author: "leo".to_string(),
            text: "nice".to_string(),
            created: Utc::now(),
        };
        assert_eq!(comment.to_string(), "nice");
    }

    #[test]
    fn full_name_falls_back_to_username() {
        let mut user = User {
            id: 1,
            username: "leo".to_string(),
            password: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            date_joined: Utc::now(),
        };
        assert_eq!(user.full_name(), "leo");
        user.first_name = "Leo".to_string();
        user.last_name = "Tolstoy".to_string();
        assert_eq!(user.full_name(), "Leo Tolstoy");
    }
}
