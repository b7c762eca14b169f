pub mod models;

pub use models::{Comment, Follow, Group, Post, Session, User};
