//! HTML rendering: embedded templates with `{{ name }}` placeholders plus the
//! fragments (post cards, paginator, form widgets) that pages share.
//!
//! Placeholder values are inserted verbatim, so callers escape user data
//! before handing it over.

use std::collections::HashMap;
use std::sync::OnceLock;

use ammonia::Builder;
use anyhow::anyhow;
use chrono::{DateTime, Datelike, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use rust_embed::RustEmbed;
use tracing::debug;

use crate::core::forms::FieldErrors;
use crate::core::paginator::Page;
use crate::models::{Comment, Group, Post, User};

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

pub type Vars<'a> = [(&'a str, String)];

fn load(name: &str) -> anyhow::Result<String> {
    let file = Templates::get(name).ok_or_else(|| anyhow!("template {} not found", name))?;
    Ok(String::from_utf8(file.data.to_vec())?)
}

/// Single pass substitution; inserted values are never rescanned.
fn fill(template: &str, vars: &Vars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => debug!(placeholder = name, "template placeholder left empty"),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

pub fn render(name: &str, vars: &Vars) -> anyhow::Result<String> {
    Ok(fill(&load(name)?, vars))
}

/// Renders `template` and wraps it in the site layout.
pub fn render_page(viewer: Option<&User>, title: &str, template: &str, vars: &Vars) -> anyhow::Result<String> {
    let content = render(template, vars)?;
    render(
        "base.html",
        &[
            ("title", encode_text(title).to_string()),
            ("nav", nav(viewer)),
            ("content", content),
            ("year", Utc::now().year().to_string()),
        ],
    )
}

pub fn nav(viewer: Option<&User>) -> String {
    let mut links = vec![
        r#"<a href="/">Home</a>"#.to_string(),
        r#"<a href="/about/author/">About</a>"#.to_string(),
        r#"<a href="/about/tech/">Tech</a>"#.to_string(),
    ];
    match viewer {
        Some(user) => {
            links.push(r#"<a href="/create/">New post</a>"#.to_string());
            links.push(r#"<a href="/follow/">Following</a>"#.to_string());
            links.push(r#"<a href="/auth/password_change/">Change password</a>"#.to_string());
            links.push(r#"<a href="/auth/logout/">Log out</a>"#.to_string());
            links.push(format!(
                r#"<span class="nav-user">User: <a href="/profile/{}/">{}</a></span>"#,
                encode_double_quoted_attribute(&user.username),
                encode_text(&user.username)
            ));
        }
        None => {
            links.push(r#"<a href="/auth/login/">Log in</a>"#.to_string());
            links.push(r#"<a href="/auth/signup/">Sign up</a>"#.to_string());
        }
    }
    format!("<nav>{}</nav>", links.join("\n"))
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%d %b %Y %H:%M").to_string()
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<>]+").expect("Regex should compile"))
}

/// Escapes user text, links bare URLs and keeps line breaks.
pub fn render_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for url in url_regex().find_iter(text) {
        out.push_str(&encode_text(&text[last..url.start()]));
        out.push_str(&format!(
            r#"<a href="{}">{}</a>"#,
            encode_double_quoted_attribute(url.as_str()),
            encode_text(url.as_str())
        ));
        last = url.end();
    }
    out.push_str(&encode_text(&text[last..]));

    let with_breaks = out.replace("\r\n", "\n").replace('\n', "<br>\n");
    Builder::default()
        .link_rel(Some("noopener noreferrer"))
        .clean(&with_breaks)
        .to_string()
}

pub fn media_url(path: &str) -> String {
    format!("/media/{}", path)
}

pub fn post_card(post: &Post, groups: &HashMap<String, Group>, show_group: bool) -> String {
    let image = post
        .image
        .as_deref()
        .map(|path| {
            format!(
                r#"<img class="post-image" src="{}" alt="">"#,
                encode_double_quoted_attribute(&media_url(path))
            )
        })
        .unwrap_or_default();

    let group = match (&post.group, show_group) {
        (Some(slug), true) => {
            let title = groups.get(slug).map(|g| g.title.as_str()).unwrap_or(slug.as_str());
            format!(
                r#"<a class="post-group" href="/group/{}/">All posts of the group {}</a>"#,
                encode_double_quoted_attribute(slug),
                encode_text(title)
            )
        }
        _ => String::new(),
    };

    format!(
        r#"<article class="post" data-post-id="{id}">
  <ul class="post-meta">
    <li>Author: <a href="/profile/{author_attr}/">{author}</a></li>
    <li>Published: {date}</li>
  </ul>
  {image}
  <div class="post-text">{text}</div>
  <a class="post-link" href="/posts/{id}/">Details</a>
  {group}
</article>"#,
        id = post.id,
        author_attr = encode_double_quoted_attribute(&post.author),
        author = encode_text(&post.author),
        date = format_date(&post.created),
        image = image,
        text = render_text(&post.text),
        group = group,
    )
}

pub fn post_list(posts: &[Post], groups: &HashMap<String, Group>, show_group: bool) -> String {
    if posts.is_empty() {
        return r#"<p class="empty">No posts yet.</p>"#.to_string();
    }
    posts
        .iter()
        .map(|post| post_card(post, groups, show_group))
        .collect::<Vec<_>>()
        .join("\n<hr>\n")
}

pub fn paginator_nav<T>(page: &Page<T>, base_path: &str) -> String {
    if !page.has_other_pages() {
        return String::new();
    }
    let link = |number: usize, label: &str| {
        format!(
            r#"<li><a href="{}?page={}">{}</a></li>"#,
            encode_double_quoted_attribute(base_path),
            number,
            label
        )
    };

    let mut items = Vec::new();
    if page.has_previous() {
        items.push(link(1, "&laquo; First"));
        items.push(link(page.number - 1, "Previous"));
    }
    items.push(format!(
        r#"<li class="current">Page {} of {}</li>"#,
        page.number, page.num_pages
    ));
    if page.has_next() {
        items.push(link(page.number + 1, "Next"));
        items.push(link(page.num_pages, "Last &raquo;"));
    }
    format!(r#"<ul class="pagination">{}</ul>"#, items.join(""))
}

pub fn comment_list(comments: &[Comment]) -> String {
    comments
        .iter()
        .map(|comment| {
            format!(
                r#"<div class="comment"><h5><a href="/profile/{attr}/">{author}</a> <small>{date}</small></h5><p>{text}</p></div>"#,
                attr = encode_double_quoted_attribute(&comment.author),
                author = encode_text(&comment.author),
                date = format_date(&comment.created),
                text = render_text(&comment.text),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn csrf_input(token: &str) -> String {
    format!(
        r#"<input type="hidden" name="csrfmiddlewaretoken" value="{}">"#,
        encode_double_quoted_attribute(token)
    )
}

pub fn field_errors(errors: &FieldErrors, field: &str) -> String {
    let messages = errors.get(field);
    if messages.is_empty() {
        return String::new();
    }
    let items: Vec<String> = messages
        .iter()
        .map(|m| format!("<li>{}</li>", encode_text(m)))
        .collect();
    format!(r#"<ul class="errorlist">{}</ul>"#, items.join(""))
}

pub fn group_options(groups: &[Group], selected: Option<&str>) -> String {
    let mut options = vec![format!(
        r#"<option value=""{}>---------</option>"#,
        if selected.is_none() { " selected" } else { "" }
    )];
    for group in groups {
        let is_selected = selected == Some(group.slug.as_str());
        options.push(format!(
            r#"<option value="{}"{}>{}</option>"#,
            encode_double_quoted_attribute(&group.slug),
            if is_selected { " selected" } else { "" },
            encode_text(&group.title)
        ));
    }
    options.join("\n")
}

pub fn attr(value: &str) -> String {
    encode_double_quoted_attribute(value).to_string()
}

pub fn text(value: &str) -> String {
    encode_text(value).to_string()
}
