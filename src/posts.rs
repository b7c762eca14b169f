use anyhow::anyhow;
use chrono::Utc;
use spin_sdk::http::Request;
use tracing::{info, warn};

use crate::auth::{self, ensure_session, Viewer};
use crate::config::*;
use crate::core::db::Db;
use crate::core::errors::{ApiError, HandlerResult};
use crate::core::forms::{detect_image, FieldErrors, FormData, UploadedFile};
use crate::core::helpers::{ok_html, post_url, profile_url, redirect, request_path};
use crate::groups::{get_group, list_groups};
use crate::models::{Comment, Post};
use crate::templates::{self, attr, csrf_input, field_errors, format_date, group_options, media_url, render_text, text};
use crate::users::get_user;
use crate::App;

pub struct NewPost {
    pub text: String,
    pub author: String,
    pub group: Option<String>,
    pub image: Option<String>,
}

// === Storage ===

pub fn create_post(db: &Db, new_post: NewPost) -> anyhow::Result<Post> {
    let _guard = db.write_lock()?;
    let post = Post {
        id: db.next_id("post")?,
        text: new_post.text,
        created: Utc::now(),
        author: new_post.author,
        group: new_post.group,
        image: new_post.image,
    };
    db.set_json(&post_key(post.id), &post)?;

    let mut feed: Vec<u64> = db.list(FEED_KEY)?;
    feed.insert(0, post.id); // prepend newest
    db.set_json(FEED_KEY, &feed)?;
    Ok(post)
}

pub fn get_post(db: &Db, id: u64) -> anyhow::Result<Option<Post>> {
    db.get_json(&post_key(id))
}

/// Author and creation time are fixed; only content fields are written back.
pub fn update_post(db: &Db, post: &Post) -> anyhow::Result<()> {
    let stored = get_post(db, post.id)?.ok_or_else(|| anyhow!("post {} does not exist", post.id))?;
    let updated = Post {
        author: stored.author,
        created: stored.created,
        ..post.clone()
    };
    db.set_json(&post_key(post.id), &updated)
}

/// Deletes the post together with its comments and stored image.
pub fn delete_post(db: &Db, id: u64) -> anyhow::Result<bool> {
    let Some(post) = get_post(db, id)? else {
        return Ok(false);
    };

    let _guard = db.write_lock()?;
    for comment_id in db.list::<u64>(&post_comments_key(id))? {
        db.delete(&comment_key(comment_id))?;
    }
    db.delete(&post_comments_key(id))?;
    if let Some(image) = &post.image {
        db.delete(&media_key(image))?;
    }
    db.delete(&post_key(id))?;

    let mut feed: Vec<u64> = db.list(FEED_KEY)?;
    feed.retain(|p| *p != id);
    db.set_json(FEED_KEY, &feed)?;
    Ok(true)
}

/// Every post, newest first.
pub fn all_posts(db: &Db) -> anyhow::Result<Vec<Post>> {
    posts_where(db, |_| true)
}

pub fn posts_where(db: &Db, keep: impl Fn(&Post) -> bool) -> anyhow::Result<Vec<Post>> {
    let mut posts = Vec::new();
    for id in db.list::<u64>(FEED_KEY)? {
        if let Some(post) = get_post(db, id)? {
            if keep(&post) {
                posts.push(post);
            }
        }
    }
    Ok(posts)
}

pub fn count_posts(db: &Db) -> anyhow::Result<usize> {
    Ok(db.list::<u64>(FEED_KEY)?.len())
}

pub fn add_comment(db: &Db, post_id: u64, author: &str, text: &str) -> anyhow::Result<Comment> {
    let _guard = db.write_lock()?;
    let comment = Comment {
        id: db.next_id("comment")?,
        post_id,
        author: author.to_string(),
        text: text.to_string(),
        created: Utc::now(),
    };
    db.set_json(&comment_key(comment.id), &comment)?;

    let key = post_comments_key(post_id);
    let mut ids: Vec<u64> = db.list(&key)?;
    ids.push(comment.id);
    db.set_json(&key, &ids)?;
    Ok(comment)
}

/// Comments of a post, oldest first.
pub fn comments_for(db: &Db, post_id: u64) -> anyhow::Result<Vec<Comment>> {
    let mut comments = Vec::new();
    for id in db.list::<u64>(&post_comments_key(post_id))? {
        if let Some(comment) = db.get_json::<Comment>(&comment_key(id))? {
            comments.push(comment);
        }
    }
    Ok(comments)
}

pub fn count_comments(db: &Db) -> anyhow::Result<usize> {
    let mut total = 0;
    for id in db.list::<u64>(FEED_KEY)? {
        total += db.list::<u64>(&post_comments_key(id))?.len();
    }
    Ok(total)
}

fn clean_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Stores an uploaded image under `posts/`, renaming on collision.
pub fn save_image(db: &Db, file: &UploadedFile) -> anyhow::Result<String> {
    let name = clean_file_name(&file.file_name);
    let mut path = format!("posts/{}", name);

    let _guard = db.write_lock()?;
    if db.get_bytes(&media_key(&path))?.is_some() {
        let suffix = &crate::core::helpers::new_token()[..7];
        path = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("posts/{}_{}.{}", stem, suffix, ext),
            None => format!("posts/{}_{}", name, suffix),
        };
    }
    db.set_bytes(&media_key(&path), &file.data)?;
    Ok(path)
}

// === Forms ===

struct PostInput {
    text: String,
    group: Option<String>,
    image: Option<UploadedFile>,
    clear_image: bool,
}

fn validate_post_form(db: &Db, form: &mut FormData) -> anyhow::Result<(PostInput, FieldErrors)> {
    let mut errors = FieldErrors::default();

    let text = form.get("text").unwrap_or_default().to_string();
    if text.trim().is_empty() {
        errors.add("text", "This field is required.");
    }

    let group_slug = form.text("group");
    let group = if group_slug.is_empty() {
        None
    } else if get_group(db, &group_slug)?.is_some() {
        Some(group_slug)
    } else {
        errors.add("group", "Select a valid choice. That choice is not one of the available choices.");
        None
    };

    let image = form.take_file("image");
    if let Some(file) = &image {
        if file.data.is_empty() {
            errors.add("image", "The submitted file is empty.");
        } else if detect_image(&file.data).is_none() {
            errors.add(
                "image",
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            );
        }
    }

    let input = PostInput {
        text,
        group,
        image,
        clear_image: form.flag("image-clear"),
    };
    Ok((input, errors))
}

struct PostFormPage<'a> {
    editing: Option<&'a Post>,
    text: &'a str,
    group: Option<&'a str>,
    errors: &'a FieldErrors,
}

fn render_post_form(app: &App, viewer: &mut Viewer, page: PostFormPage<'_>) -> HandlerResult {
    let csrf = ensure_session(app, viewer)?;
    let groups = list_groups(app.db())?;

    let (title, heading, action, submit_label) = match page.editing {
        Some(post) => ("Edit post", "Edit post", format!("/posts/{}/edit/", post.id), "Save"),
        None => ("New post", "New post", "/create/".to_string(), "Add"),
    };
    let current_image = page
        .editing
        .and_then(|post| post.image.as_deref())
        .map(|path| {
            format!(
                r#"<p class="current-image">Currently: <a href="{url}">{path}</a>
      <label><input type="checkbox" name="image-clear" id="image-clear_id"> Clear</label></p>"#,
                url = attr(&media_url(path)),
                path = text(path),
            )
        })
        .unwrap_or_default();

    let body = templates::render_page(
        viewer.user(),
        title,
        "posts/create_post.html",
        &[
            ("heading", heading.to_string()),
            ("action", attr(&action)),
            ("csrf", csrf_input(&csrf)),
            ("text", text(page.text)),
            ("text_errors", field_errors(page.errors, "text")),
            ("group_options", group_options(&groups, page.group)),
            ("group_errors", field_errors(page.errors, "group")),
            ("current_image", current_image),
            ("image_errors", field_errors(page.errors, "image")),
            ("submit_label", submit_label.to_string()),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

fn parse_post_id(req: &Request, raw: &str) -> Result<u64, ApiError> {
    raw.parse::<u64>().map_err(|_| ApiError::NotFound(request_path(req)))
}

fn load_post(app: &App, req: &Request, raw_id: &str) -> Result<Post, ApiError> {
    let id = parse_post_id(req, raw_id)?;
    get_post(app.db(), id)?.ok_or_else(|| ApiError::NotFound(request_path(req)))
}

// === HTTP Handlers ===

pub fn post_detail(app: &App, req: &Request, viewer: &mut Viewer, raw_id: &str) -> HandlerResult {
    let post = load_post(app, req, raw_id)?;
    let db = app.db();

    let author = get_user(db, &post.author)?;
    let author_name = author.as_ref().map(|a| a.full_name()).unwrap_or_else(|| post.author.clone());
    let author_post_count = posts_where(db, |p| p.author == post.author)?.len();
    let comments = comments_for(db, post.id)?;

    let group = match &post.group {
        Some(slug) => match get_group(db, slug)? {
            Some(group) => format!(
                r#"<li>Group: <a href="/group/{}/">{}</a></li>"#,
                attr(&group.slug),
                text(&group.title)
            ),
            None => String::new(),
        },
        None => String::new(),
    };
    let image = post
        .image
        .as_deref()
        .map(|path| format!(r#"<img class="post-image" src="{}" alt="">"#, attr(&media_url(path))))
        .unwrap_or_default();

    let is_author = viewer.username() == Some(post.author.as_str());
    let (comment_form, author_actions) = if viewer.is_authenticated() {
        let csrf = ensure_session(app, viewer)?;
        let comment_form = format!(
            r#"<div class="card comment-form">
  <h5 class="card-header">Add a comment:</h5>
  <form method="post" action="/posts/{id}/comment/">
    {csrf}
    <textarea name="text" id="id_text" rows="3" required></textarea>
    <button type="submit" class="btn">Send</button>
  </form>
</div>"#,
            id = post.id,
            csrf = csrf_input(&csrf),
        );
        let actions = if is_author {
            format!(
                r#"<div class="author-actions">
  <a class="btn" href="/posts/{id}/edit/">Edit post</a>
  <form method="post" action="/posts/{id}/delete/">
    {csrf}
    <button type="submit" class="btn btn-light">Delete post</button>
  </form>
</div>"#,
                id = post.id,
                csrf = csrf_input(&csrf),
            )
        } else {
            String::new()
        };
        (comment_form, actions)
    } else {
        (String::new(), String::new())
    };

    let title = format!("Post {}", post);
    let body = templates::render_page(
        viewer.user(),
        &title,
        "posts/post_detail.html",
        &[
            ("post_id", post.id.to_string()),
            ("date", format_date(&post.created)),
            ("group", group),
            ("author_attr", attr(&post.author)),
            ("author_name", text(&author_name)),
            ("author_post_count", author_post_count.to_string()),
            ("image", image),
            ("text", render_text(&post.text)),
            ("author_actions", author_actions),
            ("comment_form", comment_form),
            ("comments", templates::comment_list(&comments)),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

pub fn post_create_page(app: &App, req: &Request, viewer: &mut Viewer) -> HandlerResult {
    if !viewer.is_authenticated() {
        return Ok(auth::login_redirect(viewer, req));
    }
    render_post_form(
        app,
        viewer,
        PostFormPage {
            editing: None,
            text: "",
            group: None,
            errors: &FieldErrors::default(),
        },
    )
}

pub fn post_create_submit(app: &App, req: &Request, viewer: &mut Viewer, mut form: FormData) -> HandlerResult {
    let Some(author) = viewer.username().map(str::to_string) else {
        return Ok(auth::login_redirect(viewer, req));
    };

    let (input, errors) = validate_post_form(app.db(), &mut form)?;
    if !errors.is_empty() {
        return render_post_form(
            app,
            viewer,
            PostFormPage {
                editing: None,
                text: &input.text,
                group: input.group.as_deref(),
                errors: &errors,
            },
        );
    }

    let image = match &input.image {
        Some(file) => Some(save_image(app.db(), file)?),
        None => None,
    };
    let post = create_post(
        app.db(),
        NewPost {
            text: input.text,
            author: author.clone(),
            group: input.group,
            image,
        },
    )?;
    info!(post_id = post.id, author = %author, "post created");
    Ok(redirect(viewer, &profile_url(&author)))
}

pub fn post_edit_page(app: &App, req: &Request, viewer: &mut Viewer, raw_id: &str) -> HandlerResult {
    if !viewer.is_authenticated() {
        return Ok(auth::login_redirect(viewer, req));
    }
    let post = load_post(app, req, raw_id)?;
    if viewer.username() != Some(post.author.as_str()) {
        return Ok(redirect(viewer, &post_url(post.id)));
    }
    render_post_form(
        app,
        viewer,
        PostFormPage {
            editing: Some(&post),
            text: &post.text,
            group: post.group.as_deref(),
            errors: &FieldErrors::default(),
        },
    )
}

pub fn post_edit_submit(app: &App, req: &Request, viewer: &mut Viewer, raw_id: &str, mut form: FormData) -> HandlerResult {
    if !viewer.is_authenticated() {
        return Ok(auth::login_redirect(viewer, req));
    }
    let mut post = load_post(app, req, raw_id)?;
    if viewer.username() != Some(post.author.as_str()) {
        warn!(post_id = post.id, user = ?viewer.username(), "edit attempt by non-author");
        return Ok(redirect(viewer, &post_url(post.id)));
    }

    let (input, errors) = validate_post_form(app.db(), &mut form)?;
    if !errors.is_empty() {
        return render_post_form(
            app,
            viewer,
            PostFormPage {
                editing: Some(&post),
                text: &input.text,
                group: input.group.as_deref(),
                errors: &errors,
            },
        );
    }

    let old_image = post.image.clone();
    if let Some(file) = &input.image {
        post.image = Some(save_image(app.db(), file)?);
    } else if input.clear_image {
        post.image = None;
    }
    if let Some(old) = old_image.filter(|old| post.image.as_ref() != Some(old)) {
        app.db().delete(&media_key(&old))?;
    }

    post.text = input.text;
    post.group = input.group;
    update_post(app.db(), &post)?;
    info!(post_id = post.id, "post edited");
    Ok(redirect(viewer, &post_url(post.id)))
}

pub fn add_comment_submit(app: &App, req: &Request, viewer: &mut Viewer, raw_id: &str, form: &FormData) -> HandlerResult {
    let Some(author) = viewer.username().map(str::to_string) else {
        return Ok(auth::login_redirect(viewer, req));
    };
    let post = load_post(app, req, raw_id)?;

    let body = form.get("text").unwrap_or_default();
    if body.trim().is_empty() {
        warn!(post_id = post.id, "empty comment ignored");
    } else {
        let comment = add_comment(app.db(), post.id, &author, body)?;
        info!(post_id = post.id, comment_id = comment.id, author = %author, "comment added");
    }
    Ok(redirect(viewer, &post_url(post.id)))
}

pub fn post_delete_submit(app: &App, req: &Request, viewer: &mut Viewer, raw_id: &str) -> HandlerResult {
    let Some(username) = viewer.username().map(str::to_string) else {
        return Ok(auth::login_redirect(viewer, req));
    };
    let post = load_post(app, req, raw_id)?;
    if post.author != username {
        warn!(post_id = post.id, user = %username, "delete attempt by non-author");
        return Err(ApiError::Forbidden);
    }

    delete_post(app.db(), post.id)?;
    info!(post_id = post.id, author = %username, "post deleted");
    Ok(redirect(viewer, &profile_url(&username)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use std::sync::Arc;

    fn db() -> Db {
        Db::new(Arc::new(MemoryStore::new()))
    }

    fn new_post(author: &str, text: &str) -> NewPost {
        NewPost {
            text: text.to_string(),
            author: author.to_string(),
            group: None,
            image: None,
        }
    }

    #[test]
    fn feed_is_newest_first() {
        let db = db();
        let first = create_post(&db, new_post("leo", "first")).unwrap();
        let second = create_post(&db, new_post("ann", "second")).unwrap();
        let ids: Vec<u64> = all_posts(&db).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(count_posts(&db).unwrap(), 2);
    }

    #[test]
    fn update_keeps_author_and_creation_time() {
        let db = db();
        let post = create_post(&db, new_post("leo", "text")).unwrap();
        let mut changed = post.clone();
        changed.text = "new text".to_string();
        changed.author = "mallory".to_string();
        update_post(&db, &changed).unwrap();

        let stored = get_post(&db, post.id).unwrap().unwrap();
        assert_eq!(stored.text, "new text");
        assert_eq!(stored.author, "leo");
        assert_eq!(stored.created, post.created);
    }

    #[test]
    fn delete_cascades_comments_and_image() {
        let db = db();
        let image = save_image(
            &db,
            &UploadedFile {
                file_name: "cat.gif".to_string(),
                content_type: "image/gif".to_string(),
                data: b"GIF89a....".to_vec(),
            },
        )
        .unwrap();
        let post = create_post(
            &db,
            NewPost {
                image: Some(image.clone()),
                ..new_post("leo", "with comments")
            },
        )
        .unwrap();
        let comment = add_comment(&db, post.id, "ann", "hi").unwrap();
        assert_eq!(count_comments(&db).unwrap(), 1);

        assert!(delete_post(&db, post.id).unwrap());
        assert!(!delete_post(&db, post.id).unwrap());
        assert_eq!(count_comments(&db).unwrap(), 0);
        assert!(db.get_json::<Comment>(&comment_key(comment.id)).unwrap().is_none());
        assert!(db.get_bytes(&media_key(&image)).unwrap().is_none());
        assert_eq!(count_posts(&db).unwrap(), 0);
    }

    #[test]
    fn image_names_are_cleaned_and_deduplicated() {
        let db = db();
        let file = UploadedFile {
            file_name: "../my cat.gif".to_string(),
            content_type: "image/gif".to_string(),
            data: b"GIF89a".to_vec(),
        };
        let first = save_image(&db, &file).unwrap();
        assert_eq!(first, "posts/my_cat.gif");
        let second = save_image(&db, &file).unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with("posts/my_cat_") && second.ends_with(".gif"));
    }

    #[test]
    fn comments_keep_insertion_order() {
        let db = db();
        let post = create_post(&db, new_post("leo", "x")).unwrap();
        add_comment(&db, post.id, "ann", "one").unwrap();
        add_comment(&db, post.id, "bob", "two").unwrap();
        let texts: Vec<String> = comments_for(&db, post.id).unwrap().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
