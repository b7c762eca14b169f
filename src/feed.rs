use spin_sdk::http::Request;
use tracing::debug;

use crate::auth::{self, Viewer};
use crate::core::errors::{ApiError, HandlerResult};
use crate::core::helpers::{ok_html, profile_url, request_path};
use crate::core::paginator::{page_number, Page, Paginator};
use crate::core::query_params::parse_query_params;
use crate::follow::{get_followers, get_followings, is_following};
use crate::groups::{get_group, group_map};
use crate::models::Post;
use crate::posts::{all_posts, count_posts, posts_where};
use crate::templates::{self, attr, paginator_nav, post_list, text};
use crate::users::get_user;
use crate::App;

/// Page of `posts` picked by the `page` query parameter.
fn paginate(app: &App, req: &Request, posts: Vec<Post>) -> Page<Post> {
    let params = parse_query_params(&req.uri());
    Paginator::new(posts, app.config().posts_per_page).get_page(params.get("page").map(String::as_str))
}

/// Cache key for an index page. Only the resolved page number varies it, so
/// arbitrary query strings share one entry.
fn index_cache_key(app: &App, req: &Request, viewer: &Viewer) -> anyhow::Result<String> {
    let params = parse_query_params(&req.uri());
    let number = page_number(
        params.get("page").map(String::as_str),
        count_posts(app.db())?,
        app.config().posts_per_page,
    );
    Ok(format!("index:{}:{}", viewer.cache_identity(), number))
}

pub fn index(app: &App, req: &Request, viewer: &mut Viewer) -> HandlerResult {
    let cache_key = index_cache_key(app, req, viewer)?;
    if let Some(body) = app.cache().get(&cache_key)? {
        return Ok(ok_html(viewer, body));
    }

    let db = app.db();
    let page = paginate(app, req, all_posts(db)?);
    let groups = group_map(db)?;
    let body = templates::render_page(
        viewer.user(),
        "Latest updates on the site",
        "posts/index.html",
        &[
            ("posts", post_list(&page.object_list, &groups, true)),
            ("paginator", paginator_nav(&page, "/")),
        ],
    )?;

    app.cache().put(&cache_key, &body)?;
    debug!(key = %cache_key, "index rendered");
    Ok(ok_html(viewer, body))
}

pub fn group_list(app: &App, req: &Request, viewer: &mut Viewer, slug: &str) -> HandlerResult {
    let db = app.db();
    let group = get_group(db, slug)?.ok_or_else(|| ApiError::NotFound(request_path(req)))?;

    let posts = posts_where(db, |p| p.group.as_deref() == Some(slug))?;
    let page = paginate(app, req, posts);
    let groups = group_map(db)?;
    let title = format!("Posts of the group {}", group);
    let body = templates::render_page(
        viewer.user(),
        &title,
        "posts/group_list.html",
        &[
            ("group_title", text(&group.title)),
            ("group_description", text(&group.description)),
            ("posts", post_list(&page.object_list, &groups, false)),
            ("paginator", paginator_nav(&page, &request_path(req))),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

fn follow_button(app: &App, viewer: &Viewer, author: &str) -> anyhow::Result<String> {
    let Some(me) = viewer.username() else {
        return Ok(String::new());
    };
    if me == author {
        return Ok(String::new());
    }
    let url = profile_url(author);
    let button = if is_following(app.db(), me, author)? {
        format!(r#"<a class="btn btn-light" href="{}unfollow/" role="button">Unfollow</a>"#, attr(&url))
    } else {
        format!(r#"<a class="btn btn-primary" href="{}follow/" role="button">Follow</a>"#, attr(&url))
    };
    Ok(button)
}

pub fn profile(app: &App, req: &Request, viewer: &mut Viewer, username: &str) -> HandlerResult {
    let db = app.db();
    let author = get_user(db, username)?.ok_or_else(|| ApiError::NotFound(request_path(req)))?;

    let posts = posts_where(db, |p| p.author == author.username)?;
    let post_count = posts.len();
    let page = paginate(app, req, posts);
    let groups = group_map(db)?;
    let title = format!("Profile of {}", author.full_name());
    let body = templates::render_page(
        viewer.user(),
        &title,
        "posts/profile.html",
        &[
            ("author_name", text(&author.full_name())),
            ("post_count", post_count.to_string()),
            ("followers_count", get_followers(db, &author.username)?.len().to_string()),
            ("followings_count", get_followings(db, &author.username)?.len().to_string()),
            ("follow_button", follow_button(app, viewer, &author.username)?),
            ("posts", post_list(&page.object_list, &groups, true)),
            ("paginator", paginator_nav(&page, &request_path(req))),
        ],
    )?;
    Ok(ok_html(viewer, body))
}

pub fn follow_index(app: &App, req: &Request, viewer: &mut Viewer) -> HandlerResult {
    let Some(username) = viewer.username().map(str::to_string) else {
        return Ok(auth::login_redirect(viewer, req));
    };
    let db = app.db();

    let followings = get_followings(db, &username)?;
    let posts = posts_where(db, |p| followings.contains(&p.author))?;
    let page = paginate(app, req, posts);
    let groups = group_map(db)?;
    let body = templates::render_page(
        viewer.user(),
        "Following",
        "posts/follow.html",
        &[
            ("posts", post_list(&page.object_list, &groups, true)),
            ("paginator", paginator_nav(&page, "/follow/")),
        ],
    )?;
    Ok(ok_html(viewer, body))
}
