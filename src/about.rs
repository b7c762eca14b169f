use crate::auth::Viewer;
use crate::core::errors::HandlerResult;
use crate::core::helpers::ok_html;
use crate::templates;

pub fn author(viewer: &mut Viewer) -> HandlerResult {
    let body = templates::render_page(viewer.user(), "About the author", "about/author.html", &[])?;
    Ok(ok_html(viewer, body))
}

pub fn tech(viewer: &mut Viewer) -> HandlerResult {
    let body = templates::render_page(viewer.user(), "Technologies", "about/tech.html", &[])?;
    Ok(ok_html(viewer, body))
}
