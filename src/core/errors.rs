use http::StatusCode;
use spin_sdk::http::Response;
use thiserror::Error;
use tracing::error;

use crate::templates;

/// Failures that end a request with an error page.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Forbidden")]
    Forbidden,
    /// Answered with 403 rather than a 200 error page.
    #[error("CSRF verification failed: {0}")]
    CsrfFailure(String),
    /// Carries the requested path, shown on the 404 page.
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Internal Error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type HandlerResult = Result<Response, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden | ApiError::CsrfFailure(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn page(&self) -> (&'static str, &'static str, Vec<(&'static str, String)>) {
        match self {
            ApiError::NotFound(path) => (
                "core/404.html",
                "Page not found",
                vec![("path", html_escape::encode_text(path).to_string())],
            ),
            ApiError::Forbidden => ("core/403.html", "Access denied", Vec::new()),
            ApiError::CsrfFailure(reason) => (
                "core/403csrf.html",
                "Request rejected",
                vec![("reason", html_escape::encode_text(reason).to_string())],
            ),
            ApiError::BadRequest(msg) => (
                "core/400.html",
                "Bad request",
                vec![("message", html_escape::encode_text(msg).to_string())],
            ),
            ApiError::MethodNotAllowed => ("core/405.html", "Method not allowed", Vec::new()),
            ApiError::Internal(_) => ("core/500.html", "Server error", Vec::new()),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        if let ApiError::Internal(cause) = &err {
            error!(error = %cause, "request failed");
        }
        let status = err.status().as_u16();
        let (template, title, vars) = err.page();
        match templates::render_page(None, title, template, &vars) {
            Ok(body) => Response::builder()
                .status(status)
                .header("content-type", "text/html; charset=utf-8")
                .body(body)
                .build(),
            Err(render_err) => {
                error!(error = %render_err, template, "failed to render error page");
                Response::builder()
                    .status(status)
                    .header("content-type", "text/plain; charset=utf-8")
                    .body(err.to_string())
                    .build()
            }
        }
    }
}
