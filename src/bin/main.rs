#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate yatube;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use tracing::info;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    use yatube::config::Config;
    use yatube::core::db::seed_demo_data;

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request, Response};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => Method::Other(other.to_string()),
            };

            let uri = req.uri().to_string();
            let mut builder = Request::builder();
            builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    builder.header(name.as_str().to_ascii_lowercase(), val_str);
                }
            }
            builder.body(body.to_vec()).build()
        }

        pub fn spin_to_actix_response(spin_resp: Response) -> actix_web::HttpResponse {
            let status = *spin_resp.status();
            let mut response = actix_web::HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status)
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
            );
            for (name, value) in spin_resp.headers() {
                if let Some(val_str) = value.as_str() {
                    response.append_header((name.to_string(), val_str.to_string()));
                }
            }
            response.body(spin_resp.body().to_vec())
        }
    }

    fn init_tracing() {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Lets bodies up to the upload limit (plus form overhead) reach the app,
    /// which answers oversized ones itself.
    fn payload_config(max_upload_bytes: u64) -> web::PayloadConfig {
        let limit = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX).saturating_add(FORM_OVERHEAD_BYTES);
        web::PayloadConfig::new(limit)
    }

    const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

    pub async fn run() -> std::io::Result<()> {
        init_tracing();

        let config = Config::from_env();
        let bind_addr = config.bind_addr.clone();
        let payload = payload_config(config.max_upload_bytes);
        let app = yatube::App::in_memory(config);
        if app.config().seed_demo_data {
            seed_demo_data(app.db()).map_err(std::io::Error::other)?;
        }
        let app = web::Data::new(app);

        info!(addr = %bind_addr, "server listening");
        HttpServer::new(move || {
            App::new()
                .app_data(app.clone())
                .app_data(payload.clone())
                .default_service(web::route().to(handle_all))
        })
            .bind(bind_addr.as_str())?
            .run()
            .await
    }

    async fn handle_all(app: web::Data<yatube::App>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = adapter::actix_to_spin_request(&req, body);
        adapter::spin_to_actix_response(app.handle(spin_req))
    }

    #[cfg(test)]
    mod tests {
        use actix_web::http::header::CONTENT_TYPE;
        use actix_web::test::{call_service, init_service, TestRequest};

        use super::*;

        #[actix_web::test]
        async fn large_bodies_reach_the_app() {
            let config = Config {
                max_upload_bytes: 512 * 1024,
                ..Config::default()
            };
            let payload = payload_config(config.max_upload_bytes);
            let app = web::Data::new(yatube::App::in_memory(config));
            let service = init_service(
                App::new()
                    .app_data(app)
                    .app_data(payload)
                    .default_service(web::route().to(handle_all)),
            )
            .await;

            // well past actix's 256 KiB default; no session, so the CSRF page answers
            let body = format!("text={}", "a".repeat(300 * 1024));
            let req = TestRequest::post()
                .uri("/create/")
                .insert_header((CONTENT_TYPE, "application/x-www-form-urlencoded"))
                .set_payload(body)
                .to_request();
            let resp = call_service(&service, req).await;
            assert_eq!(resp.status().as_u16(), 403);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
