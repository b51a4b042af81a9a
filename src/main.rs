//! Edge gate server binary.
//!
//! Every inbound request passes through the authentication gate, which lets it
//! through, redirects it to the login page, or refreshes expired credentials
//! before letting it through. Allowed requests are proxied to the origin
//! application. The main entry point builds the Axum router and starts the
//! HTTP listener plus an optional HTTPS listener.

mod background;
mod config;
mod cookies;
mod csrf;
mod error;
mod gate;
mod http;
mod issuer;
mod logging;
mod proxy;
mod routes;
mod tls;
mod token;
mod version;

use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::get;
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::background::spawn_background_tasks;
use crate::config::{Args, INTERNAL_PATH_PREFIX};
use crate::gate::Gate;
use crate::http::{RequestScheme, build_cors_layer, resolve_client_ip};
use crate::proxy::OriginProxy;

shadow!(build);

/// Starts the gate and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let gate = Arc::new(Gate::from_args(&args).map_err(std::io::Error::other)?);
    let origin = Arc::new(OriginProxy::new(&args.origin_url).map_err(std::io::Error::other)?);
    info!(
        origin = %args.origin_url,
        issuer = %args.issuer_url,
        deployment = ?args.deployment,
        csrf = args.csrf_path.is_some(),
        "gate configured"
    );

    let mut app = build_app(gate.clone(), origin);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);
    let http_app = app.clone().layer(Extension(RequestScheme::Http));
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());

    let https_server = match args.https_port {
        Some(port) => {
            // reqwest and axum-server may pull in different rustls backends.
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config =
                tls::build_rustls_config(args.tls_cert.as_deref(), args.tls_key.as_deref(), host)
                    .await?;
            let https_addr = SocketAddr::new(host, port);
            info!("🔒 Starting HTTPS server at {}", https_addr);
            let https_app = app.layer(Extension(RequestScheme::Https));
            Some(
                axum_server::bind_rustls(https_addr, tls_config)
                    .handle(handle.clone())
                    .serve(https_app.into_make_service_with_connect_info::<SocketAddr>()),
            )
        }
        None => None,
    };

    spawn_background_tasks(gate);

    match https_server {
        Some(https_server) => tokio::select! {
            result = http_server => result?,
            result = https_server => result?,
            _ = shutdown_signal(handle) => {}
        },
        None => tokio::select! {
            result = http_server => result?,
            _ = shutdown_signal(handle) => {}
        },
    }

    Ok(())
}

/// Internal endpoints, the gate, and the origin proxy fallback.
fn build_app(gate: Arc<Gate>, origin: Arc<OriginProxy>) -> Router {
    Router::new()
        .route(&format!("{INTERNAL_PATH_PREFIX}/health"), get(version::health))
        .route(
            &format!("{INTERNAL_PATH_PREFIX}/version"),
            get(version::get_version_info),
        )
        .fallback(proxy::forward_to_origin)
        .layer(middleware::from_fn(gate::gate_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(gate))
        .layer(Extension(origin))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::{HeaderValue, StatusCode, header};
    use tower::ServiceExt;
    use wiremock::matchers::{header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::{DEFAULT_LANDING_PATH, DEFAULT_LOGIN_PATH, Deployment};
    use crate::cookies::tests::policy;
    use crate::issuer::tests::make_issuer;
    use crate::routes::tests::default_table;

    async fn app(issuer: &MockServer, origin: &MockServer) -> Router {
        let gate = Gate::new(
            default_table(),
            policy(Deployment::Development),
            make_issuer(issuer, Duration::from_secs(2)),
            DEFAULT_LOGIN_PATH.to_string(),
            DEFAULT_LANDING_PATH.to_string(),
        );
        let origin = OriginProxy::new(&origin.uri()).expect("proxy");
        build_app(Arc::new(gate), Arc::new(origin)).layer(Extension(RequestScheme::Http))
    }

    fn get_request(uri: &str, cookies: Option<&str>) -> Request<AxumBody> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookies) = cookies {
            builder = builder.header(header::COOKIE, cookies);
        }
        builder.body(AxumBody::empty()).expect("request")
    }

    #[tokio::test]
    async fn internal_endpoints_skip_gate_and_origin() {
        let issuer = MockServer::start().await;
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&origin)
            .await;

        let response = app(&issuer, &origin)
            .await
            .oneshot(get_request("/_gate/health", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS),
            Some(&HeaderValue::from_static("DENY"))
        );
    }

    #[tokio::test]
    async fn protected_request_without_credentials_never_reaches_origin() {
        let issuer = MockServer::start().await;
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&origin)
            .await;

        let response = app(&issuer, &origin)
            .await
            .oneshot(get_request("/dashboard", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION),
            Some(&HeaderValue::from_static("/login"))
        );
    }

    #[tokio::test]
    async fn refreshed_request_reaches_origin_with_new_cookie() {
        let issuer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refreshToken"))
            .and(header_is("cookie", "token=expired.x.y; refreshToken=r1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "accessToken": "fresh", "refreshToken": "r2" })),
            )
            .expect(1)
            .mount(&issuer)
            .await;
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .and(header_is("cookie", "token=fresh; refreshToken=r2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("dashboard"))
            .expect(1)
            .mount(&origin)
            .await;

        let response = app(&issuer, &origin)
            .await
            .oneshot(get_request(
                "/dashboard",
                Some("token=expired.x.y; refreshToken=r1"),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<&str> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("token=fresh") && c.contains("SameSite=Lax")));
        assert!(cookies.iter().any(|c| c.starts_with("refreshToken=r2")));
    }

    #[tokio::test]
    async fn unclassified_and_asset_requests_are_proxied() {
        let issuer = MockServer::start().await;
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&origin)
            .await;

        for uri in ["/files", "/_next/static/chunks/app.js"] {
            let response = app(&issuer, &origin)
                .await
                .oneshot(get_request(uri, None))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }
}
