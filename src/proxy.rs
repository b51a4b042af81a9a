//! 源站反向代理：网关放行后的请求转发到源站，并流式返回响应。

use axum::body::{Body as AxumBody, HttpBody};
use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::{HeaderValue, Request, Uri, header};
use axum::response::Response;
use reqwest::redirect::Policy;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::{RequestScheme, strip_hop_by_hop};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug)]
pub struct OriginProxy {
    http_client: reqwest::Client,
    origin_url: String,
}

impl OriginProxy {
    /// 不跟随源站重定向，原样交给客户端。
    pub fn new(origin_url: &str) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            http_client,
            origin_url: origin_url.trim_end_matches('/').to_string(),
        })
    }

    fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        format!("{}{}", self.origin_url, path_and_query)
    }
}

/// 转发处理器，作为路由回退挂载。
pub async fn forward_to_origin(
    Extension(proxy): Extension<Arc<OriginProxy>>,
    Extension(scheme): Extension<RequestScheme>,
    req: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let connect_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, body) = req.into_parts();
    let target = proxy.target_url(&parts.uri);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    let original_host = headers.remove(header::HOST);

    if let Some(ip) = connect_ip {
        let forwarded_for = match headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert("x-forwarded-for", value);
        }
    }
    if !headers.contains_key("x-forwarded-proto") {
        headers.insert(
            "x-forwarded-proto",
            HeaderValue::from_static(scheme.as_str()),
        );
    }
    if let Some(host) = original_host {
        headers.entry("x-forwarded-host").or_insert(host);
    }
    if !headers.contains_key(REQUEST_ID_HEADER)
        && let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string())
    {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    let mut upstream_request = proxy
        .http_client
        .request(parts.method, &target)
        .headers(headers);
    // 空请求体不转成流，避免无体请求被分块编码。
    if body.size_hint().exact() != Some(0) {
        upstream_request =
            upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let upstream = upstream_request
        .send()
        .await
        .map_err(|err| {
            warn!(url = %target, error = %err, "origin request failed");
            ApiError::BadGateway("origin unreachable".into())
        })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(AxumBody::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wiremock::matchers::{body_string, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn router(origin_url: &str) -> Router {
        Router::new()
            .fallback(forward_to_origin)
            .layer(Extension(Arc::new(OriginProxy::new(origin_url).expect("proxy"))))
            .layer(Extension(RequestScheme::Http))
    }

    #[tokio::test]
    async fn forwards_method_path_query_and_body() {
        let origin = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/upload"))
            .and(query_param("folder", "docs"))
            .and(header_is("cookie", "token=A"))
            .and(header_is("x-forwarded-proto", "http"))
            .and(header_is("x-forwarded-host", "app.example"))
            .and(body_string("payload"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-origin", "yes")
                    .set_body_string("created"),
            )
            .expect(1)
            .mount(&origin)
            .await;

        let response = router(&origin.uri())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/files/upload?folder=docs")
                    .header(header::HOST, "app.example")
                    .header(header::COOKIE, "token=A")
                    .body(AxumBody::from("payload"))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("x-origin"),
            Some(&HeaderValue::from_static("yes"))
        );
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"created");
    }

    #[tokio::test]
    async fn origin_redirects_pass_through() {
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&origin)
            .await;

        let response = router(&origin.uri())
            .oneshot(
                Request::builder()
                    .uri("/old")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION),
            Some(&HeaderValue::from_static("/new"))
        );
    }

    #[tokio::test]
    async fn request_id_is_added_when_missing() {
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&origin)
            .await;

        router(&origin.uri())
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::CONNECTION, "close")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        let received = origin.received_requests().await.expect("recorded requests");
        assert_eq!(received.len(), 1);
        let forwarded = &received[0];
        assert!(forwarded.headers.contains_key(REQUEST_ID_HEADER));
        assert_ne!(
            forwarded.headers.get(header::CONNECTION),
            Some(&HeaderValue::from_static("close"))
        );
    }

    #[tokio::test]
    async fn unreachable_origin_is_bad_gateway() {
        let response = router("http://127.0.0.1:9")
            .oneshot(
                Request::builder()
                    .uri("/dashboard")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
