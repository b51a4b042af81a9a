//! 凭证签发方客户端：刷新交换与可选的 CSRF 令牌获取。

use axum::http::{HeaderValue, StatusCode, header};
use axum_extra::extract::cookie::Cookie;
use reqwest::redirect::Policy;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{Args, CSRF_HEADER_NAME};
use crate::cookies::rewrite_cookie_header;
use crate::csrf::{CsrfToken, CsrfTokenCache};
use crate::error::GateError;

/// 刷新成功后签发的新凭证对。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub access: String,
    pub refresh: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default, alias = "access", alias = "token")]
    access_token: Option<String>,
    #[serde(default, alias = "refresh")]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfResponse {
    csrf_token: Option<String>,
}

#[derive(Debug)]
struct CsrfSettings {
    url: String,
    cache: CsrfTokenCache,
}

#[derive(Debug)]
pub struct IssuerClient {
    http_client: reqwest::Client,
    refresh_url: String,
    csrf: Option<CsrfSettings>,
    access_cookie: String,
    refresh_cookie: String,
}

impl IssuerClient {
    /// 构建带超时的客户端；不跟随重定向。
    pub fn new(
        issuer_url: &str,
        refresh_path: &str,
        timeout: Duration,
        access_cookie: &str,
        refresh_cookie: &str,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            http_client,
            refresh_url: join_url(issuer_url, refresh_path),
            csrf: None,
            access_cookie: access_cookie.to_string(),
            refresh_cookie: refresh_cookie.to_string(),
        })
    }

    pub fn from_args(args: &Args) -> Result<Self, reqwest::Error> {
        let client = Self::new(
            &args.issuer_url,
            &args.refresh_path,
            Duration::from_secs(args.refresh_timeout_secs),
            &args.access_cookie,
            &args.refresh_cookie,
        )?;
        Ok(match &args.csrf_path {
            Some(path) => client.with_csrf(
                &args.issuer_url,
                path,
                Duration::from_secs(args.csrf_ttl_secs),
            ),
            None => client,
        })
    }

    /// 启用 CSRF：刷新前先获取令牌并缓存。
    pub fn with_csrf(mut self, issuer_url: &str, csrf_path: &str, ttl: Duration) -> Self {
        self.csrf = Some(CsrfSettings {
            url: join_url(issuer_url, csrf_path),
            cache: CsrfTokenCache::new(ttl),
        });
        self
    }

    pub fn csrf_cache(&self) -> Option<&CsrfTokenCache> {
        self.csrf.as_ref().map(|csrf| &csrf.cache)
    }

    /// 单次刷新交换，不重试。
    ///
    /// 原请求的 `Cookie` 头原样转发；只有 HTTP 200 且能取到新访问凭证才算成功。
    /// `session_key` 为刷新凭证，用作 CSRF 缓存键。
    pub async fn refresh(
        &self,
        cookie_header: Option<&HeaderValue>,
        session_key: &str,
    ) -> Result<IssuedCredentials, GateError> {
        let mut request = self.http_client.post(&self.refresh_url);
        let mut forwarded_cookies = cookie_header.cloned();

        if let Some(csrf) = self.csrf_token(cookie_header, session_key).await? {
            request = request.header(CSRF_HEADER_NAME, csrf.token.as_str());
            if !csrf.cookies.is_empty() {
                let extra: Vec<(&str, &str)> = csrf
                    .cookies
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str()))
                    .collect();
                let original = cookie_header.and_then(|value| value.to_str().ok());
                let merged = rewrite_cookie_header(original, &extra);
                forwarded_cookies = HeaderValue::from_str(&merged).ok();
            }
        }

        if let Some(cookies) = forwarded_cookies {
            request = request.header(header::COOKIE, cookies);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            if status == StatusCode::FORBIDDEN
                && let Some(csrf) = &self.csrf
            {
                let body = response.text().await.unwrap_or_default();
                if body.to_ascii_lowercase().contains("csrf") {
                    debug!("issuer rejected csrf token, clearing cache");
                    csrf.cache.clear().await;
                } else {
                    csrf.cache.invalidate(session_key).await;
                }
            }
            return Err(GateError::RefreshRejected(status));
        }

        let (cookie_access, cookie_refresh) = self.credentials_from_set_cookie(response.headers());
        let body = response.bytes().await?;
        let parsed = if body.iter().all(u8::is_ascii_whitespace) {
            RefreshResponse::default()
        } else {
            serde_json::from_slice::<RefreshResponse>(&body)
                .map_err(|err| GateError::RefreshMalformed(format!("invalid body: {err}")))?
        };

        let access = parsed
            .access_token
            .filter(|value| !value.is_empty())
            .or(cookie_access)
            .ok_or_else(|| GateError::RefreshMalformed("no access credential issued".into()))?;
        let refresh = parsed
            .refresh_token
            .filter(|value| !value.is_empty())
            .or(cookie_refresh);

        debug!(rotated = refresh.is_some(), "refresh exchange succeeded");
        Ok(IssuedCredentials { access, refresh })
    }

    fn credentials_from_set_cookie(
        &self,
        headers: &reqwest::header::HeaderMap,
    ) -> (Option<String>, Option<String>) {
        let mut access = None;
        let mut refresh = None;
        for cookie in parse_set_cookies(headers) {
            if cookie.value().is_empty() {
                continue;
            }
            if cookie.name() == self.access_cookie {
                access = Some(cookie.value().to_string());
            } else if cookie.name() == self.refresh_cookie {
                refresh = Some(cookie.value().to_string());
            }
        }
        (access, refresh)
    }

    async fn csrf_token(
        &self,
        cookie_header: Option<&HeaderValue>,
        session_key: &str,
    ) -> Result<Option<CsrfToken>, GateError> {
        let Some(csrf) = &self.csrf else {
            return Ok(None);
        };
        if let Some(token) = csrf.cache.get(session_key).await {
            return Ok(Some(token));
        }

        let mut request = self.http_client.get(&csrf.url);
        if let Some(cookies) = cookie_header {
            request = request.header(header::COOKIE, cookies.clone());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GateError::RefreshRejected(status));
        }

        let cookies = parse_set_cookies(response.headers())
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();
        let body: CsrfResponse = response
            .json()
            .await
            .map_err(|err| GateError::RefreshMalformed(format!("invalid csrf body: {err}")))?;
        let token = body
            .csrf_token
            .filter(|value| !value.is_empty())
            .ok_or_else(|| GateError::RefreshMalformed("csrf token missing".into()))?;

        let token = CsrfToken { token, cookies };
        csrf.cache.insert(session_key, token.clone()).await;
        debug!("fetched csrf token from issuer");
        Ok(Some(token))
    }
}

fn parse_set_cookies(
    headers: &reqwest::header::HeaderMap,
) -> impl Iterator<Item = Cookie<'static>> + '_ {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| Cookie::parse(value.to_string()).ok())
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
