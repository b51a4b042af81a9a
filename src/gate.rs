//! 边缘认证网关：按请求决定放行、跳转登录，或续期后放行。
//!
//! 续期之前的判定是纯函数（路径 + Cookie + 当前时间）；唯一的挂起点是向
//! 签发方发起的刷新交换。客户端中断时 axum 会丢弃请求 future，刷新调用随之取消，
//! 不会写出任何 Cookie。
//!
//! 同一客户端的并发请求各自独立刷新，网关不做去重；签发方需容忍并发交换。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderValue, Request, header};
use axum::middleware;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Args;
use crate::cookies::{CookiePolicy, merged_cookie_header, rewrite_cookie_header};
use crate::error::GateError;
use crate::http::{RequestScheme, is_https_request};
use crate::issuer::{IssuedCredentials, IssuerClient};
use crate::routes::{RouteClass, RouteTable};
use crate::token::{AccessCredential, AccessState};

/// 网关对单个请求的裁决。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    ContinueWithNewCredentials(IssuedCredentials),
    Redirect {
        target: String,
        clear_credentials: bool,
    },
}

/// 纯判定阶段的结果。
#[derive(Debug, PartialEq, Eq)]
enum Assessment {
    Decided(GateDecision),
    Refresh,
}

#[derive(Debug)]
pub struct Gate {
    routes: RouteTable,
    cookies: CookiePolicy,
    issuer: IssuerClient,
    login_path: String,
    landing_path: String,
}

impl Gate {
    pub fn new(
        routes: RouteTable,
        cookies: CookiePolicy,
        issuer: IssuerClient,
        login_path: String,
        landing_path: String,
    ) -> Self {
        Self {
            routes,
            cookies,
            issuer,
            login_path,
            landing_path,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            RouteTable::from_args(args),
            CookiePolicy::from_args(args),
            IssuerClient::from_args(args)?,
            args.login_path.clone(),
            args.landing_path.clone(),
        ))
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookies
    }

    pub fn issuer(&self) -> &IssuerClient {
        &self.issuer
    }

    pub async fn evaluate(
        &self,
        path: &str,
        jar: &CookieJar,
        cookie_header: Option<&HeaderValue>,
    ) -> GateDecision {
        self.evaluate_at(path, jar, cookie_header, Utc::now()).await
    }

    /// 完整判定；仅在需要续期时访问签发方，且只尝试一次。
    pub async fn evaluate_at(
        &self,
        path: &str,
        jar: &CookieJar,
        cookie_header: Option<&HeaderValue>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let access = cookie_value(jar, &self.cookies.access_name);
        let refresh = cookie_value(jar, &self.cookies.refresh_name);

        match self.assess(path, access, refresh, now) {
            Assessment::Decided(decision) => decision,
            Assessment::Refresh => {
                let Some(session_key) = refresh else {
                    return self.login_redirect();
                };
                let refreshed = self
                    .issuer
                    .refresh(cookie_header, session_key)
                    .await
                    .and_then(|issued| reject_expired_issue(issued, now));
                match refreshed {
                    Ok(issued) => {
                        debug!(path, "access credential refreshed");
                        GateDecision::ContinueWithNewCredentials(issued)
                    }
                    Err(err) => {
                        warn!(path, kind = err.kind(), error = %err, "refresh exchange failed");
                        self.login_redirect()
                    }
                }
            }
        }
    }

    fn assess(
        &self,
        path: &str,
        access: Option<&str>,
        refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Assessment {
        if self.routes.is_bypassed(path) {
            return Assessment::Decided(GateDecision::Continue);
        }

        match self.routes.classify(path) {
            RouteClass::Unclassified => Assessment::Decided(GateDecision::Continue),
            RouteClass::Public => {
                if self.routes.is_auth_page(path) && AccessState::inspect(access, now).is_valid() {
                    debug!(path, "authenticated user on auth page");
                    return Assessment::Decided(GateDecision::Redirect {
                        target: self.landing_path.clone(),
                        clear_credentials: false,
                    });
                }
                Assessment::Decided(GateDecision::Continue)
            }
            RouteClass::Protected => {
                if access.is_none() && refresh.is_none() {
                    debug!(path, kind = GateError::MissingCredentials.kind(), "no credentials");
                    return Assessment::Decided(self.login_redirect());
                }
                match AccessState::inspect(access, now) {
                    AccessState::Valid(credential) => {
                        debug!(
                            path,
                            subject = credential.subject.as_deref().unwrap_or("-"),
                            "access credential valid"
                        );
                        Assessment::Decided(GateDecision::Continue)
                    }
                    state => {
                        if let AccessState::Unusable(err) = state {
                            let err = GateError::InvalidOrExpiredAccess(err);
                            debug!(path, kind = err.kind(), error = %err, "access credential unusable");
                        }
                        if refresh.is_some() {
                            Assessment::Refresh
                        } else {
                            Assessment::Decided(self.login_redirect())
                        }
                    }
                }
            }
        }
    }

    fn login_redirect(&self) -> GateDecision {
        GateDecision::Redirect {
            target: self.login_path.clone(),
            clear_credentials: true,
        }
    }
}

/// 签发方给出的访问凭证若已过期，按无效响应处理；无法解析的凭证原样接受。
fn reject_expired_issue(
    issued: IssuedCredentials,
    now: DateTime<Utc>,
) -> Result<IssuedCredentials, GateError> {
    match AccessCredential::parse(&issued.access) {
        Ok(credential) if credential.is_expired_at(now) => Err(GateError::RefreshMalformed(
            format!("issued access credential expired at {}", credential.expires_at),
        )),
        _ => Ok(issued),
    }
}

fn cookie_value<'a>(jar: &'a CookieJar, name: &str) -> Option<&'a str> {
    jar.get(name)
        .map(|cookie| cookie.value())
        .filter(|value| !value.is_empty())
}

/// 网关中间件：把裁决落实为放行、写入新 Cookie 或重定向。
pub async fn gate_middleware(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(scheme): Extension<RequestScheme>,
    jar: CookieJar,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let path = req.uri().path().to_string();
    let cookie_header = merged_cookie_header(req.headers());
    let decision = gate.evaluate(&path, &jar, cookie_header.as_ref()).await;
    let policy = gate.cookie_policy();
    let secure = policy.secure(is_https_request(req.headers(), scheme));

    match decision {
        GateDecision::Continue => next.run(req).await,
        GateDecision::ContinueWithNewCredentials(issued) => {
            let access_max_age = AccessCredential::parse(&issued.access).ok().map(|credential| {
                Duration::from_secs(credential.remaining_secs(Utc::now()).unwrap_or(0))
            });

            let mut replacements = vec![(policy.access_name.as_str(), issued.access.as_str())];
            if let Some(refresh) = &issued.refresh {
                replacements.push((policy.refresh_name.as_str(), refresh.as_str()));
            }
            let original = cookie_header.as_ref().and_then(|value| value.to_str().ok());
            match HeaderValue::from_str(&rewrite_cookie_header(original, &replacements)) {
                Ok(value) => {
                    req.headers_mut().insert(header::COOKIE, value);
                }
                Err(err) => warn!(path, error = %err, "refreshed cookies not forwardable"),
            }

            let mut jar = jar.add(policy.access_cookie(issued.access, access_max_age, secure));
            if let Some(refresh) = issued.refresh {
                jar = jar.add(policy.refresh_cookie(refresh, secure));
            }
            let response = next.run(req).await;
            (jar, response).into_response()
        }
        GateDecision::Redirect {
            target,
            clear_credentials,
        } => {
            let mut jar = jar;
            if clear_credentials {
                for cookie in policy.removal_cookies(secure) {
                    jar = jar.add(cookie);
                }
            }
            (jar, Redirect::temporary(&target)).into_response()
        }
    }
}
