//! 网关错误类型与 HTTP 响应转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

use crate::token::TokenError;

/// 代理到源站时的错误。
#[derive(Debug)]
pub enum ApiError {
    BadGateway(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
        }
    }
}

/// 网关拒绝或无法续期的原因。
///
/// 所有变体对客户端表现一致（重定向到登录页并清除 Cookie），
/// 仅在日志中区分。
#[derive(Debug)]
pub enum GateError {
    MissingCredentials,
    InvalidOrExpiredAccess(TokenError),
    RefreshTransportFailure(String),
    RefreshRejected(StatusCode),
    RefreshMalformed(String),
}

impl GateError {
    /// 用于日志字段的稳定标识。
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::MissingCredentials => "missing_credentials",
            GateError::InvalidOrExpiredAccess(_) => "invalid_or_expired_access",
            GateError::RefreshTransportFailure(_) => "refresh_transport_failure",
            GateError::RefreshRejected(_) => "refresh_rejected",
            GateError::RefreshMalformed(_) => "refresh_malformed",
        }
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::MissingCredentials => write!(f, "no credentials presented"),
            GateError::InvalidOrExpiredAccess(err) => write!(f, "access credential unusable: {err}"),
            GateError::RefreshTransportFailure(msg) => write!(f, "refresh exchange failed: {msg}"),
            GateError::RefreshRejected(status) => write!(f, "issuer rejected refresh: {status}"),
            GateError::RefreshMalformed(msg) => write!(f, "issuer response unusable: {msg}"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<reqwest::Error> for GateError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return GateError::RefreshTransportFailure(format!("timed out: {error}"));
        }
        GateError::RefreshTransportFailure(error.to_string())
    }
}
