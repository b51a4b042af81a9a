//! 访问令牌的本地过期预检。
//!
//! 只解析 JWT 载荷中的 `exp` 声明，不校验签名；签名校验由凭证签发方负责。
//! 任何解析失败都视为过期。

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// 已解析的访问凭证。
#[derive(Clone, Debug, PartialEq)]
pub struct AccessCredential {
    pub subject: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AccessCredential {
    /// 解析令牌结构与 `exp` 声明。
    pub fn parse(token: &str) -> Result<Self, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [_, payload, _] = segments.as_slice() else {
            return Err(TokenError::Malformed(segments.len()));
        };

        let bytes = decode_segment(payload).ok_or(TokenError::Undecodable)?;
        let claims: Claims =
            serde_json::from_slice(&bytes).map_err(|err| TokenError::InvalidJson(err.to_string()))?;
        let exp = claims.exp.ok_or(TokenError::MissingExpiry)?;
        let expires_at = expiry_instant(exp).ok_or(TokenError::MissingExpiry)?;

        Ok(Self {
            subject: claims.sub.map(|sub| match sub {
                serde_json::Value::String(value) => value,
                other => other.to_string(),
            }),
            expires_at,
        })
    }

    /// 过期判定包含边界：`now >= expires_at` 即过期。
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 距离过期的剩余秒数，已过期时返回 `None`。
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        let remaining = (self.expires_at - now).num_seconds();
        (remaining > 0).then_some(remaining as u64)
    }
}

/// 访问凭证在某一时刻的状态。
#[derive(Debug)]
pub enum AccessState {
    Missing,
    Valid(AccessCredential),
    Unusable(TokenError),
}

impl AccessState {
    /// 由 Cookie 原值推导状态；空值等同缺失。
    pub fn inspect(raw: Option<&str>, now: DateTime<Utc>) -> Self {
        let Some(raw) = raw.filter(|value| !value.is_empty()) else {
            return AccessState::Missing;
        };
        match AccessCredential::parse(raw) {
            Ok(credential) if credential.is_expired_at(now) => {
                AccessState::Unusable(TokenError::Expired(credential.expires_at))
            }
            Ok(credential) => AccessState::Valid(credential),
            Err(err) => AccessState::Unusable(err),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, AccessState::Valid(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenError {
    Malformed(usize),
    Undecodable,
    InvalidJson(String),
    MissingExpiry,
    Expired(DateTime<Utc>),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed(count) => write!(f, "expected 3 segments, found {count}"),
            TokenError::Undecodable => write!(f, "payload is not base64"),
            TokenError::InvalidJson(err) => write!(f, "payload is not a JSON object: {err}"),
            TokenError::MissingExpiry => write!(f, "missing or unusable exp claim"),
            TokenError::Expired(at) => write!(f, "expired at {}", at.to_rfc3339()),
        }
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
}

fn expiry_instant(exp: f64) -> Option<DateTime<Utc>> {
    if !exp.is_finite() {
        return None;
    }
    let millis = (exp * 1000.0).floor();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}
