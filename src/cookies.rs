//! 凭证 Cookie 的构建、清除与转发头改写。

use axum::http::{HeaderMap, HeaderValue, header};
use axum_extra::extract::cookie::{Cookie, SameSite};
use cookie::time::Duration as CookieDuration;
use std::time::Duration;

use crate::config::{Args, Deployment};

#[derive(Clone, Debug)]
pub struct CookiePolicy {
    pub access_name: String,
    pub refresh_name: String,
    pub access_max_age: Duration,
    pub refresh_max_age: Duration,
    pub deployment: Deployment,
}

impl CookiePolicy {
    pub fn from_args(args: &Args) -> Self {
        Self {
            access_name: args.access_cookie.clone(),
            refresh_name: args.refresh_cookie.clone(),
            access_max_age: Duration::from_secs(args.access_max_age_secs),
            refresh_max_age: Duration::from_secs(args.refresh_max_age_secs),
            deployment: args.deployment,
        }
    }

    /// 生产环境使用 Strict，开发环境放宽为 Lax 以兼容跨端口调试。
    pub fn same_site(&self) -> SameSite {
        if self.deployment.is_production() {
            SameSite::Strict
        } else {
            SameSite::Lax
        }
    }

    /// 生产环境或 HTTPS 请求下设置 Secure。
    pub fn secure(&self, https_request: bool) -> bool {
        self.deployment.is_production() || https_request
    }

    /// 新访问凭证 Cookie；`max_age` 为空时使用默认时长。
    pub fn access_cookie(
        &self,
        value: String,
        max_age: Option<Duration>,
        secure: bool,
    ) -> Cookie<'static> {
        let max_age = max_age.unwrap_or(self.access_max_age);
        self.base_cookie(self.access_name.clone(), value, secure)
            .max_age(to_cookie_duration(max_age))
            .build()
    }

    pub fn refresh_cookie(&self, value: String, secure: bool) -> Cookie<'static> {
        self.base_cookie(self.refresh_name.clone(), value, secure)
            .max_age(to_cookie_duration(self.refresh_max_age))
            .build()
    }

    /// 同时清除两个凭证 Cookie。
    pub fn removal_cookies(&self, secure: bool) -> [Cookie<'static>; 2] {
        [
            self.removal_cookie(self.access_name.clone(), secure),
            self.removal_cookie(self.refresh_name.clone(), secure),
        ]
    }

    fn removal_cookie(&self, name: String, secure: bool) -> Cookie<'static> {
        let mut cookie = self.base_cookie(name, String::new(), secure).build();
        cookie.make_removal();
        cookie
    }

    fn base_cookie(
        &self,
        name: String,
        value: String,
        secure: bool,
    ) -> cookie::CookieBuilder<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(self.same_site())
    }
}

fn to_cookie_duration(duration: Duration) -> CookieDuration {
    CookieDuration::seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

/// 把请求中所有 `Cookie` 头按 `; ` 合并为一个；HTTP/2 客户端会拆分 Cookie。
pub fn merged_cookie_header(headers: &HeaderMap) -> Option<HeaderValue> {
    let mut merged: Option<Vec<u8>> = None;
    for value in headers.get_all(header::COOKIE) {
        match merged.as_mut() {
            Some(bytes) => {
                bytes.extend_from_slice(b"; ");
                bytes.extend_from_slice(value.as_bytes());
            }
            None => merged = Some(value.as_bytes().to_vec()),
        }
    }
    HeaderValue::from_bytes(&merged?).ok()
}

/// 用新值替换请求 `Cookie` 头中的同名项，缺失的追加在末尾，其余原样保留。
pub fn rewrite_cookie_header(original: Option<&str>, replacements: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = original
        .map(|header| {
            Cookie::split_parse(header)
                .filter_map(Result::ok)
                .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
                .collect()
        })
        .unwrap_or_default();

    for (name, value) in replacements {
        match pairs.iter_mut().find(|(existing, _)| existing == name) {
            Some(pair) => pair.1 = (*value).to_string(),
            None => pairs.push(((*name).to_string(), (*value).to_string())),
        }
    }

    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{
        DEFAULT_ACCESS_COOKIE, DEFAULT_ACCESS_MAX_AGE_SECS, DEFAULT_REFRESH_COOKIE,
        DEFAULT_REFRESH_MAX_AGE_SECS,
    };

    pub(crate) fn policy(deployment: Deployment) -> CookiePolicy {
        CookiePolicy {
            access_name: DEFAULT_ACCESS_COOKIE.to_string(),
            refresh_name: DEFAULT_REFRESH_COOKIE.to_string(),
            access_max_age: Duration::from_secs(DEFAULT_ACCESS_MAX_AGE_SECS),
            refresh_max_age: Duration::from_secs(DEFAULT_REFRESH_MAX_AGE_SECS),
            deployment,
        }
    }

    #[test]
    fn access_cookie_is_short_lived_and_strict_in_production() {
        let cookie = policy(Deployment::Production).access_cookie("X".into(), None, true);
        assert_eq!(cookie.name(), "token");
        assert_eq!(cookie.value(), "X");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(900)));
    }

    #[test]
    fn access_cookie_honours_token_lifetime() {
        let cookie = policy(Deployment::Production).access_cookie(
            "X".into(),
            Some(Duration::from_secs(120)),
            true,
        );
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(120)));
    }

    #[test]
    fn refresh_cookie_is_long_lived_and_lax_in_development() {
        let policy = policy(Deployment::Development);
        let cookie = policy.refresh_cookie("R".into(), policy.secure(false));
        assert_eq!(cookie.name(), "refreshToken");
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(604_800)));
    }

    #[test]
    fn development_still_secures_https_requests() {
        assert!(policy(Deployment::Development).secure(true));
        assert!(policy(Deployment::Production).secure(false));
    }

    #[test]
    fn removal_cookies_expire_both_credentials() {
        let [access, refresh] = policy(Deployment::Production).removal_cookies(true);
        for cookie in [&access, &refresh] {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.path(), Some("/"));
            assert_eq!(cookie.max_age(), Some(CookieDuration::ZERO));
        }
        assert_eq!(access.name(), "token");
        assert_eq!(refresh.name(), "refreshToken");
    }

    #[test]
    fn rewrite_replaces_in_place_and_keeps_other_cookies() {
        let rewritten = rewrite_cookie_header(
            Some("theme=dark; token=old; refreshToken=r1"),
            &[("token", "new"), ("refreshToken", "r2")],
        );
        assert_eq!(rewritten, "theme=dark; token=new; refreshToken=r2");
    }

    #[test]
    fn split_cookie_headers_are_merged_in_order() {
        let mut headers = HeaderMap::new();
        assert_eq!(merged_cookie_header(&headers), None);

        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(
            merged_cookie_header(&headers),
            Some(HeaderValue::from_static("theme=dark"))
        );

        headers.append(header::COOKIE, HeaderValue::from_static("token=old.x.y"));
        headers.append(header::COOKIE, HeaderValue::from_static("refreshToken=r1; sid=abc"));
        assert_eq!(
            merged_cookie_header(&headers),
            Some(HeaderValue::from_static(
                "theme=dark; token=old.x.y; refreshToken=r1; sid=abc"
            ))
        );
    }

    #[test]
    fn rewrite_appends_missing_cookies() {
        let rewritten = rewrite_cookie_header(Some("refreshToken=r1"), &[("token", "new")]);
        assert_eq!(rewritten, "refreshToken=r1; token=new");
        assert_eq!(rewrite_cookie_header(None, &[("token", "new")]), "token=new");
    }
}
