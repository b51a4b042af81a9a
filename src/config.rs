//! CLI arguments and gate configuration defaults.

use clap::{Parser, ValueEnum};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_ACCESS_COOKIE: &str = "token";
pub const DEFAULT_REFRESH_COOKIE: &str = "refreshToken";
pub const DEFAULT_ACCESS_MAX_AGE_SECS: u64 = 15 * 60;
pub const DEFAULT_REFRESH_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/refreshToken";
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CSRF_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_PUBLIC_PATHS: &str = "/,/login,/register";
pub const DEFAULT_AUTH_PAGES: &str = "/login,/register";
pub const DEFAULT_PROTECTED_PREFIXES: &str = "/dashboard,/file_upload,/profile";
pub const DEFAULT_BYPASS_PREFIXES: &str = "/api,/_next/static,/_next/image,/favicon.ico";
pub const DEFAULT_BYPASS_EXTENSIONS: &str =
    "png,jpg,jpeg,gif,svg,ico,webp,css,js,woff,woff2,ttf,eot";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_LANDING_PATH: &str = "/dashboard";
pub const INTERNAL_PATH_PREFIX: &str = "/_gate";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";
pub const CSRF_PRUNE_INTERVAL_SECS: u64 = 60;

/// Deployment flavour; drives the SameSite and Secure cookie attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Deployment {
    Production,
    Development,
}

impl Deployment {
    pub fn is_production(self) -> bool {
        matches!(self, Deployment::Production)
    }
}

/// CLI arguments and environment configuration for the gate.
#[derive(Parser, Debug)]
#[command(name = "edge-gate", version = VERSION_INFO, about = "Edge authentication gate")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "GATE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "GATE_HTTP_PORT",
        default_value_t = 8080,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "GATE_HTTPS_PORT",
        help = "HTTPS port (HTTPS disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "GATE_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "GATE_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "GATE_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        short = 'o',
        long,
        env = "GATE_ORIGIN_URL",
        default_value = "http://localhost:3000",
        help = "Origin application base URL"
    )]
    pub origin_url: String,
    #[arg(
        short = 'i',
        long,
        env = "GATE_ISSUER_URL",
        default_value = "http://localhost:5000",
        help = "Credential issuer base URL"
    )]
    pub issuer_url: String,
    #[arg(
        long,
        env = "GATE_REFRESH_PATH",
        default_value = DEFAULT_REFRESH_PATH,
        help = "Refresh endpoint path on the credential issuer"
    )]
    pub refresh_path: String,
    #[arg(
        long,
        env = "GATE_REFRESH_TIMEOUT_SECS",
        default_value_t = DEFAULT_REFRESH_TIMEOUT_SECS,
        help = "Refresh exchange timeout in seconds"
    )]
    pub refresh_timeout_secs: u64,
    #[arg(
        long,
        env = "GATE_CSRF_PATH",
        help = "CSRF token endpoint path on the credential issuer (disabled when unset)"
    )]
    pub csrf_path: Option<String>,
    #[arg(
        long,
        env = "GATE_CSRF_TTL_SECS",
        default_value_t = DEFAULT_CSRF_TTL_SECS,
        help = "CSRF token cache lifetime in seconds"
    )]
    pub csrf_ttl_secs: u64,
    #[arg(
        long,
        env = "GATE_ACCESS_COOKIE",
        default_value = DEFAULT_ACCESS_COOKIE,
        help = "Access credential cookie name"
    )]
    pub access_cookie: String,
    #[arg(
        long,
        env = "GATE_REFRESH_COOKIE",
        default_value = DEFAULT_REFRESH_COOKIE,
        help = "Refresh credential cookie name"
    )]
    pub refresh_cookie: String,
    #[arg(
        long,
        env = "GATE_ACCESS_MAX_AGE_SECS",
        default_value_t = DEFAULT_ACCESS_MAX_AGE_SECS,
        help = "Access cookie max-age when the token carries no usable expiry"
    )]
    pub access_max_age_secs: u64,
    #[arg(
        long,
        env = "GATE_REFRESH_MAX_AGE_SECS",
        default_value_t = DEFAULT_REFRESH_MAX_AGE_SECS,
        help = "Refresh cookie max-age in seconds"
    )]
    pub refresh_max_age_secs: u64,
    #[arg(
        long,
        env = "GATE_DEPLOYMENT",
        value_enum,
        default_value_t = Deployment::Production,
        help = "Deployment mode (strict cookies in production, lax in development)"
    )]
    pub deployment: Deployment,
    #[arg(
        long,
        env = "GATE_PUBLIC_PATHS",
        default_value = DEFAULT_PUBLIC_PATHS,
        help = "Comma separated exact-match public paths"
    )]
    pub public_paths: String,
    #[arg(
        long,
        env = "GATE_AUTH_PAGES",
        default_value = DEFAULT_AUTH_PAGES,
        help = "Comma separated login/registration pages"
    )]
    pub auth_pages: String,
    #[arg(
        long,
        env = "GATE_PROTECTED_PREFIXES",
        default_value = DEFAULT_PROTECTED_PREFIXES,
        help = "Comma separated protected path prefixes"
    )]
    pub protected_prefixes: String,
    #[arg(
        long,
        env = "GATE_BYPASS_PREFIXES",
        default_value = DEFAULT_BYPASS_PREFIXES,
        help = "Comma separated path prefixes the gate never inspects"
    )]
    pub bypass_prefixes: String,
    #[arg(
        long,
        env = "GATE_BYPASS_EXTENSIONS",
        default_value = DEFAULT_BYPASS_EXTENSIONS,
        help = "Comma separated static asset extensions the gate never inspects"
    )]
    pub bypass_extensions: String,
    #[arg(
        long,
        env = "GATE_LOGIN_PATH",
        default_value = DEFAULT_LOGIN_PATH,
        help = "Login page to redirect unauthenticated users to"
    )]
    pub login_path: String,
    #[arg(
        long,
        env = "GATE_LANDING_PATH",
        default_value = DEFAULT_LANDING_PATH,
        help = "Landing page for authenticated users hitting auth pages"
    )]
    pub landing_path: String,
}

/// Splits a comma separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
