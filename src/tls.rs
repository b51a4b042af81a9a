//! TLS 配置：加载证书，未提供时在内存中生成自签名证书。

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::net::IpAddr;
use tokio::fs;
use tracing::info;

/// 构建 Rustls 配置；证书与私钥须同时提供。
pub async fn build_rustls_config(
    tls_cert: Option<&str>,
    tls_key: Option<&str>,
    host: IpAddr,
) -> Result<RustlsConfig, std::io::Error> {
    match (tls_cert, tls_key) {
        (Some(cert), Some(key)) => {
            let cert = fs::read(cert).await?;
            let key = fs::read(key).await?;
            RustlsConfig::from_pem(cert, key).await
        }
        (None, None) => {
            let (cert, key) = self_signed_pem(host)?;
            info!(%host, "using generated self-signed certificate");
            RustlsConfig::from_pem(cert, key).await
        }
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "tls cert and key must be provided together",
        )),
    }
}

fn self_signed_pem(host: IpAddr) -> Result<(Vec<u8>, Vec<u8>), std::io::Error> {
    let names = vec![host.to_string(), "localhost".to_string()];
    let cert = generate_simple_self_signed(names)
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok((
        cert.cert.pem().into_bytes(),
        cert.key_pair.serialize_pem().into_bytes(),
    ))
}
