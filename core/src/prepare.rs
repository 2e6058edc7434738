//! Turning `Settings` plus request headers into something a collaborator
//! can execute.
//!
//! # Design
//! `prepare` resolves the URL scheme into a `Target`: an HTTP(S)
//! `TransportRequest` or a local file path. It writes the synthesized
//! headers (defaults, `Host`, `Authorization`, `Content-Length`,
//! `Content-Type`) into the caller's `HeaderTable`, so what
//! `get_request_header` reports after `send` is what went on the wire.
//! Redirect hops are derived from the previous `TransportRequest` by
//! `redirect`.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::{Host, Url};

use crate::config::Config;
use crate::error::XhrError;
use crate::headers::HeaderTable;
use crate::http::TransportRequest;
use crate::types::Settings;

/// Where a send goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Http(TransportRequest),
    File(PathBuf),
}

/// Parse the URL given to `open`. A URL without a scheme is resolved
/// against `http://localhost/`.
pub fn parse_url(raw: &str) -> Result<Url, XhrError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse("http://localhost/")?;
            Ok(base.join(raw)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve the send target and fill in the outgoing headers.
pub fn prepare(
    settings: &Settings,
    headers: &mut HeaderTable,
    body: &[u8],
    config: &Config,
    with_credentials: bool,
) -> Result<Target, XhrError> {
    let url = &settings.url;
    match url.scheme() {
        "http" | "https" => {}
        "file" => {
            if settings.method != "GET" {
                return Err(XhrError::MethodNotSupported(settings.method.clone()));
            }
            let path = url
                .to_file_path()
                .map_err(|()| XhrError::ProtocolNotSupported(format!("non-local file url {url}")))?;
            return Ok(Target::File(path));
        }
        other => return Err(XhrError::ProtocolNotSupported(other.to_string())),
    }

    let secure = url.scheme() == "https";
    let port = url
        .port_or_known_default()
        .unwrap_or(if secure { 443 } else { 80 });

    headers.insert_default("User-Agent", &config.user_agent);
    headers.insert_default("Accept", &config.accept);
    headers.replace("Host", &host_header(url));

    if let Some(user) = &settings.user {
        let password = settings.password.as_deref().unwrap_or("");
        let token = STANDARD.encode(format!("{user}:{password}"));
        headers.replace("Authorization", &format!("Basic {token}"));
    }

    let body = if settings.method == "GET" || settings.method == "HEAD" {
        Vec::new()
    } else if !body.is_empty() {
        headers.replace("Content-Length", &body.len().to_string());
        headers.insert_default("Content-Type", "text/plain;charset=UTF-8");
        body.to_vec()
    } else {
        if settings.method == "POST" {
            headers.replace("Content-Length", "0");
        }
        Vec::new()
    };

    Ok(Target::Http(TransportRequest {
        method: settings.method.clone(),
        host: hostname(url),
        port,
        path: path_and_query(url),
        headers: headers.to_vec(),
        body,
        secure,
        with_credentials,
        timeout: None,
    }))
}

/// Build the next hop of a redirect chain. Headers carry over except
/// `Host`, which follows the new authority. A 303 turns the request into a
/// body-less GET.
pub fn redirect(
    previous: &TransportRequest,
    status: u16,
    location: &Url,
) -> Result<TransportRequest, XhrError> {
    let secure = match location.scheme() {
        "http" => false,
        "https" => true,
        other => return Err(XhrError::ProtocolNotSupported(other.to_string())),
    };

    let mut headers: HeaderTable = previous
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    headers.replace("Host", &host_header(location));

    let (method, body) = if status == 303 {
        headers.remove("Content-Length");
        headers.remove("Content-Type");
        ("GET".to_string(), Vec::new())
    } else {
        (previous.method.clone(), previous.body.clone())
    };

    Ok(TransportRequest {
        method,
        host: hostname(location),
        port: location
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 }),
        path: path_and_query(location),
        headers: headers.to_vec(),
        body,
        secure,
        with_credentials: previous.with_credentials,
        timeout: previous.timeout,
    })
}

/// Value of the `Host` header for `url`: brackets around IPv6 literals,
/// and the explicit port unless it is 80, or 443 over TLS.
pub fn host_header(url: &Url) -> String {
    let mut value = match url.host() {
        Some(Host::Ipv6(addr)) => format!("[{addr}]"),
        _ => hostname(url),
    };
    let secure = url.scheme() == "https";
    let port = url
        .port_or_known_default()
        .unwrap_or(if secure { 443 } else { 80 });
    if !((secure && port == 443) || port == 80) {
        if let Some(explicit) = url.port() {
            value.push(':');
            value.push_str(&explicit.to_string());
        }
    }
    value
}

fn hostname(url: &Url) -> String {
    match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => "localhost".to_string(),
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}
