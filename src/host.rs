use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::{JuError, JuResult};

const PROXY_ENDPOINT: &str = "/http_over_websocket";

/// Absolute (`scheme://`) or protocol-relative (`//`) URLs.
static HOST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z]+://|//)").expect("Invalid host pattern"));

/// Checks the user supplied host and parses it.
///
/// Protocol-relative hosts are resolved against `http:`. Anything that does
/// not name a host is rejected as well, since the proxy settings are built
/// from it.
pub fn validate_host(host: &str) -> JuResult<Url> {
    if host.is_empty() || !HOST_PATTERN.is_match(host) {
        return Err(JuError::InvalidHost(host.to_owned()));
    }

    let parsed = if host.starts_with("//") {
        Url::parse(&format!("http:{host}"))
    } else {
        Url::parse(host)
    };

    match parsed {
        Ok(url) if url.host_str().is_some() => Ok(url),
        _ => Err(JuError::InvalidHost(host.to_owned())),
    }
}

/// `host[:port]`, as it appears in the authority of the URL.
pub(crate) fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

/// The tunnel endpoint used for session negotiation.
pub fn tunnel_url(host: &Url, min_version: &str) -> JuResult<Url> {
    let mut url = Url::parse(&format!("ws://{}{}", authority(host), PROXY_ENDPOINT))?;
    url.query_pairs_mut()
        .append_pair("min_version", min_version)
        .append_pair("jupyter_http_over_ws_auth_url", host.as_str());
    Ok(url)
}

/// Connection settings that route kernel traffic through the proxy.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    pub ws_url: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub append_token: bool,
}

impl RemoteSettings {
    pub fn derive(host: &Url) -> Self {
        let token = host
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .filter(|t| !t.is_empty());

        Self {
            ws_url: format!("ws://{}{}/proxied_ws", authority(host), PROXY_ENDPOINT),
            base_url: host.origin().ascii_serialization(),
            append_token: token.is_some(),
            token,
        }
    }
}
