// HTTP middleware

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;
use uuid::Uuid;

use iptvproxy_core::{
    config::ServerConfig,
    provider::ClientIdentity,
    service::{ClientContext, Credentials, IpClass},
    Error,
};

use super::{AppError, AppState};

pub const SESSION_COOKIE: &str = "http_session_id";

/// Request extension marking connections accepted by the HTTPS listener
#[derive(Debug, Clone, Copy)]
pub struct TlsListener;

/// Hostnames advertised in generated URLs, per client address class
#[derive(Debug, Clone)]
pub struct Hostnames {
    pub loopback: String,
    pub private: Option<String>,
    pub public: Option<String>,
    pub port: u16,
    /// Port of this process's HTTPS listener
    pub https_port: Option<u16>,
    /// A TLS-terminating proxy fronts the plaintext port
    pub forwarded_https: bool,
}

impl Hostnames {
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            loopback: config.hostname_loopback.clone(),
            private: config.hostname_private.clone(),
            public: config.hostname_public.clone(),
            port: config.port,
            https_port: config.served_https_port(),
            forwarded_https: config.trust_forwarded_proto,
        }
    }

    fn configured(&self, class: IpClass) -> Option<&str> {
        match class {
            IpClass::Loopback => Some(self.loopback.as_str()),
            IpClass::Private => self.private.as_deref(),
            IpClass::Public => self.public.as_deref(),
        }
        .filter(|hostname| !hostname.is_empty())
    }

    /// `scheme://host:port` a client of `class` should use to reach the proxy.
    /// Falls back to the request's `Host` header when no hostname is configured.
    #[must_use]
    pub fn base_url(&self, class: IpClass, secure: bool, host: Option<&str>) -> String {
        let scheme = if secure { "https" } else { "http" };
        let port = match self.https_port {
            Some(https_port) if secure => https_port,
            _ => self.port,
        };
        match (self.configured(class), host) {
            (Some(hostname), _) => format!("{scheme}://{hostname}:{port}"),
            (None, Some(host)) => format!("{scheme}://{host}"),
            (None, None) => format!("{scheme}://{}:{port}", self.loopback),
        }
    }

    /// HTTPS URL a refused plaintext request should be retried at. `None` when
    /// neither this process nor a trusted proxy serves HTTPS.
    #[must_use]
    pub fn https_redirect(&self, class: IpClass, host: Option<&str>, path: &str) -> Option<String> {
        let host = self
            .configured(class)
            .or_else(|| host.map(strip_port))
            .unwrap_or(self.loopback.as_str());
        match self.https_port {
            Some(port) => Some(format!("https://{host}:{port}{path}")),
            None if self.forwarded_https => Some(format!("https://{host}{path}")),
            None => None,
        }
    }
}

/// `host` of a `Host` header value `host[:port]`
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.split_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Password of an HTTP Basic `Authorization` header
fn basic_password(headers: &HeaderMap) -> Option<String> {
    let encoded = header_str(headers, header::AUTHORIZATION)?.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded.split_once(':').map(|(_, password)| password.to_string())
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Transport facts and presented credentials of a request, before the gate
#[derive(Debug, Clone)]
pub struct RequestClient {
    pub context: ClientContext,
    pub credentials: Credentials,
    pub query: HashMap<String, String>,
    pub host: Option<String>,
    pub path: String,
    https_redirect: Option<String>,
}

impl RequestClient {
    #[must_use]
    pub fn class(&self) -> IpClass {
        self.context.class()
    }

    #[must_use]
    pub fn base_url(&self, state: &AppState) -> String {
        state
            .hostnames
            .base_url(self.class(), self.context.secure, self.host.as_deref())
    }

    /// `client_uuid` and `http_token` to carry into generated URLs.
    /// A request without `client_uuid` is given a fresh one.
    #[must_use]
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            client_uuid: self
                .query
                .get("client_uuid")
                .filter(|uuid| !uuid.is_empty())
                .cloned()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            http_token: self.query.get("http_token").cloned(),
        }
    }

    /// Apply the transport check only, mapping a refusal to 403.
    pub fn check_transport(&self, state: &AppState) -> Result<IpClass, AppError> {
        state
            .services
            .auth
            .check_transport(&self.context)
            .map_err(|e| self.rejection(e))
    }

    fn rejection(&self, err: Error) -> AppError {
        match err {
            Error::TransportPolicy(msg) => match self.https_redirect {
                Some(ref url) => AppError::forbidden(format!("{msg}; retry at {url}")),
                None => AppError::forbidden(msg),
            },
            other => other.into(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestClient
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let ConnectInfo(address) = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::internal_server_error("Missing connection info"))?;

        // A terminating proxy reports the client's scheme; only trusted when configured.
        let forwarded_https = app_state.trust_forwarded_proto
            && header_str(&parts.headers, "x-forwarded-proto")
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        let secure = parts.extensions.get::<TlsListener>().is_some() || forwarded_https;

        let query: HashMap<String, String> =
            serde_urlencoded::from_str::<Vec<(String, String)>>(parts.uri.query().unwrap_or(""))
                .map_err(|e| AppError::bad_request(format!("Invalid query string: {e}")))?
                .into_iter()
                .collect();

        let credentials = Credentials {
            http_token: query.get("http_token").cloned(),
            basic_password: basic_password(&parts.headers),
            session_id: cookie(&parts.headers, SESSION_COOKIE),
        };

        let context = ClientContext {
            ip: address.ip().to_canonical(),
            user_agent: header_str(&parts.headers, header::USER_AGENT)
                .unwrap_or_default()
                .to_string(),
            secure,
        };
        let host = header_str(&parts.headers, header::HOST).map(str::to_string);
        let path = parts.uri.path().to_string();
        let https_redirect = app_state
            .hostnames
            .https_redirect(context.class(), host.as_deref(), &path);

        Ok(Self {
            context,
            credentials,
            query,
            host,
            path,
            https_redirect,
        })
    }
}

/// A request that passed the transport and credential gate
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    pub client: RequestClient,
    pub class: IpClass,
}

impl AuthorizedClient {
    #[must_use]
    pub fn query(&self) -> &HashMap<String, String> {
        &self.client.query
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.client.query.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn identity(&self) -> ClientIdentity {
        self.client.identity()
    }

    #[must_use]
    pub fn base_url(&self, state: &AppState) -> String {
        self.client.base_url(state)
    }

    #[must_use]
    pub fn ip_address(&self) -> String {
        self.client.context.ip.to_string()
    }
}

impl<S> FromRequestParts<S> for AuthorizedClient
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let client = RequestClient::from_request_parts(parts, state).await?;

        let class = app_state
            .services
            .auth
            .authorize(&client.context, &client.credentials)
            .await
            .map_err(|e| {
                debug!("Gate refused {} {} from {}: {}", parts.method, client.path, client.context.ip, e);
                client.rejection(e)
            })?;

        Ok(Self { client, class })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn hostnames() -> Hostnames {
        Hostnames {
            loopback: "localhost".to_string(),
            private: Some("192.168.1.10".to_string()),
            public: None,
            port: 8080,
            https_port: None,
            forwarded_https: false,
        }
    }

    #[test]
    fn test_base_url_per_class() {
        let hostnames = hostnames();
        assert_eq!(
            hostnames.base_url(IpClass::Loopback, false, Some("ignored")),
            "http://localhost:8080"
        );
        assert_eq!(
            hostnames.base_url(IpClass::Private, true, None),
            "https://192.168.1.10:8080"
        );
        assert_eq!(
            hostnames.base_url(IpClass::Public, true, Some("iptv.example.com")),
            "https://iptv.example.com"
        );
    }

    #[test]
    fn test_secure_base_url_uses_https_port() {
        let hostnames = Hostnames {
            https_port: Some(8443),
            ..hostnames()
        };
        assert_eq!(
            hostnames.base_url(IpClass::Private, true, None),
            "https://192.168.1.10:8443"
        );
        assert_eq!(
            hostnames.base_url(IpClass::Private, false, None),
            "http://192.168.1.10:8080"
        );
    }

    #[test]
    fn test_https_redirect_only_names_served_ports() {
        let plain = hostnames();
        assert_eq!(plain.https_redirect(IpClass::Public, Some("iptv.example.com:8080"), "/live"), None);

        let tls = Hostnames {
            https_port: Some(8443),
            ..hostnames()
        };
        assert_eq!(
            tls.https_redirect(IpClass::Public, Some("iptv.example.com:8080"), "/live").as_deref(),
            Some("https://iptv.example.com:8443/live")
        );
        assert_eq!(
            tls.https_redirect(IpClass::Private, Some("ignored"), "/").as_deref(),
            Some("https://192.168.1.10:8443/")
        );

        let proxied = Hostnames {
            forwarded_https: true,
            ..hostnames()
        };
        assert_eq!(
            proxied.https_redirect(IpClass::Public, Some("iptv.example.com"), "/index.html").as_deref(),
            Some("https://iptv.example.com/index.html")
        );
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }

    #[test]
    fn test_basic_password() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", STANDARD.encode("user:se:cret"))).unwrap(),
        );
        assert_eq!(basic_password(&headers).as_deref(), Some("se:cret"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(basic_password(&headers), None);
    }

    #[test]
    fn test_cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; http_session_id=abc-123"),
        );
        assert_eq!(cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc-123"));
        assert_eq!(cookie(&headers, "missing"), None);
    }
}
