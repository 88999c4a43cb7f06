//! The request boundary: a read-only request view and a
//! response-influencing handle. The HTTP framework binding that implements
//! these for a real framework is an external collaborator — `bot-gateway`
//! implements them for `axum`.

use std::net::IpAddr;

/// Case-insensitive header lookup over a read-only request view.
pub trait RequestView: Send + Sync {
    fn method(&self) -> &str;
    fn path(&self) -> &str;
    fn query_string(&self) -> Option<&str>;
    fn header(&self, name: &str) -> Option<&str>;
    fn header_names(&self) -> Vec<String>;
    fn remote_ip(&self) -> IpAddr;
    fn tls_fingerprint(&self) -> Option<&str>;
    fn trace_id(&self) -> &str;
}

/// What an action does to the response.
#[derive(Debug, Clone, Default)]
pub struct ResponseDirective {
    pub continue_pipeline: bool,
    pub status_code: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub redirect_to: Option<String>,
}

impl ResponseDirective {
    pub fn allow() -> Self {
        Self {
            continue_pipeline: true,
            ..Default::default()
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            continue_pipeline: false,
            status_code: Some(status),
            ..Default::default()
        }
    }
}

/// A simple owned `RequestView` for tests, the CLI, and scenario fixtures.
#[derive(Debug, Clone)]
pub struct StaticRequestView {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: Vec<(String, String)>,
    pub remote_ip: IpAddr,
    pub tls_fingerprint: Option<String>,
    pub trace_id: String,
}

impl StaticRequestView {
    pub fn get(path: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            query_string: None,
            headers: Vec::new(),
            remote_ip: ip,
            tls_fingerprint: None,
            trace_id: "test-trace".to_string(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_user_agent(self, ua: impl Into<String>) -> Self {
        self.with_header("user-agent", ua)
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }
}

impl RequestView for StaticRequestView {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_names(&self) -> Vec<String> {
        self.headers.iter().map(|(k, _)| k.clone()).collect()
    }

    fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    fn tls_fingerprint(&self) -> Option<&str> {
        self.tls_fingerprint.as_deref()
    }

    fn trace_id(&self) -> &str {
        &self.trace_id
    }
}
