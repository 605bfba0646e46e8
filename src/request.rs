//! Incoming HTTP request type.

use percent_encoding::percent_decode_str;

use crate::params::Params;
use crate::pool::Pooled;

/// An incoming HTTP request.
///
/// Carries both the decoded path and the raw (wire) path so the router can
/// match against either form, plus the captured route parameters once
/// dispatch has resolved a parametric route.
pub struct Request {
    method: String,
    path: String,
    raw_path: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    host: String,
    remote_addr: String,
    capture: Option<RouteCapture>,
}

/// Which string the captured byte ranges index into.
pub(crate) enum CaptureSource {
    /// The request's decoded path.
    Decoded,
    /// The request's raw path (`UseRawPath` branch).
    Raw,
    /// A path dispatch derived itself, e.g. the slash-toggled alternate.
    Owned(String),
}

pub(crate) struct RouteCapture {
    pub(crate) params: Pooled<Params>,
    pub(crate) source: CaptureSource,
}

impl Request {
    /// Builds a request from a method and a request target as it appears on
    /// the wire (percent-encoded, optionally with a query string).
    ///
    /// The target before `?` becomes the raw path; its percent-decoded form
    /// becomes the path. A target that is not valid percent-encoded UTF-8 is
    /// kept verbatim as both.
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (raw_path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        let path = match percent_decode_str(raw_path).decode_utf8() {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => raw_path.to_owned(),
        };
        Self {
            method: method.into(),
            path,
            raw_path: raw_path.to_owned(),
            query: query.to_owned(),
            headers: Vec::new(),
            body: Vec::new(),
            host: String::new(),
            remote_addr: String::new(),
            capture: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = addr.into();
        self
    }

    /// Overrides the raw path independently of the decoded one. Used by
    /// hosts that track the two separately; a raw path that is not a valid
    /// encoding of the decoded path sends matching down the decoded branch.
    pub fn with_raw_path(mut self, raw: impl Into<String>) -> Self {
        self.raw_path = raw.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The percent-decoded path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path as received on the wire, still percent-encoded.
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request host: the explicit host if set, else the `Host` header.
    pub fn host(&self) -> &str {
        if !self.host.is_empty() {
            return &self.host;
        }
        self.header("host").unwrap_or("")
    }

    /// `ip:port` of the peer, when the host server recorded it.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Returns a named route parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns
    /// `Some("42")`. The value is sliced from the capture path, so case and
    /// percent-encoding survive exactly as matched.
    pub fn param(&self, name: &str) -> Option<&str> {
        let capture = self.capture.as_ref()?;
        let (start, end) = capture.params.get(name)?;
        let path = match &capture.source {
            CaptureSource::Decoded => self.path.as_str(),
            CaptureSource::Raw => self.raw_path.as_str(),
            CaptureSource::Owned(p) => p.as_str(),
        };
        path.get(start..end)
    }

    pub(crate) fn set_capture(&mut self, capture: RouteCapture) {
        self.capture = Some(capture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_splits_query_and_decodes() {
        let req = Request::new("GET", "/a%2Fb?x=1&y=2");
        assert_eq!(req.path(), "/a/b");
        assert_eq!(req.raw_path(), "/a%2Fb");
        assert_eq!(req.query(), "x=1&y=2");
    }

    #[test]
    fn malformed_encoding_kept_verbatim() {
        let req = Request::new("GET", "/files/%ff");
        assert_eq!(req.path(), "/files/%ff");
        assert_eq!(req.raw_path(), "/files/%ff");
    }

    #[test]
    fn host_falls_back_to_header() {
        let req = Request::new("GET", "/").with_header("Host", "api.example.com");
        assert_eq!(req.host(), "api.example.com");
        let req = Request::new("GET", "/").with_host("override.example.com");
        assert_eq!(req.host(), "override.example.com");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::new("GET", "/").with_header("Content-Type", "text/plain");
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("missing"), None);
    }
}
