//! Transport-neutral request and response values
//!
//! The runtime never touches sockets. A transport adapter builds a
//! [`Request`], hands it to the dispatcher and writes the returned
//! [`Response`] back out.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Inbound request
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    query: Vec<(String, String)>,
    body: Vec<u8>,
    params: HashMap<String, String>,
}

impl Request {
    /// Create a request. A query string in `target` is split off and parsed.
    ///
    /// ```rust
    /// use trellis::Request;
    ///
    /// let req = Request::new("get", "/users?name=abc&key=value");
    /// assert_eq!(req.method(), "GET");
    /// assert_eq!(req.path(), "/users");
    /// assert_eq!(req.query("key"), Some("value"));
    /// ```
    pub fn new(method: impl AsRef<str>, target: impl AsRef<str>) -> Self {
        let target = target.as_ref();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, Vec::new()),
        };

        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.to_string(),
            query,
            ..Default::default()
        }
    }

    /// Add a header. Names are case-insensitive.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the raw body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and the matching content type
    pub fn with_json(self, value: Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers with lowercased names
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// First value of a query parameter
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Query parameters in request order
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Path parameter captured by the matched route
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

// `+` as space first, then `%XX` escapes; malformed escapes are kept verbatim
fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Outbound response
///
/// Handlers either write raw bytes or set a structured payload; the payload
/// is serialized after the whole chain (interceptors included) has run.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    payload: Option<Value>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            payload: None,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Set a header, replacing any previous value
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Replace the body with raw bytes and drop any pending payload
    pub fn write(&mut self, body: impl Into<Vec<u8>>) {
        self.payload = None;
        self.body = body.into();
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut Value> {
        self.payload.as_mut()
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = Some(payload);
    }

    pub(crate) fn take_payload(&mut self) -> Option<Value> {
        self.payload.take()
    }
}

/// Error returned by a [`Serializer`]
pub type SerializeError = Box<dyn std::error::Error + Send + Sync>;

/// Turns a structured payload into body bytes
#[derive(Clone)]
pub struct Serializer(Arc<dyn Fn(&Value) -> Result<Vec<u8>, SerializeError> + Send + Sync>);

impl Serializer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Vec<u8>, SerializeError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Compact JSON via `serde_json`
    pub fn json() -> Self {
        Self::new(|value| serde_json::to_vec(value).map_err(Into::into))
    }

    pub fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializeError> {
        (self.0)(value)
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::json()
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Serializer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_query_parsing() {
        let req = Request::new("post", "/a/b?name=abc&flag&q=hello+world%21");

        assert_eq!(req.method(), "POST");
        assert_eq!(req.path(), "/a/b");
        assert_eq!(req.query("name"), Some("abc"));
        assert_eq!(req.query("flag"), Some(""));
        assert_eq!(req.query("q"), Some("hello world!"));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn test_malformed_escape_kept() {
        let req = Request::new("GET", "/?a=100%&b=%zz");
        assert_eq!(req.query("a"), Some("100%"));
        assert_eq!(req.query("b"), Some("%zz"));
    }

    #[test]
    fn test_query_multibyte_and_escaped_plus() {
        let req = Request::new("GET", "/x?name=caf%C3%A9&sum=1%2B1&t=%4");
        assert_eq!(req.query("name"), Some("café"));
        assert_eq!(req.query("sum"), Some("1+1"));
        assert_eq!(req.query("t"), Some("%4"));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let req = Request::new("GET", "/").with_header("X-Tenant", "acme");
        assert_eq!(req.header("x-tenant"), Some("acme"));
        assert_eq!(req.header("X-TENANT"), Some("acme"));
    }

    #[test]
    fn test_response_defaults() {
        let mut res = Response::new();
        assert_eq!(res.status(), 200);

        res.set_header("Content-Type", "text/plain");
        res.set_header("content-type", "application/json");
        assert_eq!(res.headers().len(), 1);
        assert_eq!(res.header("CONTENT-TYPE"), Some("application/json"));

        res.set_payload(json!({"a": 1}));
        res.write("raw");
        assert!(res.payload().is_none());
        assert_eq!(res.text(), "raw");
    }

    #[test]
    fn test_default_serializer() {
        let bytes = Serializer::default().serialize(&json!({"a": 1})).unwrap();
        assert_eq!(bytes, br#"{"a":1}"#);
    }
}
