//! Simulated request handed to the application runtime.
//!
//! There is no transport behind it. It answers exactly the questions a
//! runtime asks of an incoming request: verb, known headers by index,
//! unknown headers by name, and the raw entity body.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_LENGTH, HOST, HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Bytes escaped in the wire path.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}');

/// Bytes escaped in the wire query; `%` passes through so pre-encoded queries are unchanged.
const QUERY_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'#');

use super::form::FormFields;
use crate::constants::{FORM_CONTENT_TYPE, SIMULATED_HOST};
use crate::error::{Error, Result};

/// Generates [`KnownHeader`] with its canonical index and wire name.
macro_rules! known_headers {
    ($($variant:ident = $index:literal => $name:literal),+ $(,)?) => {
        /// The well-known request headers, addressed by their canonical index.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum KnownHeader {
            $($variant = $index),+
        }

        impl KnownHeader {
            /// All known headers in index order.
            pub const ALL: &'static [KnownHeader] = &[$(KnownHeader::$variant),+];

            pub fn index(self) -> usize {
                self as usize
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(KnownHeader::$variant => $name),+
                }
            }

            pub fn from_index(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }

            /// Case-insensitive lookup by header name.
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|h| h.name().eq_ignore_ascii_case(name))
            }
        }
    };
}

known_headers! {
    CacheControl = 0 => "Cache-Control",
    Connection = 1 => "Connection",
    Date = 2 => "Date",
    KeepAlive = 3 => "Keep-Alive",
    Pragma = 4 => "Pragma",
    Trailer = 5 => "Trailer",
    TransferEncoding = 6 => "Transfer-Encoding",
    Upgrade = 7 => "Upgrade",
    Via = 8 => "Via",
    Warning = 9 => "Warning",
    Allow = 10 => "Allow",
    ContentLength = 11 => "Content-Length",
    ContentType = 12 => "Content-Type",
    ContentEncoding = 13 => "Content-Encoding",
    ContentLanguage = 14 => "Content-Language",
    ContentLocation = 15 => "Content-Location",
    ContentMd5 = 16 => "Content-MD5",
    ContentRange = 17 => "Content-Range",
    Expires = 18 => "Expires",
    LastModified = 19 => "Last-Modified",
    Accept = 20 => "Accept",
    AcceptCharset = 21 => "Accept-Charset",
    AcceptEncoding = 22 => "Accept-Encoding",
    AcceptLanguage = 23 => "Accept-Language",
    Authorization = 24 => "Authorization",
    Cookie = 25 => "Cookie",
    Expect = 26 => "Expect",
    From = 27 => "From",
    Host = 28 => "Host",
    IfMatch = 29 => "If-Match",
    IfModifiedSince = 30 => "If-Modified-Since",
    IfNoneMatch = 31 => "If-None-Match",
    IfRange = 32 => "If-Range",
    IfUnmodifiedSince = 33 => "If-Unmodified-Since",
    MaxForwards = 34 => "Max-Forwards",
    ProxyAuthorization = 35 => "Proxy-Authorization",
    Referer = 36 => "Referer",
    Range = 37 => "Range",
    Te = 38 => "TE",
    UserAgent = 39 => "User-Agent",
}

/// HTTP verbs a browsing session can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fabricated request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedRequest {
    verb: HttpVerb,
    virtual_path: String,
    path: String,
    query: String,
    headers: Option<Vec<(String, String)>>,
    form: Option<FormFields>,
    cookie_header: Option<String>,
}

impl SimulatedRequest {
    /// `path` is relative to the application root, without a leading `/`.
    pub fn new(verb: HttpVerb, path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            verb,
            virtual_path: crate::constants::DEFAULT_VIRTUAL_PATH.to_string(),
            path: path.into(),
            query: query.into(),
            headers: None,
            form: None,
            cookie_header: None,
        }
    }

    #[must_use]
    pub fn with_virtual_path(mut self, virtual_path: impl Into<String>) -> Self {
        self.virtual_path = virtual_path.into();
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Option<Vec<(String, String)>>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_form(mut self, form: Option<FormFields>) -> Self {
        self.form = form;
        self
    }

    #[must_use]
    pub fn with_cookie_header(mut self, cookie_header: Option<String>) -> Self {
        self.cookie_header = cookie_header;
        self
    }

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    /// Verb name as the runtime reads it.
    pub fn http_verb_name(&self) -> &'static str {
        self.verb.as_str()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn form(&self) -> Option<&FormFields> {
        self.form.as_ref()
    }

    /// Application-relative URL including the virtual path and query.
    pub fn raw_url(&self) -> String {
        let mut url = self.full_path();
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query);
        }
        url
    }

    /// [`raw_url`](Self::raw_url) with bytes that are invalid in a URI
    /// percent-encoded.
    pub fn wire_url(&self) -> String {
        let mut url = utf8_percent_encode(&self.full_path(), PATH_ESCAPE).to_string();
        if !self.query.is_empty() {
            url.push('?');
            url.extend(utf8_percent_encode(&self.query, QUERY_ESCAPE));
        }
        url
    }

    /// Answer a known header query.
    ///
    /// POST always reports the form content type and the cookie header
    /// always comes from the session's jar. Everything else falls through
    /// to the explicit headers, if any.
    pub fn known_header(&self, header: KnownHeader) -> Option<String> {
        match header {
            KnownHeader::ContentType if self.verb == HttpVerb::Post => {
                Some(FORM_CONTENT_TYPE.to_string())
            },
            KnownHeader::Cookie => self.cookie_header.clone(),
            other => self.explicit_header(other.name()),
        }
    }

    /// Answer a known header query by raw index.
    pub fn known_header_by_index(&self, index: usize) -> Option<String> {
        KnownHeader::from_index(index).and_then(|h| self.known_header(h))
    }

    /// Look up a non-standard header by name.
    pub fn unknown_header(&self, name: &str) -> Option<String> {
        self.explicit_header(name)
    }

    /// All explicit headers that are not known headers.
    ///
    /// `None` when the request carries no explicit headers at all.
    pub fn unknown_headers(&self) -> Option<Vec<(String, String)>> {
        let headers = self.headers.as_ref()?;
        Some(
            headers
                .iter()
                .filter(|(name, _)| KnownHeader::from_name(name).is_none())
                .cloned()
                .collect(),
        )
    }

    /// Raw entity body: the encoded form fields, or empty without a form.
    pub fn entity_body(&self) -> Vec<u8> {
        self.form
            .as_ref()
            .map(|form| form.encode().into_bytes())
            .unwrap_or_default()
    }

    /// Materialise the request for runtimes that speak `http` types.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path, query or a header value cannot
    /// be represented on the wire.
    pub fn to_http_request(&self) -> Result<hyper::Request<Full<Bytes>>> {
        let uri = format!("http://{SIMULATED_HOST}{}", self.wire_url());
        let body = self.entity_body();
        let body_len = body.len();
        let mut request = hyper::Request::builder()
            .method(self.verb.as_str())
            .uri(&uri)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| Error::invalid_argument(format!("cannot build request for '{uri}': {e}")))?;

        let headers = request.headers_mut();
        // Content-Length is derived from the entity body below
        for header in KnownHeader::ALL {
            if *header == KnownHeader::ContentLength {
                continue;
            }
            if let Some(value) = self.known_header(*header) {
                headers.insert(header_name(header.name())?, header_value(&value)?);
            }
        }
        for (name, value) in self.unknown_headers().unwrap_or_default() {
            headers.append(header_name(&name)?, header_value(&value)?);
        }

        if !headers.contains_key(HOST) {
            headers.insert(HOST, HeaderValue::from_static(SIMULATED_HOST));
        }
        if body_len > 0 {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        }

        Ok(request)
    }

    fn full_path(&self) -> String {
        let mut path = self.virtual_path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(&self.path);
        path
    }

    fn explicit_header(&self, name: &str) -> Option<String> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::invalid_argument(format!("invalid header name '{name}': {e}")))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::invalid_argument(format!("invalid header value '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Option<Vec<(String, String)>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_known_header_indexes() {
        assert_eq!(KnownHeader::ContentType.index(), 12);
        assert_eq!(KnownHeader::Cookie.index(), 25);
        assert_eq!(KnownHeader::UserAgent.index(), 39);
        assert_eq!(KnownHeader::ALL.len(), 40);
        assert_eq!(KnownHeader::from_index(25), Some(KnownHeader::Cookie));
        assert_eq!(KnownHeader::from_index(40), None);
        assert_eq!(KnownHeader::from_name("user-agent"), Some(KnownHeader::UserAgent));
        assert_eq!(KnownHeader::from_name("X-Custom"), None);
    }

    #[test]
    fn test_post_overrides_content_type() {
        let request = SimulatedRequest::new(HttpVerb::Post, "account/login", "")
            .with_headers(headers(&[("Content-Type", "application/json")]));
        assert_eq!(
            request.known_header(KnownHeader::ContentType).as_deref(),
            Some(FORM_CONTENT_TYPE)
        );

        let request = SimulatedRequest::new(HttpVerb::Get, "account/login", "")
            .with_headers(headers(&[("Content-Type", "application/json")]));
        assert_eq!(
            request.known_header(KnownHeader::ContentType).as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn test_cookie_header_comes_from_jar_only() {
        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "")
            .with_headers(headers(&[("Cookie", "forged=1")]));
        assert_eq!(request.known_header(KnownHeader::Cookie), None);

        let request = request.with_cookie_header(Some("auth=abc;".to_string()));
        assert_eq!(
            request.known_header_by_index(25).as_deref(),
            Some("auth=abc;")
        );
    }

    #[test]
    fn test_unknown_headers_exclude_known_names() {
        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "").with_headers(headers(&[
            ("User-Agent", "apphost"),
            ("X-Requested-With", "XMLHttpRequest"),
        ]));

        assert_eq!(
            request.unknown_headers(),
            headers(&[("X-Requested-With", "XMLHttpRequest")])
        );
        assert_eq!(
            request.unknown_header("x-requested-with").as_deref(),
            Some("XMLHttpRequest")
        );
        assert_eq!(
            request.known_header(KnownHeader::UserAgent).as_deref(),
            Some("apphost")
        );
    }

    #[test]
    fn test_no_explicit_headers() {
        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "");
        assert_eq!(request.unknown_headers(), None);
        assert_eq!(request.unknown_header("X-Anything"), None);
        assert_eq!(request.known_header(KnownHeader::Accept), None);
    }

    #[test]
    fn test_entity_body() {
        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "");
        assert!(request.entity_body().is_empty());

        let form: FormFields = [("email", "a@b.com"), ("password", "x")].into_iter().collect();
        let request =
            SimulatedRequest::new(HttpVerb::Post, "account/login", "").with_form(Some(form));
        assert_eq!(request.entity_body(), b"email=a%40b.com&password=x".to_vec());
    }

    #[test]
    fn test_raw_url() {
        let request = SimulatedRequest::new(HttpVerb::Get, "search", "q=test");
        assert_eq!(request.raw_url(), "/search?q=test");

        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "")
            .with_virtual_path("/shop");
        assert_eq!(request.raw_url(), "/shop/home/index");
    }

    #[test]
    fn test_to_http_request() {
        let form: FormFields = [("email", "a@b.com")].into_iter().collect();
        let request = SimulatedRequest::new(HttpVerb::Post, "account/login", "next=home")
            .with_form(Some(form))
            .with_cookie_header(Some("auth=abc;".to_string()))
            .with_headers(headers(&[("X-Trace", "t1")]));

        let http = request.to_http_request().unwrap();
        assert_eq!(http.method(), hyper::Method::POST);
        assert_eq!(http.uri().path(), "/account/login");
        assert_eq!(http.uri().query(), Some("next=home"));

        let headers = http.headers();
        assert_eq!(headers["content-type"], FORM_CONTENT_TYPE);
        assert_eq!(headers["cookie"], "auth=abc;");
        assert_eq!(headers["x-trace"], "t1");
        assert_eq!(headers["host"], SIMULATED_HOST);
        assert_eq!(headers["content-length"], "15");
    }

    #[test]
    fn test_to_http_request_escapes_invalid_uri_bytes() {
        let request = SimulatedRequest::new(HttpVerb::Get, "search", "q=hello world&tag=<b>");
        assert_eq!(request.raw_url(), "/search?q=hello world&tag=<b>");
        assert_eq!(request.wire_url(), "/search?q=hello%20world&tag=%3Cb%3E");

        let http = request.to_http_request().unwrap();
        assert_eq!(http.uri().path(), "/search");
        assert_eq!(http.uri().query(), Some("q=hello%20world&tag=%3Cb%3E"));

        let request = SimulatedRequest::new(HttpVerb::Get, "files/my report", "q=a%20b");
        let http = request.to_http_request().unwrap();
        assert_eq!(http.uri().path(), "/files/my%20report");
        assert_eq!(http.uri().query(), Some("q=a%20b"));
    }

    #[test]
    fn test_content_length_follows_entity_body() {
        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "")
            .with_headers(headers(&[("Content-Length", "99")]));
        let http = request.to_http_request().unwrap();
        assert!(http.headers().get("content-length").is_none());

        let form: FormFields = [("a", "1")].into_iter().collect();
        let request = SimulatedRequest::new(HttpVerb::Post, "echo/form", "")
            .with_form(Some(form))
            .with_headers(headers(&[("Content-Length", "99")]));
        let http = request.to_http_request().unwrap();
        assert_eq!(http.headers()["content-length"], "3");
    }

    #[test]
    fn test_to_http_request_rejects_bad_header() {
        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "")
            .with_headers(headers(&[("X-Bad", "line\nbreak")]));
        assert!(matches!(
            request.to_http_request(),
            Err(Error::InvalidArgument(_))
        ));
    }
}
