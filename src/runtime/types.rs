//! Data types exchanged with the application runtime.
//!
//! Everything here is plain serialisable data so it can be handed back
//! across the isolation boundary once a request has completed.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cookie as parsed from the runtime's response cookie collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// `None` is the unset expiry: a session cookie that never lapses
    /// on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// Create a session cookie (no expiry).
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
        }
    }

    /// Set an explicit expiry.
    #[must_use]
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Whether the cookie should still be stored at `now`.
    ///
    /// Cookies without an expiry are always live.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_none_or(|expires| expires > now)
    }

    /// Parse a `Set-Cookie` header value.
    ///
    /// `Max-Age` wins over `Expires`, and a non-positive `Max-Age` yields an
    /// expiry in the past. Attributes other than those two are ignored.
    /// Returns `None` when the header has no `name=value` pair.
    pub fn parse_set_cookie(header: &str, now: DateTime<Utc>) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut expires = None;
        let mut max_age = None;
        for attribute in parts {
            let Some((key, val)) = attribute.split_once('=') else {
                continue;
            };
            let val = val.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "expires" => expires = parse_http_date(val),
                "max-age" => max_age = val.parse::<i64>().ok(),
                _ => {},
            }
        }

        if let Some(seconds) = max_age {
            expires = if seconds <= 0 {
                Some(DateTime::<Utc>::UNIX_EPOCH)
            } else {
                Duration::try_seconds(seconds).and_then(|age| now.checked_add_signed(age))
            };
        }

        Some(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
            expires,
        })
    }
}

/// Non-RFC 2822 date layouts seen in `Expires`, tried in order.
///
/// Two-digit years come first: `%Y` would otherwise read `70` as year 70.
const LEGACY_DATE_FORMATS: &[&str] = &[
    "%a, %d-%b-%y %H:%M:%S GMT",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a, %d-%b-%Y %H:%M:%S GMT",
    "%A, %d-%b-%Y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

/// Parse an HTTP-date: RFC 2822, the dashed Netscape/RFC 850 forms, or asctime.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    LEGACY_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Opaque handle to the framework's session state for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    /// Store a session value.
    ///
    /// A value that cannot be represented as JSON (a map with non-string
    /// keys, a failing `Serialize` impl) is stored as `null`.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.values.insert(key.into(), value);
        self
    }

    /// Read a session value, `None` if absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Snapshot of the runtime's response object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
}

impl RuntimeResponse {
    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }
}

/// Outcome of controller action execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionExecutedContext {
    /// HTTP method the action was dispatched for.
    pub method: String,
    /// Route template the router selected (e.g. `/users/{id}`).
    pub route: String,
    /// Status code of the action's result.
    pub status: u16,
}

/// Outcome of result execution (the response body has been rendered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultExecutedContext {
    pub route: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub body_len: usize,
}

/// Unhandled fault raised by the runtime while processing a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeFault {
    pub message: String,
}

impl RuntimeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
