//! Form field flattening and `application/x-www-form-urlencoded` encoding.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Characters left as-is by form encoding; everything else is escaped.
const FORM_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'*')
    .remove(b'(')
    .remove(b')');

/// Flat, ordered name -> value pairs posted as a form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten any serialisable value with named fields.
    ///
    /// Nested objects become dotted names (`Form.Email`), sequences become
    /// indexed names (`Tags[0]`), `null` fields are left out.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value does not serialise to an
    /// object (a bare string, number or sequence has no field names).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::invalid_argument(format!("form value is not serialisable: {e}")))?;
        let Value::Object(map) = value else {
            return Err(Error::invalid_argument(
                "form value must serialise to an object with named fields",
            ));
        };

        let mut fields = Self::new();
        for (name, value) in map {
            flatten_into(&mut fields, name, value);
        }
        Ok(fields)
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value posted under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode as `key=value&key=value`, percent-encoding keys and values.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Parse an encoded body. A trailing `&` and empty pairs are tolerated.
    pub fn decode(body: &str) -> Self {
        body.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(k), decode_component(v))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn flatten_into(fields: &mut FormFields, name: String, value: Value) {
    match value {
        Value::Null => {},
        Value::Bool(b) => fields.push(name, b.to_string()),
        Value::Number(n) => fields.push(name, n.to_string()),
        Value::String(s) => fields.push(name, s),
        Value::Array(items) => {
            for (index, item) in items.into_iter().enumerate() {
                flatten_into(fields, format!("{name}[{index}]"), item);
            }
        },
        Value::Object(map) => {
            for (key, item) in map {
                flatten_into(fields, format!("{name}.{key}"), item);
            }
        },
    }
}

fn encode_component(raw: &str) -> String {
    // Spaces go out as '+'. A literal '+' is escaped as %2B, so this is unambiguous.
    utf8_percent_encode(raw, FORM_ESCAPE)
        .to_string()
        .replace("%20", "+")
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
