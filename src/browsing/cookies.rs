//! Cookie jar carried across simulated requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::Cookie;

/// Ordered name -> cookie mapping owned by one browsing session.
///
/// Replacing a cookie moves it to the end, so the outgoing header lists
/// cookies in the order the application last set them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

/// Counts reported by [`CookieJar::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub stored: usize,
    pub rescinded: usize,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Value of the named cookie.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|c| c.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert a cookie, replacing any cookie with the same name.
    pub fn insert(&mut self, cookie: Cookie) {
        self.remove(&cookie.name);
        self.cookies.push(cookie);
    }

    pub fn remove(&mut self, name: &str) -> Option<Cookie> {
        let index = self.cookies.iter().position(|c| c.name == name)?;
        Some(self.cookies.remove(index))
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    /// Merge cookies from a response.
    ///
    /// A cookie with a known name replaces the stored one. A cookie whose
    /// expiry has passed rescinds the stored one instead of being kept.
    pub fn merge<'a>(
        &mut self,
        incoming: impl IntoIterator<Item = &'a Cookie>,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for cookie in incoming {
            self.remove(&cookie.name);
            if cookie.is_live_at(now) {
                self.cookies.push(cookie.clone());
                outcome.stored += 1;
            } else {
                outcome.rescinded += 1;
            }
        }
        outcome
    }

    /// Outgoing `Cookie` header: `name=value;` per cookie, no attributes.
    ///
    /// `None` for an empty jar.
    pub fn to_cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={};", c.name, c.value))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a CookieJar {
    type Item = &'a Cookie;
    type IntoIter = std::slice::Iter<'a, Cookie>;

    fn into_iter(self) -> Self::IntoIter {
        self.cookies.iter()
    }
}
