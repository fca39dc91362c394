//! Cache identity of a reactive view.

use std::fmt;

/// Identity of a reactive view: `list|filter|sort`, empty parts omitted.
///
/// Two views with equal keys are the same cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey(String);

impl ViewKey {
    /// Separator between key components.
    pub const SEPARATOR: char = '|';

    /// Composes a key from a base (a list id, or a parent view's key) and the
    /// display forms of a filter and a sort.
    pub fn compose(base: &str, filter: Option<&str>, sort: Option<&str>) -> Self {
        let mut key = base.to_string();
        for part in [filter, sort].into_iter().flatten() {
            if !part.is_empty() {
                key.push(Self::SEPARATOR);
                key.push_str(part);
            }
        }
        Self(key)
    }

    /// Returns the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}
