use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag applied to calls dispatched without one.
pub const DEFAULT_TAG: &str = "net";

/// Caller-chosen label grouping in-flight calls for bulk cancellation.
///
/// Tags are not unique; any number of concurrent calls may share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(tag: impl Into<String>) -> Self {
        Tag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Tag {
    fn default() -> Self {
        Tag(DEFAULT_TAG.to_string())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag::new(s)
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Tag(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tag_is_net() {
        assert_eq!(Tag::default().as_str(), "net");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Tag::from("screen-a")).unwrap();
        assert_eq!(json, r#""screen-a""#);
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Tag::new("screen-a"));
    }
}
