//! Structured cache keys.
//!
//! Keys are composed from a resource kind, a resource identifier and an
//! optional attribute, rendered as `kind:id[:attribute]`. The kind is
//! restricted to a safe character set; identifiers and attributes are
//! escaped so that distinct parts can never render the same string:
//!
//! ```text
//! CacheKey::new("org", "42")                      -> org:42
//! CacheKey::new("org", "42").with_attribute("cfg") -> org:42:cfg
//! CacheKey::new("org", "a:b")                     -> org:a\:b
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::KeyError;

/// Separator between key segments.
pub const SEPARATOR: char = ':';

const ESCAPE: char = '\\';

static KIND_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("Invalid kind regex"));

/// Validates a kind or namespace segment.
pub fn validate_kind(kind: &str) -> Result<(), KeyError> {
    if KIND_PATTERN.is_match(kind) {
        Ok(())
    } else {
        Err(KeyError::InvalidKind(kind.to_string()))
    }
}

/// Escapes the separator and the escape character in a segment.
#[must_use]
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// A cache key made of kind, identifier and optional attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: String,
    id: String,
    attribute: Option<String>,
}

impl CacheKey {
    /// Creates a key for the given kind and identifier.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKind` if the kind contains characters outside
    /// `[A-Za-z0-9_.-]`, and `KeyError::EmptyId` for an empty identifier.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Result<Self, KeyError> {
        let kind = kind.into();
        let id = id.into();
        validate_kind(&kind)?;
        if id.is_empty() {
            return Err(KeyError::EmptyId);
        }
        Ok(Self {
            kind,
            id,
            attribute: None,
        })
    }

    /// Returns this key narrowed to a sub-attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Prefix shared by every rendered key of the given kind.
    pub fn kind_prefix(kind: &str) -> Result<String, KeyError> {
        validate_kind(kind)?;
        Ok(format!("{kind}{SEPARATOR}"))
    }

    /// Parses a rendered key back into its parts.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Malformed` for dangling escapes, too many segments or
    /// a missing identifier, and the construction errors of [`CacheKey::new`].
    pub fn parse(rendered: &str) -> Result<Self, KeyError> {
        let mut segments = Vec::with_capacity(3);
        let mut current = String::new();
        let mut chars = rendered.chars();

        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(next) => current.push(next),
                    None => return Err(KeyError::Malformed(rendered.to_string())),
                },
                SEPARATOR => segments.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        segments.push(current);

        let mut segments = segments.into_iter();
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(kind), Some(id), attribute, None) => {
                let key = Self::new(kind, id)?;
                Ok(match attribute {
                    Some(attr) => key.with_attribute(attr),
                    None => key,
                })
            }
            _ => Err(KeyError::Malformed(rendered.to_string())),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.kind, escape_segment(&self.id))?;
        if let Some(attr) = &self.attribute {
            write!(f, "{SEPARATOR}{}", escape_segment(attr))?;
        }
        Ok(())
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_kind_and_id() {
        let key = CacheKey::new("org", "42").unwrap();
        assert_eq!(key.to_string(), "org:42");
        assert_eq!(key.kind(), "org");
        assert_eq!(key.id(), "42");
        assert!(key.attribute().is_none());
    }

    #[test]
    fn test_render_with_attribute() {
        let key = CacheKey::new("org", "42").unwrap().with_attribute("config");
        assert_eq!(key.to_string(), "org:42:config");
    }

    #[test]
    fn test_separator_in_id_is_escaped() {
        let ambiguous = CacheKey::new("org", "a:b").unwrap();
        let nested = CacheKey::new("org", "a").unwrap().with_attribute("b");
        assert_eq!(ambiguous.to_string(), r"org:a\:b");
        assert_ne!(ambiguous.to_string(), nested.to_string());
    }

    #[test]
    fn test_escape_character_is_escaped() {
        let key = CacheKey::new("path", r"c:\tmp").unwrap();
        assert_eq!(key.to_string(), r"path:c\:\\tmp");
    }

    #[test]
    fn test_parse_recovers_parts() {
        let original = CacheKey::new("api_key", r"k:1\x")
            .unwrap()
            .with_attribute("scope:read");
        let parsed = CacheKey::parse(&original.to_string()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_invalid_kind_rejected() {
        assert_eq!(
            CacheKey::new("org:x", "1"),
            Err(KeyError::InvalidKind("org:x".to_string()))
        );
        assert_eq!(
            CacheKey::new("", "1"),
            Err(KeyError::InvalidKind(String::new()))
        );
        assert_eq!(CacheKey::new("org", ""), Err(KeyError::EmptyId));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(CacheKey::parse("org"), Err(KeyError::Malformed(_))));
        assert!(matches!(CacheKey::parse(r"org:1\"), Err(KeyError::Malformed(_))));
        assert!(matches!(CacheKey::parse("a:b:c:d"), Err(KeyError::Malformed(_))));
    }

    #[test]
    fn test_kind_prefix() {
        assert_eq!(CacheKey::kind_prefix("user").unwrap(), "user:");
        let key = CacheKey::new("user", "7").unwrap();
        assert!(key.to_string().starts_with(&CacheKey::kind_prefix("user").unwrap()));
        assert!(CacheKey::kind_prefix("bad ns").is_err());
    }
}
