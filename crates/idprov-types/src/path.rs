//! Document path expressions.
//!
//! A path addresses a node inside an execution document: `$` is the root,
//! `.name` selects an object field and `[n]` selects an array element, e.g.
//! `$.metadata.roles_metadata[0].role_type`. Paths are parsed once when a
//! definition is loaded so malformed paths surface as configuration errors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing a path or walking a document with one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("path '{path}' not found (missing at '{missing}')")]
    PathNotFound { path: String, missing: String },

    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl PathError {
    /// The error kind used when a path failure surfaces as a state failure.
    pub fn kind(&self) -> &'static str {
        match self {
            PathError::InvalidPath { .. } => crate::error::kinds::INVALID_PATH,
            PathError::PathNotFound { .. } => crate::error::kinds::PATH_NOT_FOUND,
            PathError::TypeMismatch { .. } => crate::error::kinds::TYPE_MISMATCH,
        }
    }
}

// ---------------------------------------------------------------------------
// DocPath
// ---------------------------------------------------------------------------

/// One hop of a document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath {
    raw: String,
    segments: Vec<Segment>,
}

impl DocPath {
    /// The root path `$`.
    pub fn root() -> Self {
        Self {
            raw: "$".to_string(),
            segments: Vec::new(),
        }
    }

    /// Parse a path expression.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidPath {
            path: input.to_string(),
            reason: reason.to_string(),
        };

        let rest = input
            .strip_prefix('$')
            .ok_or_else(|| invalid("must start with '$'"))?;

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() {
                        return Err(invalid("empty field name"));
                    }
                    segments.push(Segment::Key(key));
                }
                '[' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(_) => return Err(invalid("array index must be numeric")),
                            None => return Err(invalid("unterminated '['")),
                        }
                    }
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| invalid("empty array index"))?;
                    segments.push(Segment::Index(index));
                }
                other => {
                    return Err(invalid(&format!("unexpected character '{other}'")));
                }
            }
        }

        Ok(Self {
            raw: input.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `prefix` addresses this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &DocPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Path of a direct child field.
    pub fn child(&self, key: &str) -> DocPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        Self {
            raw: format!("{}.{key}", self.raw),
            segments,
        }
    }

    /// Render the first `len` segments back into path syntax.
    pub fn prefix_str(&self, len: usize) -> String {
        let mut out = String::from("$");
        for segment in self.segments.iter().take(len) {
            match segment {
                Segment::Key(k) => {
                    out.push('.');
                    out.push_str(k);
                }
                Segment::Index(i) => out.push_str(&format!("[{i}]")),
            }
        }
        out
    }
}

impl FromStr for DocPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.raw
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root() {
        let path = DocPath::parse("$").unwrap();
        assert!(path.is_root());
        assert_eq!(path, DocPath::root());
    }

    #[test]
    fn parse_nested_fields_and_indexes() {
        let path = DocPath::parse("$.metadata.roles_metadata[2].role_type").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("metadata".into()),
                Segment::Key("roles_metadata".into()),
                Segment::Index(2),
                Segment::Key("role_type".into()),
            ]
        );
    }

    #[test]
    fn parse_allows_hyphenated_keys() {
        let path = DocPath::parse("$.detail-type").unwrap();
        assert_eq!(path.segments(), &[Segment::Key("detail-type".into())]);
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for bad in ["detail", "$.", "$..a", "$.a[x]", "$.a[1", "$a"] {
            let err = DocPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, PathError::InvalidPath { .. }),
                "expected invalid path for {bad}, got: {err}"
            );
        }
    }

    #[test]
    fn starts_with_matches_ancestors_only() {
        let deep = DocPath::parse("$.metadata.roles_metadata").unwrap();
        assert!(deep.starts_with(&DocPath::parse("$.metadata").unwrap()));
        assert!(deep.starts_with(&DocPath::root()));
        assert!(!deep.starts_with(&DocPath::parse("$.meta").unwrap()));
        assert!(!DocPath::parse("$.metadata").unwrap().starts_with(&deep));
    }

    #[test]
    fn serde_round_trips_through_string() {
        let path: DocPath = serde_json::from_str("\"$.role.ad_group_config\"").unwrap();
        assert_eq!(path.as_str(), "$.role.ad_group_config");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"$.role.ad_group_config\"");
        assert!(serde_json::from_str::<DocPath>("\"role\"").is_err());
    }

    #[test]
    fn child_and_prefix_rendering() {
        let path = DocPath::parse("$.a[1]").unwrap().child("b");
        assert_eq!(path.as_str(), "$.a[1].b");
        assert_eq!(path.prefix_str(2), "$.a[1]");
    }
}
