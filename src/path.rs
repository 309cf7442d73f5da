//! Path segmentation and route pattern parsing.
//!
//! Both the route tree and the filter tree walk paths one `/`-separated
//! segment at a time. Empty segments are dropped, so `/a//b/` and `/a/b`
//! are the same path and `/` has no segments at all.
//!
//! Pattern grammar, one specifier per segment:
//!
//! | Segment | Meaning |
//! |---|---|
//! | `users` | literal, matched exactly (case-sensitive) |
//! | `:id` | parameter, matches any single segment and binds it to `id` |
//! | `*` | wildcard, matches one or more trailing segments; last segment only |

use std::collections::HashSet;
use std::fmt;

use crate::error::RouteError;

/// Splits a request path into its non-empty segments.
///
/// ```rust
/// assert_eq!(trellis::segments("/files//img/logo.png/"), ["files", "img", "logo.png"]);
/// assert!(trellis::segments("/").is_empty());
/// ```
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// One specifier of a compiled [`Pattern`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Param(name) => write!(f, ":{name}"),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

/// A validated route or filter pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses and validates `pattern`.
    ///
    /// Every grammar violation is reported here, at registration time, so a
    /// compiled tree never has to reject anything at request time.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::invalid(pattern, "pattern must start with `/`"));
        }

        let raw = segments(pattern);
        let mut parsed = Vec::with_capacity(raw.len());
        let mut param_names = HashSet::new();

        for (i, seg) in raw.iter().enumerate() {
            let last = i + 1 == raw.len();

            if *seg == "*" {
                if !last {
                    return Err(RouteError::invalid(pattern, "wildcard must be the last segment"));
                }
                parsed.push(Segment::Wildcard);
            } else if let Some(name) = seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(RouteError::invalid(pattern, "empty parameter name"));
                }
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(RouteError::invalid(
                        pattern,
                        format!("invalid parameter name `{name}`"),
                    ));
                }
                if !param_names.insert(name) {
                    return Err(RouteError::invalid(
                        pattern,
                        format!("duplicate parameter name `{name}`"),
                    ));
                }
                parsed.push(Segment::Param(name.to_owned()));
            } else {
                if let Some(bad) = seg.chars().find(|c| is_reserved(*c)) {
                    return Err(RouteError::invalid(
                        pattern,
                        format!("invalid character `{bad}` in segment `{seg}`"),
                    ));
                }
                parsed.push(Segment::Literal((*seg).to_owned()));
            }
        }

        Ok(Self { raw: pattern.to_owned(), segments: parsed })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_reserved(c: char) -> bool {
    matches!(c, '*' | ':' | '?' | '#') || c.is_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Segment {
        Segment::Literal(s.into())
    }

    #[test]
    fn segments_drop_empty_parts() {
        assert_eq!(segments("/a/b/c"), ["a", "b", "c"]);
        assert_eq!(segments("a/b"), ["a", "b"]);
        assert_eq!(segments("//a///b//"), ["a", "b"]);
        assert!(segments("").is_empty());
        assert!(segments("/").is_empty());
    }

    #[test]
    fn parses_all_segment_kinds() {
        let p = Pattern::parse("/users/:id/files/*").unwrap();
        assert_eq!(
            p.segments(),
            [lit("users"), Segment::Param("id".into()), lit("files"), Segment::Wildcard]
        );
        assert!(p.has_wildcard());
        assert_eq!(p.to_string(), "/users/:id/files/*");

        assert!(Pattern::parse("/").unwrap().segments().is_empty());
    }

    #[test]
    fn rejects_misplaced_wildcard() {
        let err = Pattern::parse("/a/*/b").unwrap_err();
        assert_eq!(err, RouteError::invalid("/a/*/b", "wildcard must be the last segment"));
        assert!(Pattern::parse("/a/*/*").is_err());
    }

    #[test]
    fn rejects_malformed_segments() {
        assert!(Pattern::parse("users").is_err());
        assert!(Pattern::parse("/users/:").is_err());
        assert!(Pattern::parse("/users/:user-id").is_err());
        assert!(Pattern::parse("/a/:id/b/:id").is_err());
        assert!(Pattern::parse("/files/*.png").is_err());
        assert!(Pattern::parse("/a:b").is_err());
        assert!(Pattern::parse("/search?q").is_err());
        assert!(Pattern::parse("/with space").is_err());
    }
}
