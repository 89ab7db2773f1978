//! Telemetry path parsing
//!
//! Telemetry keys address nested device state with dot and array-index
//! notation, e.g. `super.supervisor`, `cpos[0]` or `axes[1].limits`.

use crate::error::StateError;
use std::fmt;
use std::str::FromStr;

/// One step of a telemetry path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object member lookup
    Key(String),
    /// Array element lookup
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// A parsed, validated telemetry path
///
/// The first segment is always a key; it names the top-level telemetry
/// variable the path belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatePath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl StatePath {
    /// Parse a path from its textual form
    pub fn parse(text: &str) -> Result<Self, StateError> {
        if text.is_empty() {
            return Err(invalid(text, "path is empty"));
        }

        let mut segments = Vec::new();
        let mut rest = text;

        loop {
            let end = rest.find(&['.', '[', ']'][..]).unwrap_or(rest.len());
            let key = &rest[..end];
            if key.is_empty() {
                return Err(invalid(text, "empty key segment"));
            }
            segments.push(PathSegment::Key(key.to_string()));
            rest = &rest[end..];

            while let Some(after) = rest.strip_prefix('[') {
                let close = after
                    .find(']')
                    .ok_or_else(|| invalid(text, "unclosed '['"))?;
                let digits = &after[..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid(text, &format!("invalid index '{}'", digits)));
                }
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| invalid(text, &format!("invalid index '{}': {}", digits, e)))?;
                segments.push(PathSegment::Index(index));
                rest = &after[close + 1..];
            }

            if rest.is_empty() {
                break;
            }

            match rest.strip_prefix('.') {
                Some(after) => rest = after,
                None => return Err(invalid(text, "unexpected ']'")),
            }
        }

        Ok(Self {
            raw: text.to_string(),
            segments,
        })
    }

    /// The path as originally written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// All segments in order
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Name of the top-level telemetry variable this path belongs to
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => key,
            // parse() guarantees a leading key
            _ => "",
        }
    }

    /// Whether this path names a whole top-level variable
    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Render the first `depth` segments back into path text
    pub fn prefix(&self, depth: usize) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().take(depth).enumerate() {
            if i > 0 && matches!(segment, PathSegment::Key(_)) {
                out.push('.');
            }
            out.push_str(&segment.to_string());
        }
        out
    }
}

fn invalid(path: &str, reason: &str) -> StateError {
    StateError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl FromStr for StatePath {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for StatePath {
    type Error = StateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
