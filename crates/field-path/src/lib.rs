//! Parsed field paths for reading nested values out of loosely-typed events.
//!
//! Events are JSON objects whose values may themselves be objects or arrays.
//! A [`FieldPath`] is parsed once from its textual form and then applied to
//! any number of events, returning the value it points at or `None` when any
//! step along the way is missing.
//!
//! ## Syntax
//!
//! Three spellings are accepted:
//!
//! - bracket form, one segment per bracket: `[client][ip]`
//! - dotted form: `client.ip`
//! - a plain top-level key: `ip`
//!
//! A segment applied to an array is read as a zero-based index, so both
//! `[hosts][0][addr]` and `hosts.0.addr` reach into the first element.
//!
//! ```
//! use field_path::FieldPath;
//! use serde_json::json;
//!
//! let path: FieldPath = "[client][ip]".parse().unwrap();
//! let event = json!({"client": {"ip": "8.8.8.8"}});
//!
//! assert_eq!(path.get_str(&event), Some("8.8.8.8"));
//! assert_eq!("client.port".parse::<FieldPath>().unwrap().get(&event), None);
//! ```

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

/// Error returned when a field path string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The path string was empty.
    #[error("field path is empty")]
    Empty,

    /// A segment had no characters, as in `a..b` or `[]`.
    #[error("empty segment at byte {position}")]
    EmptySegment { position: usize },

    /// A `[` without its matching `]`.
    #[error("unclosed '[' at byte {position}")]
    Unclosed { position: usize },

    /// Bracket form followed by something other than another `[`.
    #[error("expected '[' at byte {position}, found {found:?}")]
    UnexpectedChar { position: usize, found: char },
}

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    key: String,
    index: Option<usize>,
}

impl Segment {
    fn new(key: &str) -> Segment {
        Segment {
            key: key.to_string(),
            index: key.parse().ok(),
        }
    }

    /// The segment as an object key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The segment as an array index, if it is a non-negative integer.
    #[inline]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    #[inline]
    fn step<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match value {
            Value::Object(map) => map.get(&self.key),
            Value::Array(items) => items.get(self.index?),
            _ => None,
        }
    }
}

/// A parsed path to a (possibly nested) field of an event.
///
/// A `FieldPath` always has at least one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a path from bracket, dotted or plain-key form.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for empty paths, empty segments, and
    /// unbalanced bracket syntax.
    pub fn parse(path: &str) -> Result<FieldPath, ParseError> {
        if path.is_empty() {
            return Err(ParseError::Empty);
        }

        let segments = if path.starts_with('[') {
            parse_brackets(path)?
        } else {
            parse_dotted(path)?
        };

        Ok(FieldPath { segments })
    }

    /// The parsed segments, outermost first.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve the path against any JSON value.
    ///
    /// Returns `None` as soon as a key is missing, an index is out of range,
    /// or a scalar is reached before the last segment.
    #[inline]
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| segment.step(current))
    }

    /// Resolve the path against an event object.
    #[inline]
    pub fn get_in<'a>(&self, event: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let start = event.get(first.key())?;
        rest.iter()
            .try_fold(start, |current, segment| segment.step(current))
    }

    /// Resolve the path and return the value only if it is a string.
    #[inline]
    pub fn get_str<'a>(&self, value: &'a Value) -> Option<&'a str> {
        self.get(value).and_then(Value::as_str)
    }
}

impl FromStr for FieldPath {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

/// Renders the canonical bracket form, e.g. `[client][ip]`.
impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "[{}]", segment.key)?;
        }
        Ok(())
    }
}

fn parse_brackets(path: &str) -> Result<Vec<Segment>, ParseError> {
    let mut segments = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        let position = path.len() - rest.len();
        let Some(inner) = rest.strip_prefix('[') else {
            // rest is non-empty here
            let found = rest.chars().next().unwrap_or_default();
            return Err(ParseError::UnexpectedChar { position, found });
        };
        let close = inner.find(']').ok_or(ParseError::Unclosed { position })?;
        let key = &inner[..close];
        if key.is_empty() {
            return Err(ParseError::EmptySegment { position });
        }
        segments.push(Segment::new(key));
        rest = &inner[close + 1..];
    }

    Ok(segments)
}

fn parse_dotted(path: &str) -> Result<Vec<Segment>, ParseError> {
    let mut segments = Vec::new();
    let mut position = 0;

    for key in path.split('.') {
        if key.is_empty() {
            return Err(ParseError::EmptySegment { position });
        }
        segments.push(Segment::new(key));
        position += key.len() + 1;
    }

    Ok(segments)
}
