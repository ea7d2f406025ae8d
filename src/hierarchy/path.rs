//! Hierarchy path algebra.
//!
//! A hierarchy path is the 1-based sibling index at each depth from the root
//! down to a node, serialized as dot-separated segments with a trailing
//! separator: the third child of the first root is `"1.3."`.
//!
//! All functions are pure. Malformed input (empty string, non-numeric or zero
//! segment) means "position unknown": the node can still be shown, but it takes
//! no part in ancestor/descendant computations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Segment separator
pub const SEPARATOR: char = '.';

/// Parsed hierarchy path. Always holds at least one segment, every segment >= 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchyPath {
    segments: Vec<u32>,
}

/// Reason a raw path could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathParseError {
    Empty,
    InvalidSegment(String),
}

impl fmt::Display for PathParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathParseError::Empty => write!(f, "empty hierarchy path"),
            PathParseError::InvalidSegment(segment) => {
                write!(f, "invalid hierarchy path segment '{}'", segment)
            }
        }
    }
}

impl std::error::Error for PathParseError {}

impl HierarchyPath {
    /// Build a path from segments. Returns `None` for an empty list or a zero segment.
    pub fn from_segments(segments: Vec<u32>) -> Option<Self> {
        if segments.is_empty() || segments.contains(&0) {
            return None;
        }
        Some(Self { segments })
    }

    /// Root-level path at the given 1-based position.
    pub fn root(position: u32) -> Option<Self> {
        Self::from_segments(vec![position])
    }

    pub fn parse(raw: &str) -> Result<Self, PathParseError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
        if body.is_empty() {
            return Err(PathParseError::Empty);
        }

        let mut segments = Vec::new();
        for segment in body.split(SEPARATOR) {
            match segment.parse::<u32>() {
                Ok(value) if value > 0 && !segment.starts_with('+') => segments.push(value),
                _ => return Err(PathParseError::InvalidSegment(segment.to_string())),
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[u32] {
        &self.segments
    }

    /// Depth of the node: 0 for a root.
    pub fn depth(&self) -> usize {
        self.segments.len() - 1
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// True iff `ancestor` is a proper prefix of `self`.
    pub fn is_descendant_of(&self, ancestor: &HierarchyPath) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments.starts_with(&ancestor.segments)
    }

    pub fn parent(&self) -> Option<HierarchyPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// All proper prefixes, root first.
    pub fn ancestors(&self) -> Vec<HierarchyPath> {
        (1..self.segments.len())
            .map(|len| Self {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }

    /// 1-based position among siblings (the last segment).
    pub fn sibling_position(&self) -> u32 {
        // segments is never empty
        self.segments[self.segments.len() - 1]
    }

    /// Path of this node's child at the given 1-based position.
    pub fn child(&self, position: u32) -> Option<HierarchyPath> {
        if position == 0 {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.push(position);
        Some(Self { segments })
    }

    /// Same parent, different sibling position. Used when a node is moved
    /// locally before the source re-assigns paths.
    pub fn with_sibling_position(&self, position: u32) -> Option<HierarchyPath> {
        if position == 0 {
            return None;
        }
        let mut segments = self.segments.clone();
        let last = segments.len() - 1;
        segments[last] = position;
        Some(Self { segments })
    }

    /// Replace the `old` prefix of this path with `new`. `None` if `old` is not
    /// a prefix (or equal).
    pub fn rebase(&self, old: &HierarchyPath, new: &HierarchyPath) -> Option<HierarchyPath> {
        if self == old {
            return Some(new.clone());
        }
        if !self.is_descendant_of(old) {
            return None;
        }
        let mut segments = new.segments.clone();
        segments.extend_from_slice(&self.segments[old.segments.len()..]);
        Some(Self { segments })
    }
}

impl Ord for HierarchyPath {
    /// Segment-wise numeric order; a prefix sorts before its descendants.
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for HierarchyPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{}{}", segment, SEPARATOR)?;
        }
        Ok(())
    }
}

impl FromStr for HierarchyPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for HierarchyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HierarchyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HierarchyPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Hierarchy position of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPosition {
    Known(HierarchyPath),
    /// Missing or malformed path: displayed, but excluded from ancestry logic
    Unknown,
}

impl PathPosition {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(HierarchyPath::parse) {
            Some(Ok(path)) => PathPosition::Known(path),
            _ => PathPosition::Unknown,
        }
    }

    pub fn as_known(&self) -> Option<&HierarchyPath> {
        match self {
            PathPosition::Known(path) => Some(path),
            PathPosition::Unknown => None,
        }
    }

    pub fn into_known(self) -> Option<HierarchyPath> {
        match self {
            PathPosition::Known(path) => Some(path),
            PathPosition::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, PathPosition::Known(_))
    }
}

// String-level operations over raw paths as delivered by the data source.

/// True iff `path` has `ancestor` as a proper prefix. False when either is malformed.
pub fn is_descendant_of(path: &str, ancestor: &str) -> bool {
    match (HierarchyPath::parse(path), HierarchyPath::parse(ancestor)) {
        (Ok(path), Ok(ancestor)) => path.is_descendant_of(&ancestor),
        _ => false,
    }
}

/// Parent path, `None` for a root or a malformed path.
pub fn parent_of(path: &str) -> Option<String> {
    HierarchyPath::parse(path)
        .ok()
        .and_then(|p| p.parent())
        .map(|p| p.to_string())
}

/// Proper prefixes of `path`, root first. Empty for a root or a malformed path.
pub fn ancestor_chain(path: &str) -> Vec<String> {
    HierarchyPath::parse(path)
        .map(|p| p.ancestors().iter().map(ToString::to_string).collect())
        .unwrap_or_default()
}

/// Last segment of `path`, `None` when malformed.
pub fn sibling_position(path: &str) -> Option<u32> {
    HierarchyPath::parse(path).ok().map(|p| p.sibling_position())
}

/// Numeric segment-wise comparison. Malformed paths sort after well-formed
/// ones and compare equal among themselves.
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    match (HierarchyPath::parse(a), HierarchyPath::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}
