//! Core types shared by the hierarchy, loader and filter layers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::hierarchy::{HierarchyPath, PathPosition};

/// NodeId: stable identifier assigned by the data source
pub type NodeId = String;

/// A record as returned by the data source.
///
/// The well-known hierarchy fields are typed; everything else the source
/// returns lives in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    /// Raw hierarchy path as delivered (e.g. `"1.3."`), unparsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_position: Option<u64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            path: None,
            depth: None,
            sort_position: None,
            attributes: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_sort_position(mut self, sort_position: u64) -> Self {
        self.sort_position = Some(sort_position);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Parsed hierarchy position; missing or malformed paths are `Unknown`.
    pub fn position(&self) -> PathPosition {
        PathPosition::from_raw(self.path.as_deref())
    }

    /// Parsed hierarchy path, if the record carries a well-formed one.
    pub fn hierarchy_path(&self) -> Option<HierarchyPath> {
        self.position().into_known()
    }

    /// Value of a field as JSON, `None` when absent.
    pub fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::Id => Some(Value::String(self.id.clone())),
            Field::ParentId => self.parent_id.clone().map(Value::String),
            Field::Path => self.path.clone().map(Value::String),
            Field::Depth => self.depth.map(Value::from),
            Field::SortPosition => self.sort_position.map(Value::from),
            Field::Attribute(name) => match self.attributes.get(name) {
                Some(Value::Null) | None => None,
                Some(value) => Some(value.clone()),
            },
        }
    }

    /// Display label used by the CLI; falls back to the id.
    pub fn label(&self) -> String {
        match self.attributes.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => self.id.clone(),
        }
    }
}

/// Addressable record field used by predicates and sort specifications.
///
/// Serialized as its name: reserved names for the typed fields, anything else
/// is an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Id,
    ParentId,
    Path,
    Depth,
    SortPosition,
    Attribute(String),
}

impl Field {
    /// Parse a field name as used in config files and on the command line.
    ///
    /// Reserved names map to the typed fields; anything else is an attribute.
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "id" => Field::Id,
            "parent_id" | "parentId" => Field::ParentId,
            "path" | "hierarchy_id" | "hierarchyId" => Field::Path,
            "depth" | "level" => Field::Depth,
            "sort_position" | "sortPosition" | "sort_order" => Field::SortPosition,
            other => Field::Attribute(other.to_string()),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Id => write!(f, "id"),
            Field::ParentId => write!(f, "parent_id"),
            Field::Path => write!(f, "path"),
            Field::Depth => write!(f, "depth"),
            Field::SortPosition => write!(f, "sort_position"),
            Field::Attribute(name) => write!(f, "{}", name),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.trim().is_empty() {
            return Err(serde::de::Error::custom("empty field name"));
        }
        Ok(Field::parse(&name))
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort order the data source must return records in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: Field,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(field: Field) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::ascending(Field::Path)
    }
}
