//! Filter intents and the slot state they live in.

use crate::filter::predicate::Predicate;
use crate::hierarchy::HierarchyPath;
use crate::types::{Field, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Filter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterSlot {
    Structural,
    Search,
    User,
}

/// Parent/ancestor scoping. Never ancestor-expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralFilter {
    /// Direct children of a node
    ChildrenOf(NodeId),
    /// All nodes below a hierarchy path
    DescendantsOf(HierarchyPath),
    /// Any other bounded view, e.g. a structure range
    Custom(Predicate),
}

impl StructuralFilter {
    pub fn to_predicate(&self) -> Predicate {
        match self {
            StructuralFilter::ChildrenOf(id) => Predicate::eq(Field::ParentId, id.clone()),
            StructuralFilter::DescendantsOf(path) => Predicate::DescendantOf { path: path.clone() },
            StructuralFilter::Custom(predicate) => predicate.clone(),
        }
    }
}

/// Free-text search across a set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub text: String,
    /// Fields to search; empty means the configured defaults
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl SearchFilter {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    /// OR of substring matches over the effective fields.
    pub fn to_predicate(&self, default_fields: &[Field]) -> Predicate {
        let fields = if self.fields.is_empty() {
            default_fields
        } else {
            &self.fields
        };
        let text = self.text.trim();
        Predicate::or(
            fields
                .iter()
                .map(|field| Predicate::contains(field.clone(), text))
                .collect(),
        )
    }
}

/// Condition of a user-configured attribute filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UserCondition {
    Equals(Value),
    NotEquals(Value),
    OneOf(Vec<Value>),
    Contains(String),
    AtLeast(Value),
    AtMost(Value),
    IsSet,
}

/// Attribute-value filter configured by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFilter {
    pub field: Field,
    pub condition: UserCondition,
}

impl UserFilter {
    pub fn new(field: Field, condition: UserCondition) -> Self {
        Self { field, condition }
    }

    /// Parse `field=value`, `field!=value`, `field>=value`, `field<=value`,
    /// `field~text` or a bare `field` (is set). Values are read as JSON when
    /// possible, otherwise as strings.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let operators: [(&str, fn(Value) -> UserCondition); 4] = [
            ("!=", UserCondition::NotEquals),
            (">=", UserCondition::AtLeast),
            ("<=", UserCondition::AtMost),
            ("=", UserCondition::Equals),
        ];
        for (op, build) in operators {
            if let Some((field, value)) = raw.split_once(op) {
                let field = field.trim();
                if field.is_empty() {
                    return None;
                }
                return Some(Self::new(Field::parse(field), build(parse_value(value.trim()))));
            }
        }
        if let Some((field, text)) = raw.split_once('~') {
            return Some(Self::new(
                Field::parse(field),
                UserCondition::Contains(text.trim().to_string()),
            ));
        }
        Some(Self::new(Field::parse(raw), UserCondition::IsSet))
    }

    pub fn to_predicate(&self) -> Predicate {
        let field = self.field.clone();
        match &self.condition {
            UserCondition::Equals(value) => Predicate::eq(field, value.clone()),
            UserCondition::NotEquals(value) => Predicate::Ne {
                field,
                value: value.clone(),
            },
            UserCondition::OneOf(values) => Predicate::one_of(field, values.clone()),
            UserCondition::Contains(text) => Predicate::contains(field, text.clone()),
            UserCondition::AtLeast(value) => Predicate::at_least(field, value.clone()),
            UserCondition::AtMost(value) => Predicate::at_most(field, value.clone()),
            UserCondition::IsSet => Predicate::IsSet { field },
        }
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// The three independently settable slots.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    pub(crate) structural: BTreeMap<String, StructuralFilter>,
    pub(crate) search: Option<SearchFilter>,
    pub(crate) user: BTreeMap<String, UserFilter>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn structural(&self) -> impl Iterator<Item = (&String, &StructuralFilter)> {
        self.structural.iter()
    }

    pub fn search(&self) -> Option<&SearchFilter> {
        self.search.as_ref()
    }

    pub fn user(&self) -> impl Iterator<Item = (&String, &UserFilter)> {
        self.user.iter()
    }

    pub fn is_active(&self, slot: FilterSlot) -> bool {
        match slot {
            FilterSlot::Structural => !self.structural.is_empty(),
            FilterSlot::Search => self.search.is_some(),
            FilterSlot::User => !self.user.is_empty(),
        }
    }

    pub fn structural_predicate(&self) -> Predicate {
        Predicate::and(self.structural.values().map(|f| f.to_predicate()).collect())
    }

    pub fn user_predicate(&self) -> Predicate {
        Predicate::and(self.user.values().map(|f| f.to_predicate()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    #[test]
    fn test_user_filter_parse() {
        let f = UserFilter::parse("status=open").unwrap();
        assert_eq!(f.field, Field::Attribute("status".to_string()));
        assert_eq!(f.condition, UserCondition::Equals(Value::from("open")));

        let f = UserFilter::parse("priority>=2").unwrap();
        assert_eq!(f.condition, UserCondition::AtLeast(Value::from(2)));

        let f = UserFilter::parse("owner!=\"bob\"").unwrap();
        assert_eq!(f.condition, UserCondition::NotEquals(Value::from("bob")));

        let f = UserFilter::parse("name~pump").unwrap();
        assert_eq!(f.condition, UserCondition::Contains("pump".to_string()));

        let f = UserFilter::parse("depth<=3").unwrap();
        assert_eq!(f.field, Field::Depth);

        assert_eq!(UserFilter::parse("tag").unwrap().condition, UserCondition::IsSet);
        assert!(UserFilter::parse("").is_none());
        assert!(UserFilter::parse("=x").is_none());
    }

    #[test]
    fn test_search_predicate_uses_default_fields() {
        let search = SearchFilter::new("  pump ");
        let defaults = vec![Field::Attribute("name".to_string())];
        let record = Record::new("a").with_attribute("name", "Main Pump");
        assert!(search.to_predicate(&defaults).matches(&record));

        let scoped = SearchFilter::new("pump").with_fields(vec![Field::Attribute("code".to_string())]);
        assert!(!scoped.to_predicate(&defaults).matches(&record));
    }

    #[test]
    fn test_structural_predicates() {
        let child = Record::new("c").with_parent("p").with_path("2.1.");
        assert!(StructuralFilter::ChildrenOf("p".to_string())
            .to_predicate()
            .matches(&child));
        let below = StructuralFilter::DescendantsOf(HierarchyPath::parse("2.").unwrap());
        assert!(below.to_predicate().matches(&child));
    }

    #[test]
    fn test_slot_activity() {
        let mut state = FilterState::new();
        assert!(!state.is_active(FilterSlot::User));
        state.user.insert(
            "status".to_string(),
            UserFilter::new(Field::Attribute("status".to_string()), UserCondition::IsSet),
        );
        assert!(state.is_active(FilterSlot::User));
        assert_eq!(state.structural_predicate(), Predicate::All);
    }
}
