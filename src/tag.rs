//! Field annotations.
//!
//! An annotation has the form `name[,modifier]*`. Serde field names (after
//! `#[serde(rename)]`) are the declared names; annotations registered on the
//! builder override them per field path and may carry modifiers.

use std::collections::HashMap;
use std::fmt;

const OMITEMPTY: &str = "omitempty";

/// Default annotation namespace.
pub const DEFAULT_STRUCT_TAG: &str = "layerfig";

/// A parsed field annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// External key segment. Empty means "keep the declared name".
    pub name: String,
    /// Skip writes of empty values to this field.
    pub omitempty: bool,
}

impl Tag {
    /// Parse `name[,modifier]*`. Unknown modifiers are ignored.
    pub fn parse(raw: &str) -> Tag {
        let mut parts = raw.split(',');
        let name = parts.next().unwrap_or_default().trim().to_string();
        let mut tag = Tag {
            name,
            omitempty: false,
        };
        for modifier in parts {
            if modifier.trim() == OMITEMPTY {
                tag.omitempty = true;
            }
        }
        tag
    }

    /// The segment to use for a field whose declared name is `declared`.
    pub fn name_or<'a>(&'a self, declared: &'a str) -> &'a str {
        if self.name.is_empty() {
            declared
        } else {
            &self.name
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name={}, omitempty={}", self.name, self.omitempty)
    }
}

/// Annotations grouped by namespace, keyed by declared field path.
#[derive(Debug, Clone, Default)]
pub(crate) struct TagSet {
    namespaces: HashMap<String, HashMap<String, Tag>>,
}

impl TagSet {
    pub fn insert(&mut self, namespace: &str, path: &str, raw: &str) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(path.to_string(), Tag::parse(raw));
    }

    pub fn get(&self, namespace: &str, path: &str) -> Option<&Tag> {
        self.namespaces.get(namespace)?.get(path)
    }
}
