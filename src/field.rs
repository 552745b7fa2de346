//! Writable handles for canonical keys.

use std::collections::HashMap;

use crate::coerce;
use crate::error::{LayerfigError, Result};
use crate::node::{NestError, Node};
use crate::value::{Kind, Value};

/// A writable handle for one canonical key: either a field of the
/// destination or an entry below one of its dynamic maps.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Field {
    pub key: String,
    /// Path of the slot in the snapshot tree.
    pub path: Vec<String>,
    /// Declared kind of the slot. `Kind::Null` when it could not be observed.
    pub kind: Kind,
    /// Observed kind of sequence/map elements.
    pub element: Option<Kind>,
    pub omitempty: bool,
    /// Below a slot that was `None` when observed, so whether it is a
    /// container at all is only known once the draft is checked.
    pub provisional: bool,
}

impl Field {
    pub fn direct(key: String, path: Vec<String>, node: &Node, omitempty: bool) -> Field {
        Field {
            key,
            path,
            kind: node.kind(),
            element: node.element_kind(),
            omitempty,
            provisional: false,
        }
    }

    /// A handle for `key`, found `residual` segments below this container.
    /// Its kind is inferred from the current snapshot.
    pub fn entry(&self, key: String, residual: Vec<String>, doc: &Node) -> Field {
        let shape = doc
            .get(&self.path)
            .and_then(|container| container.shape_at(&residual));
        let mut path = self.path.clone();
        path.extend(residual);
        Field {
            key,
            path,
            kind: shape.map_or(Kind::Null, Node::kind),
            element: shape.and_then(Node::element_kind),
            omitempty: self.omitempty,
            provisional: self.provisional || self.kind == Kind::Null,
        }
    }

    /// Whether new keys can be created under this field: a dynamic map, or
    /// an unobserved slot that becomes one on first write.
    pub fn is_container(&self) -> bool {
        matches!(self.kind, Kind::Map | Kind::Null)
    }

    /// Whether values written here are only converted to their real type
    /// at commit.
    pub fn is_lazy(&self) -> bool {
        match self.kind {
            Kind::Null | Kind::Custom => true,
            Kind::Seq | Kind::Map => self.element.is_none_or(|k| !k.is_scalar()),
            _ => false,
        }
    }

    /// Whether a commit error names this field's slot or a slot below it.
    pub fn owns(&self, err: &LayerfigError) -> bool {
        let (LayerfigError::Assign { key, .. } | LayerfigError::InvalidConversion { key, .. }) =
            err
        else {
            return false;
        };
        below(key, &self.path.join(".")).is_some()
    }

    /// Coerce `value` to this field's kind and store it in `doc`.
    pub fn write(&self, doc: &mut Node, value: Value) -> Result<()> {
        let node = coerce::coerce(&self.key, value, self.kind, self.element)?;
        doc.insert_nested(&self.path, node)
            .map_err(|e| self.nest_error(e))
    }

    fn nest_error(&self, err: NestError) -> LayerfigError {
        match err {
            NestError::KeyType => LayerfigError::InvalidKeyType {
                key: self.key.clone(),
            },
            NestError::NotContainer(found) => LayerfigError::InvalidConversion {
                key: self.key.clone(),
                from: Kind::Map,
                to: found,
            },
            NestError::EmptyPath => LayerfigError::InvalidDestination {
                found: format!("empty path for '{}'", self.key),
            },
        }
    }
}

/// The part of `key` below `path`, if `key` is `path` or lies under it.
fn below<'a>(key: &'a str, path: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(path)?;
    (rest.is_empty() || rest.starts_with(['.', '['])).then_some(rest)
}

/// The flat map of canonical keys to handles.
#[derive(Debug, Clone, Default)]
pub(crate) struct Fields {
    by_key: HashMap<String, Field>,
}

impl Fields {
    pub fn insert(&mut self, field: Field) {
        self.by_key.insert(field.key.clone(), field);
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.by_key.get(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.by_key.remove(key);
    }

    /// Rewrite a declared slot path such as `servers.a.port` or `tags[1]`
    /// into canonical form, through the deepest field that contains it.
    pub fn canonical(&self, declared: &str, delimiter: &str) -> Option<String> {
        let (field, rest) = self
            .by_key
            .values()
            .filter_map(|field| Some((field, below(declared, &field.path.join("."))?)))
            .max_by_key(|(field, _)| field.path.len())?;
        Some(format!("{}{}", field.key, rest.replace('.', delimiter)))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Canonical keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(String::from).collect()
    }

    fn doc() -> Node {
        Node::Record(vec![
            ("port".into(), Node::Leaf(Value::U16(80))),
            (
                "limits".into(),
                Node::Map {
                    entries: BTreeMap::from([("cpu".into(), Node::Leaf(Value::U8(1)))]),
                    textual: true,
                },
            ),
            (
                "codes".into(),
                Node::Map {
                    entries: BTreeMap::from([("1".into(), Node::Leaf(Value::from("a")))]),
                    textual: false,
                },
            ),
        ])
    }

    fn direct(doc: &Node, key: &str) -> Field {
        let p = path(key);
        Field::direct(key.into(), p.clone(), doc.get(&p).unwrap(), false)
    }

    #[test]
    fn direct_write_coerces_to_declared_kind() {
        let mut doc = doc();
        direct(&doc, "port")
            .write(&mut doc, Value::from("8080"))
            .unwrap();
        assert_eq!(doc.get(&path("port")), Some(&Node::Leaf(Value::U16(8080))));
    }

    #[test]
    fn map_entry_infers_sibling_kind() {
        let mut doc = doc();
        let limits = direct(&doc, "limits");
        assert!(limits.is_container());
        let mem = limits.entry("limits.mem".into(), path("mem"), &doc);
        assert_eq!(mem.kind, Kind::U8);
        assert_eq!(mem.path, path("limits.mem"));
        mem.write(&mut doc, Value::from(4i64)).unwrap();
        assert_eq!(
            doc.get(&path("limits.mem")),
            Some(&Node::Leaf(Value::U8(4)))
        );

        let err = mem.write(&mut doc, Value::from(300i64)).unwrap_err();
        match err {
            LayerfigError::Assign { key, .. } => assert_eq!(key, "limits.mem"),
            other => panic!("Expected Assign, got: {other:?}"),
        }
    }

    #[test]
    fn map_entry_below_scalar_entry_is_rejected() {
        let mut doc = doc();
        let limits = direct(&doc, "limits");
        let deep = limits.entry("limits.cpu.max".into(), path("cpu.max"), &doc);
        let err = deep.write(&mut doc, Value::from(1u8)).unwrap_err();
        match err {
            LayerfigError::InvalidConversion { key, .. } => assert_eq!(key, "limits.cpu.max"),
            other => panic!("Expected InvalidConversion, got: {other:?}"),
        }
    }

    #[test]
    fn non_textual_map_rejects_entries() {
        let mut doc = doc();
        let codes = direct(&doc, "codes");
        let entry = codes.entry("codes.2".into(), path("2"), &doc);
        let err = entry.write(&mut doc, Value::from("b")).unwrap_err();
        assert!(matches!(err, LayerfigError::InvalidKeyType { .. }));
    }

    #[test]
    fn unset_slots_become_provisional_containers() {
        let doc = Node::Record(vec![("labels".into(), Node::Leaf(Value::Null))]);
        let labels = direct(&doc, "labels");
        assert!(labels.is_container());
        assert!(labels.is_lazy());
        let team = labels.entry("labels.team".into(), path("team"), &doc);
        assert!(team.provisional);
        assert_eq!(team.kind, Kind::Null);
        assert!(!direct(&self::doc(), "port").is_lazy());
    }

    #[test]
    fn owns_errors_at_or_below_its_slot() {
        let doc = doc();
        let limits = direct(&doc, "limits");
        let assign = |key: &str| LayerfigError::Assign {
            key: key.into(),
            value: "x".into(),
            reason: "bad".into(),
        };
        assert!(limits.owns(&assign("limits")));
        assert!(limits.owns(&assign("limits.cpu")));
        assert!(limits.owns(&assign("limits[0]")));
        assert!(!limits.owns(&assign("limitsx")));
        assert!(!limits.owns(&LayerfigError::InvalidKeyType { key: "limits".into() }));
    }

    #[test]
    fn declared_paths_map_to_canonical_keys() {
        let doc = doc();
        let mut fields = Fields::default();
        let mut limits = direct(&doc, "limits");
        limits.key = "LIMITS".into();
        fields.insert(limits.clone());
        fields.insert(limits.entry("LIMITS__cpu".into(), path("cpu"), &doc));
        assert_eq!(fields.canonical("limits.cpu", "__").as_deref(), Some("LIMITS__cpu"));
        assert_eq!(fields.canonical("limits.mem.x", "__").as_deref(), Some("LIMITS__mem__x"));
        assert_eq!(fields.canonical("port", "__"), None);

        fields.remove("LIMITS__cpu");
        assert_eq!(fields.canonical("limits.cpu", "__").as_deref(), Some("LIMITS__cpu"));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn fields_keys_are_sorted() {
        let doc = doc();
        let mut fields = Fields::default();
        fields.insert(direct(&doc, "port"));
        fields.insert(direct(&doc, "limits"));
        assert_eq!(fields.keys(), vec!["limits", "port"]);
        assert_eq!(fields.len(), 2);
    }
}
