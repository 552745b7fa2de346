//! The slot tree: a snapshot of the destination that writes are applied to
//! before it is committed back.

use std::collections::BTreeMap;

use crate::value::{Kind, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    /// A scalar slot, or `Null` for `None`/unit slots.
    Leaf(Value),
    /// A slot whose type unmarshals itself.
    Custom(Value),
    Seq(Vec<Node>),
    /// A dynamically keyed container. `textual` is false once a non-string
    /// key has been observed.
    Map {
        entries: BTreeMap<String, Node>,
        textual: bool,
    },
    /// A nested struct, fields in declaration order.
    Record(Vec<(String, Node)>),
}

/// Why a map write could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NestError {
    KeyType,
    NotContainer(Kind),
    EmptyPath,
}

impl Node {
    pub fn empty_map() -> Node {
        Node::Map {
            entries: BTreeMap::new(),
            textual: true,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Node::Leaf(v) => v.kind(),
            Node::Custom(_) => Kind::Custom,
            Node::Seq(_) => Kind::Seq,
            Node::Map { .. } => Kind::Map,
            Node::Record(_) => Kind::Record,
        }
    }

    /// Observed kind of the elements of a sequence or map, if any element exists.
    pub fn element_kind(&self) -> Option<Kind> {
        let first = match self {
            Node::Seq(items) => items.first(),
            Node::Map { entries, .. } => entries.values().next(),
            _ => None,
        }?;
        observed(first.kind())
    }

    /// The slot at `segments` below this node, or the closest stand-in for
    /// it: missing map entries take the shape of their siblings.
    pub fn shape_at(&self, segments: &[String]) -> Option<&Node> {
        let Some((head, tail)) = segments.split_first() else {
            return Some(self);
        };
        match self {
            Node::Map { entries, .. } => entries
                .get(head)
                .or_else(|| entries.values().next())?
                .shape_at(tail),
            Node::Record(fields) => field(fields, head)?.shape_at(tail),
            _ => None,
        }
    }

    pub fn get(&self, path: &[String]) -> Option<&Node> {
        let Some((head, tail)) = path.split_first() else {
            return Some(self);
        };
        match self {
            Node::Record(fields) => field(fields, head)?.get(tail),
            Node::Map { entries, .. } => entries.get(head)?.get(tail),
            _ => None,
        }
    }

    /// Insert `node` at `segments` below this container, creating nested
    /// containers on the way. A `Null` slot is initialised as an empty map.
    pub fn insert_nested(&mut self, segments: &[String], node: Node) -> Result<(), NestError> {
        let Some((head, tail)) = segments.split_first() else {
            return Err(NestError::EmptyPath);
        };

        if matches!(self, Node::Leaf(Value::Null)) {
            *self = Node::empty_map();
        }

        match self {
            Node::Map { entries, textual } => {
                if !*textual {
                    return Err(NestError::KeyType);
                }
                if tail.is_empty() {
                    entries.insert(head.clone(), node);
                    return Ok(());
                }
                entries
                    .entry(head.clone())
                    .or_insert_with(Node::empty_map)
                    .insert_nested(tail, node)
            }
            Node::Record(fields) => {
                let i = match fields.iter().position(|(name, _)| name == head) {
                    Some(i) => i,
                    None => {
                        fields.push((head.clone(), Node::Leaf(Value::Null)));
                        fields.len() - 1
                    }
                };
                let slot = &mut fields[i].1;
                if tail.is_empty() {
                    *slot = node;
                    Ok(())
                } else {
                    slot.insert_nested(tail, node)
                }
            }
            other => Err(NestError::NotContainer(other.kind())),
        }
    }

    /// Plain value view of the subtree. Records become maps.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Leaf(v) | Node::Custom(v) => v.clone(),
            Node::Seq(items) => Value::Seq(items.iter().map(Node::to_value).collect()),
            Node::Map { entries, .. } => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Node::Record(fields) => Value::Map(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Seq(items) => Node::Seq(items.into_iter().map(Node::from).collect()),
            Value::Map(entries) => Node::Map {
                entries: entries
                    .into_iter()
                    .map(|(k, v)| (k, Node::from(v)))
                    .collect(),
                textual: true,
            },
            other => Node::Leaf(other),
        }
    }
}

fn field<'a>(fields: &'a [(String, Node)], name: &str) -> Option<&'a Node> {
    fields.iter().find(|(n, _)| n == name).map(|(_, node)| node)
}

fn observed(kind: Kind) -> Option<Kind> {
    (kind != Kind::Null).then_some(kind)
}
