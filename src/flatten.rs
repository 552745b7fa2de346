//! Snapshotting the destination.
//!
//! A custom serde Serializer turns any `Serialize` destination into a
//! [`Node`] tree that keeps scalar widths, container shapes and
//! self-converting slots. [`flatten`] then walks the tree's records and
//! produces one writable handle per leaf field, keyed by its canonical key.

use std::collections::BTreeMap;

use serde::ser::{self, Serialize};
use tracing::debug;

use crate::builder::Options;
use crate::field::{Field, Fields};
use crate::node::Node;
use crate::unmarshal;
use crate::value::Value;

/// Serialize `source` into a slot tree.
pub(crate) fn snapshot<S: Serialize + ?Sized>(source: &S) -> Result<Node, SnapshotError> {
    source.serialize(NodeSerializer)
}

/// Build the flat key map for a snapshot. Only records are descended into;
/// every other slot becomes a field.
pub(crate) fn flatten(root: &Node, options: &Options) -> Fields {
    let mut fields = Fields::default();
    if let Node::Record(children) = root {
        let mut walk = Walk {
            options,
            declared: Vec::new(),
            external: Vec::new(),
            fields: &mut fields,
        };
        walk.record(children);
    }
    fields
}

struct Walk<'a> {
    options: &'a Options,
    declared: Vec<String>,
    external: Vec<String>,
    fields: &'a mut Fields,
}

impl Walk<'_> {
    fn record(&mut self, children: &[(String, Node)]) {
        for (name, node) in children {
            self.declared.push(name.clone());
            let tag = self
                .options
                .tags
                .get(&self.options.struct_tag, &self.declared.join("."));
            let segment = tag.map_or(name.as_str(), |t| t.name_or(name));
            self.external.push(segment.to_string());

            match node {
                Node::Record(grandchildren) => self.record(grandchildren),
                other => {
                    let delimiter = &self.options.delimiter;
                    let key = self
                        .options
                        .formatter
                        .format(&self.external.join(delimiter), delimiter);
                    let omitempty = tag.is_some_and(|t| t.omitempty);
                    if self.options.debug {
                        debug!(
                            key = %key,
                            kind = %other.kind(),
                            path = %self.declared.join("."),
                            omitempty,
                            "Flattened field"
                        );
                    }
                    self.fields.insert(Field::direct(
                        key,
                        self.declared.clone(),
                        other,
                        omitempty,
                    ));
                }
            }

            self.declared.pop();
            self.external.pop();
        }
    }
}

#[derive(Debug)]
pub(crate) struct SnapshotError(String);

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot error: {}", self.0)
    }
}

impl std::error::Error for SnapshotError {}

impl ser::Error for SnapshotError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        SnapshotError(msg.to_string())
    }
}

struct NodeSerializer;

impl ser::Serializer for NodeSerializer {
    type Ok = Node;
    type Error = SnapshotError;
    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = VariantSerializer<SeqSerializer>;
    type SerializeMap = MapSerializer;
    type SerializeStruct = RecordSerializer;
    type SerializeStructVariant = VariantSerializer<RecordSerializer>;

    fn serialize_bool(self, v: bool) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::Bool(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::I8(v)))
    }

    fn serialize_i16(self, v: i16) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::I16(v)))
    }

    fn serialize_i32(self, v: i32) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::I32(v)))
    }

    fn serialize_i64(self, v: i64) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::I64(v)))
    }

    fn serialize_u8(self, v: u8) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::U8(v)))
    }

    fn serialize_u16(self, v: u16) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::U16(v)))
    }

    fn serialize_u32(self, v: u32) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::U32(v)))
    }

    fn serialize_u64(self, v: u64) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::U64(v)))
    }

    fn serialize_f32(self, v: f32) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::F32(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::F64(v)))
    }

    fn serialize_char(self, v: char) -> Result<Node, Self::Error> {
        self.serialize_str(&v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::String(v.to_string())))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Node, Self::Error> {
        Ok(Node::Seq(
            v.iter().map(|b| Node::Leaf(Value::U8(*b))).collect(),
        ))
    }

    fn serialize_none(self) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::Null))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Node, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::Null))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Node, Self::Error> {
        Ok(Node::Leaf(Value::Null))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Node, Self::Error> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Node, Self::Error> {
        let node = value.serialize(self)?;
        if name == unmarshal::TOKEN {
            return Ok(Node::Custom(node.to_value()));
        }
        Ok(node)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, Self::Error> {
        Ok(single_entry(variant, value.serialize(self)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(VariantSerializer {
            variant,
            inner: SeqSerializer {
                items: Vec::with_capacity(len),
            },
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapSerializer {
            entries: BTreeMap::new(),
            textual: true,
            current_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(RecordSerializer {
            fields: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(VariantSerializer {
            variant,
            inner: RecordSerializer {
                fields: Vec::with_capacity(len),
            },
        })
    }
}

/// Externally tagged enum variants become single-entry maps.
fn single_entry(variant: &str, node: Node) -> Node {
    Node::Map {
        entries: BTreeMap::from([(variant.to_string(), node)]),
        textual: true,
    }
}

// --- SerializeStruct ---

struct RecordSerializer {
    fields: Vec<(String, Node)>,
}

impl ser::SerializeStruct for RecordSerializer {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        self.fields
            .push((key.to_string(), value.serialize(NodeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Node::Record(self.fields))
    }
}

struct VariantSerializer<S> {
    variant: &'static str,
    inner: S,
}

impl ser::SerializeStructVariant for VariantSerializer<RecordSerializer> {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        let node = ser::SerializeStruct::end(self.inner)?;
        Ok(single_entry(self.variant, node))
    }
}

// --- SerializeMap ---

struct MapSerializer {
    entries: BTreeMap<String, Node>,
    textual: bool,
    current_key: Option<String>,
}

impl ser::SerializeMap for MapSerializer {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), Self::Error> {
        let (key, textual) = key.serialize(KeySerializer)?;
        self.textual &= textual;
        self.current_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Self::Error> {
        let key = self
            .current_key
            .take()
            .ok_or_else(|| SnapshotError("serialize_value called without serialize_key".into()))?;
        self.entries.insert(key, value.serialize(NodeSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Node::Map {
            entries: self.entries,
            textual: self.textual,
        })
    }
}

// --- SerializeSeq (for Vec/array/tuple fields) ---

struct SeqSerializer {
    items: Vec<Node>,
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.items.push(value.serialize(NodeSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Node::Seq(self.items))
    }
}

impl ser::SerializeTuple for SeqSerializer {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqSerializer {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleVariant for VariantSerializer<SeqSerializer> {
    type Ok = Node;
    type Error = SnapshotError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(&mut self.inner, value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        let node = ser::SerializeSeq::end(self.inner)?;
        Ok(single_entry(self.variant, node))
    }
}

// --- Key serializer (map keys as text, noting non-string keys) ---

struct KeySerializer;

fn unsupported_key() -> SnapshotError {
    SnapshotError("map keys must be strings or scalars".into())
}

impl ser::Serializer for KeySerializer {
    type Ok = (String, bool);
    type Error = SnapshotError;
    type SerializeSeq = ser::Impossible<(String, bool), SnapshotError>;
    type SerializeTuple = ser::Impossible<(String, bool), SnapshotError>;
    type SerializeTupleStruct = ser::Impossible<(String, bool), SnapshotError>;
    type SerializeTupleVariant = ser::Impossible<(String, bool), SnapshotError>;
    type SerializeMap = ser::Impossible<(String, bool), SnapshotError>;
    type SerializeStruct = ser::Impossible<(String, bool), SnapshotError>;
    type SerializeStructVariant = ser::Impossible<(String, bool), SnapshotError>;

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), true))
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), true))
    }

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), false))
    }
    fn serialize_bytes(self, _: &[u8]) -> Result<Self::Ok, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_some<T: Serialize + ?Sized>(self, _: &T) -> Result<Self::Ok, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<Self::Ok, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        v: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Ok((v.to_string(), true))
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        v: &T,
    ) -> Result<Self::Ok, Self::Error> {
        v.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<Self::Ok, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Err(unsupported_key())
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Err(unsupported_key())
    }
}
