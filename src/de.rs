//! Committing a slot tree back into the destination type.
//!
//! The deserializer is lenient in the same way writes are: every typed
//! request coerces the stored value, so slots whose kind could not be
//! observed at snapshot time (`None`, empty containers) are still converted
//! into the declared type here.

use std::fmt;

use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, IntoDeserializer,
    MapAccess, SeqAccess, VariantAccess, Visitor,
};

use crate::coerce::{self, Reject};
use crate::error::LayerfigError;
use crate::node::Node;
use crate::value::{Kind, Value};

/// Deserialize `root` into `T`.
pub(crate) fn commit<T: DeserializeOwned>(root: Node) -> Result<T, LayerfigError> {
    T::deserialize(NodeDeserializer::new(root, String::new())).map_err(LayerfigError::from)
}

#[derive(Debug)]
pub(crate) struct DeError {
    key: Option<String>,
    value: Option<String>,
    reason: String,
    conversion: Option<(Kind, Kind)>,
}

impl DeError {
    fn reject(reject: Reject, key: &str, value: &Value, to: Kind) -> Self {
        match reject {
            Reject::Mismatch => DeError {
                key: Some(key.to_string()),
                value: Some(value.to_string()),
                reason: format!("expected {to}"),
                conversion: Some((value.kind(), to)),
            },
            Reject::Invalid(reason) => DeError {
                key: Some(key.to_string()),
                value: Some(value.to_string()),
                reason,
                conversion: None,
            },
        }
    }

    fn mismatch(key: &str, found: Kind, to: Kind) -> Self {
        DeError {
            key: Some(key.to_string()),
            value: None,
            reason: format!("expected {to}"),
            conversion: Some((found, to)),
        }
    }

    /// Attribute an error raised by a nested visitor to the slot it came from.
    fn at(mut self, key: &str, found: Kind) -> Self {
        if self.key.is_none() {
            self.key = Some(key.to_string());
            self.value = Some(format!("<{found}>"));
        }
        self
    }
}

impl fmt::Display for DeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "'{key}': {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

impl std::error::Error for DeError {}

impl de::Error for DeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        DeError {
            key: None,
            value: None,
            reason: msg.to_string(),
            conversion: None,
        }
    }
}

impl From<DeError> for LayerfigError {
    fn from(err: DeError) -> Self {
        let key = err.key.unwrap_or_default();
        match err.conversion {
            Some((from, to)) => LayerfigError::InvalidConversion { key, from, to },
            None => LayerfigError::Assign {
                key,
                value: err.value.unwrap_or_default(),
                reason: err.reason,
            },
        }
    }
}

fn join_key(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

struct NodeDeserializer {
    node: Node,
    key: String,
}

impl NodeDeserializer {
    fn new(node: Node, key: String) -> Self {
        NodeDeserializer { node, key }
    }

    /// The stored scalar, for typed requests.
    fn leaf(self, to: Kind) -> Result<(Value, String), DeError> {
        match self.node {
            Node::Leaf(v) | Node::Custom(v) => Ok((v, self.key)),
            other => Err(DeError::mismatch(&self.key, other.kind(), to)),
        }
    }

    fn scalar(self, to: Kind) -> Result<Value, DeError> {
        let (value, key) = self.leaf(to)?;
        coerce::scalar(&value, to).map_err(|r| DeError::reject(r, &key, &value, to))
    }

    fn visit_map<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let entries: Vec<(String, Node)> = match self.node {
            Node::Map { entries, .. } => entries.into_iter().collect(),
            Node::Record(fields) => fields,
            Node::Leaf(Value::Map(entries)) | Node::Custom(Value::Map(entries)) => {
                entries.into_iter().map(|(k, v)| (k, Node::from(v))).collect()
            }
            other => return Err(DeError::mismatch(&self.key, other.kind(), Kind::Map)),
        };
        visitor.visit_map(MapDeserializer {
            iter: entries.into_iter(),
            pending: None,
            key: self.key,
        })
    }

    fn visit_seq<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let items = match self.node {
            Node::Seq(items) => items,
            Node::Leaf(Value::Seq(items)) | Node::Custom(Value::Seq(items)) => {
                items.into_iter().map(Node::from).collect()
            }
            other => return Err(DeError::mismatch(&self.key, other.kind(), Kind::Seq)),
        };
        visitor.visit_seq(SeqDeserializer {
            iter: items.into_iter().enumerate(),
            key: self.key,
        })
    }
}

macro_rules! deserialize_number {
    ($($method:ident => $kind:ident, $visit:ident;)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
                match self.scalar(Kind::$kind)? {
                    Value::$kind(v) => visitor.$visit(v),
                    other => Err(de::Error::custom(format!("expected {}, got {other}", Kind::$kind))),
                }
            }
        )*
    };
}

impl<'de> Deserializer<'de> for NodeDeserializer {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.node {
            Node::Seq(_) => self.visit_seq(visitor),
            Node::Map { .. } | Node::Record(_) => self.visit_map(visitor),
            Node::Leaf(v) | Node::Custom(v) => match v {
                Value::Null => visitor.visit_unit(),
                Value::Bool(v) => visitor.visit_bool(v),
                Value::I8(v) => visitor.visit_i8(v),
                Value::I16(v) => visitor.visit_i16(v),
                Value::I32(v) => visitor.visit_i32(v),
                Value::I64(v) => visitor.visit_i64(v),
                Value::U8(v) => visitor.visit_u8(v),
                Value::U16(v) => visitor.visit_u16(v),
                Value::U32(v) => visitor.visit_u32(v),
                Value::U64(v) => visitor.visit_u64(v),
                Value::F32(v) => visitor.visit_f32(v),
                Value::F64(v) => visitor.visit_f64(v),
                Value::String(v) => visitor.visit_string(v),
                container @ (Value::Seq(_) | Value::Map(_)) => {
                    NodeDeserializer::new(Node::from(container), self.key).deserialize_any(visitor)
                }
            },
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let (value, key) = self.leaf(Kind::Bool)?;
        let b = coerce::boolean(&value).map_err(|r| DeError::reject(r, &key, &value, Kind::Bool))?;
        visitor.visit_bool(b)
    }

    deserialize_number! {
        deserialize_i8 => I8, visit_i8;
        deserialize_i16 => I16, visit_i16;
        deserialize_i32 => I32, visit_i32;
        deserialize_i64 => I64, visit_i64;
        deserialize_u8 => U8, visit_u8;
        deserialize_u16 => U16, visit_u16;
        deserialize_u32 => U32, visit_u32;
        deserialize_u64 => U64, visit_u64;
        deserialize_f32 => F32, visit_f32;
        deserialize_f64 => F64, visit_f64;
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let (value, key) = self.leaf(Kind::String)?;
        let s = coerce::string(&value)
            .map_err(|r| DeError::reject(r, &key, &value, Kind::String))?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(DeError::reject(
                Reject::Invalid("expected a single character".into()),
                &key,
                &value,
                Kind::String,
            )),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let (value, key) = self.leaf(Kind::String)?;
        let s = coerce::string(&value)
            .map_err(|r| DeError::reject(r, &key, &value, Kind::String))?;
        visitor.visit_string(s)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.node {
            Node::Leaf(Value::Null) => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.node {
            Node::Leaf(Value::Null) => visitor.visit_unit(),
            other => Err(DeError::mismatch(&self.key, other.kind(), Kind::Null)),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.visit_seq(visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.visit_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.visit_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.visit_map(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.visit_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        match self.node {
            Node::Leaf(Value::String(variant)) | Node::Custom(Value::String(variant)) => {
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: None,
                    key: self.key,
                })
            }
            Node::Map { entries, .. } if entries.len() == 1 => {
                let Some((variant, value)) = entries.into_iter().next() else {
                    return Err(de::Error::custom("empty enum map"));
                };
                let key = join_key(&self.key, &variant);
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                    key,
                })
            }
            other => Err(DeError::mismatch(&self.key, other.kind(), Kind::String)),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}

// --- SeqAccess ---

struct SeqDeserializer {
    iter: std::iter::Enumerate<std::vec::IntoIter<Node>>,
    key: String,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = DeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, DeError> {
        let Some((i, node)) = self.iter.next() else {
            return Ok(None);
        };
        let key = format!("{}[{i}]", self.key);
        let found = node.kind();
        seed.deserialize(NodeDeserializer::new(node, key.clone()))
            .map(Some)
            .map_err(|e| e.at(&key, found))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

// --- MapAccess ---

struct MapDeserializer {
    iter: std::vec::IntoIter<(String, Node)>,
    pending: Option<(String, Node)>,
    key: String,
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = DeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DeError> {
        let Some((name, node)) = self.iter.next() else {
            return Ok(None);
        };
        let key = join_key(&self.key, &name);
        let k = seed.deserialize(NodeDeserializer::new(
            Node::Leaf(Value::String(name.clone())),
            key,
        ))?;
        self.pending = Some((name, node));
        Ok(Some(k))
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DeError> {
        let (name, node) = self
            .pending
            .take()
            .ok_or_else(|| de::Error::custom("value requested before key"))?;
        let key = join_key(&self.key, &name);
        let found = node.kind();
        seed.deserialize(NodeDeserializer::new(node, key.clone()))
            .map_err(|e| e.at(&key, found))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

// --- EnumAccess ---

struct EnumDeserializer {
    variant: String,
    value: Option<Node>,
    key: String,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = DeError;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), DeError> {
        let de: de::value::StringDeserializer<DeError> = self.variant.into_deserializer();
        let variant = seed.deserialize(de)?;
        Ok((
            variant,
            VariantDeserializer {
                value: self.value,
                key: self.key,
            },
        ))
    }
}

struct VariantDeserializer {
    value: Option<Node>,
    key: String,
}

impl VariantDeserializer {
    fn into_inner(self) -> Result<NodeDeserializer, DeError> {
        match self.value {
            Some(node) => Ok(NodeDeserializer::new(node, self.key)),
            None => Err(DeError::mismatch(&self.key, Kind::String, Kind::Map)),
        }
    }
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = DeError;

    fn unit_variant(self) -> Result<(), DeError> {
        match self.value {
            None | Some(Node::Leaf(Value::Null)) => Ok(()),
            Some(other) => Err(DeError::mismatch(&self.key, other.kind(), Kind::Null)),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, DeError> {
        seed.deserialize(self.into_inner()?)
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, DeError> {
        Deserializer::deserialize_tuple(self.into_inner()?, len, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        Deserializer::deserialize_struct(self.into_inner()?, "", fields, visitor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::Deserialize;

    use super::*;

    fn leaf(v: impl Into<Value>) -> Node {
        Node::Leaf(v.into())
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Server {
        host: String,
        port: u16,
        tls: Option<bool>,
    }

    #[test]
    fn record_commits_into_struct() {
        let root = Node::Record(vec![
            ("host".into(), leaf("localhost")),
            ("port".into(), leaf(8080u16)),
            ("tls".into(), leaf(Value::Null)),
        ]);
        let server: Server = commit(root).unwrap();
        assert_eq!(
            server,
            Server {
                host: "localhost".into(),
                port: 8080,
                tls: None,
            }
        );
    }

    #[test]
    fn unobserved_slots_are_coerced_on_commit() {
        let root = Node::Record(vec![
            ("host".into(), leaf("h")),
            ("port".into(), leaf("9000")),
            ("tls".into(), leaf("true")),
        ]);
        let server: Server = commit(root).unwrap();
        assert_eq!(server.port, 9000);
        assert_eq!(server.tls, Some(true));
    }

    #[test]
    fn nested_maps_and_sequences() {
        #[derive(Debug, Deserialize)]
        struct Config {
            limits: HashMap<String, Vec<u8>>,
            codes: BTreeMap<u16, String>,
        }
        let root = Node::Record(vec![
            (
                "limits".into(),
                Node::from(Value::Map(BTreeMap::from([(
                    "cpu".to_string(),
                    Value::from(vec![1i64, 2]),
                )]))),
            ),
            (
                "codes".into(),
                Node::Map {
                    entries: BTreeMap::from([("404".into(), leaf("missing"))]),
                    textual: false,
                },
            ),
        ]);
        let config: Config = commit(root).unwrap();
        assert_eq!(config.limits["cpu"], vec![1, 2]);
        assert_eq!(config.codes[&404], "missing");
    }

    #[test]
    fn enums_from_strings_and_single_entry_maps() {
        #[derive(Debug, Deserialize, PartialEq)]
        enum Mode {
            Fast,
            Limited(u8),
        }
        #[derive(Debug, Deserialize)]
        struct Config {
            a: Mode,
            b: Mode,
        }
        let root = Node::Record(vec![
            ("a".into(), leaf("Fast")),
            (
                "b".into(),
                Node::Map {
                    entries: BTreeMap::from([("Limited".into(), leaf(3i64))]),
                    textual: true,
                },
            ),
        ]);
        let config: Config = commit(root).unwrap();
        assert_eq!(config.a, Mode::Fast);
        assert_eq!(config.b, Mode::Limited(3));
    }

    #[test]
    fn overflow_reports_key_and_value() {
        let root = Node::Record(vec![
            ("host".into(), leaf("h")),
            ("port".into(), leaf(70000i64)),
            ("tls".into(), leaf(Value::Null)),
        ]);
        let err = commit::<Server>(root).unwrap_err();
        match err {
            LayerfigError::Assign { key, value, .. } => {
                assert_eq!(key, "port");
                assert_eq!(value, "70000");
            }
            other => panic!("Expected Assign, got: {other:?}"),
        }
    }

    #[test]
    fn category_mismatch_is_invalid_conversion() {
        let root = Node::Record(vec![
            ("host".into(), Node::Seq(vec![])),
            ("port".into(), leaf(1u16)),
            ("tls".into(), leaf(Value::Null)),
        ]);
        let err = commit::<Server>(root).unwrap_err();
        match err {
            LayerfigError::InvalidConversion { key, from, to } => {
                assert_eq!(key, "host");
                assert_eq!(from, Kind::Seq);
                assert_eq!(to, Kind::String);
            }
            other => panic!("Expected InvalidConversion, got: {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_attributed_to_its_record() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Outer {
            server: Server,
        }
        let root = Node::Record(vec![(
            "server".into(),
            Node::Record(vec![("host".into(), leaf("h"))]),
        )]);
        let err = commit::<Outer>(root).unwrap_err();
        match err {
            LayerfigError::Assign { key, reason, .. } => {
                assert_eq!(key, "server");
                assert!(reason.contains("port"));
            }
            other => panic!("Expected Assign, got: {other:?}"),
        }
    }

    #[test]
    fn custom_slots_deserialize_as_values() {
        let root = Node::Record(vec![("raw".into(), Node::Custom(Value::from(vec![1u8])))]);
        #[derive(Debug, Deserialize)]
        struct Holder {
            raw: Value,
        }
        let holder: Holder = commit(root).unwrap();
        assert_eq!(holder.raw, Value::Seq(vec![Value::U8(1)]));
    }
}
