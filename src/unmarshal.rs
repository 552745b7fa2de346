//! Self-converting fields.
//!
//! A field type implementing [`Unmarshal`] receives parsed values untouched
//! and converts them itself. Mark the field with
//! `#[serde(with = "layerfig::unmarshal")]`:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Config {
//!     #[serde(with = "layerfig::unmarshal")]
//!     window: Window,
//! }
//! ```
//!
//! Other serializers see the field as its plain `Serialize` form.

use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

use crate::error::BoxError;
use crate::value::Value;

/// Newtype name that marks a slot as self-converting while the destination
/// is snapshotted.
pub(crate) const TOKEN: &str = "$layerfig::private::Unmarshal";

/// Conversion hook for field types that handle their own parsing.
///
/// Every parse re-reads the whole destination, so a field no parser touched
/// is handed back in its own `Serialize` form. Accept that form as well.
pub trait Unmarshal: Sized {
    /// Build the field from the value exactly as the parser yielded it.
    fn unmarshal(value: Value) -> Result<Self, BoxError>;
}

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    serializer.serialize_newtype_struct(TOKEN, value)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Unmarshal,
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    T::unmarshal(value).map_err(de::Error::custom)
}
