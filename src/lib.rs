//! Layered, reloadable configuration for Rust applications. Define a struct,
//! hand it to a loader, and feed it parsers.
//!
//! Layerfig fills a typed destination from any number of sources: files,
//! environment variables, in-memory values, or anything else that can stream
//! `(key, value)` pairs. Sources are applied in order, later ones winning, and
//! a source that knows when it changed can trigger a reload while the
//! application runs.
//!
//! ```ignore
//! let loader = Loader::new(AppConfig::default())?;
//! let mut file = parser::from_file(MyTomlParser::default(), "app.toml");
//! let mut env = MyEnvParser::new("APP");
//! let mut parsers: [&mut dyn Parser; 2] = [&mut file, &mut env];
//! loader.parse(&mut parsers).await?;
//! let port = loader.read().server.port;
//! ```
//!
//! # Design: struct as the key map
//!
//! The destination struct is the only schema. At build time the loader
//! serializes it once and walks the result, giving every reachable field a
//! canonical key: the field names from the root joined with the delimiter
//! (`.` by default) and run through the key formatter (lowercase by default).
//! A `database.pool_size` key therefore lands in `config.database.pool_size`.
//!
//! - **Nested structs** become nested keys.
//! - **Maps** (`HashMap<String, _>`, `BTreeMap<String, _>`) are dynamic: any
//!   key below them creates an entry on first write and is remembered for
//!   later parses.
//! - **`Option<T>` fields** are set to `Some` when a value arrives.
//! - **Unknown keys** are ignored, never errors.
//!
//! Anything that implements `Serialize` and `DeserializeOwned` works as a
//! destination, see [`Destination`].
//!
//! # Layer precedence
//!
//! ```text
//! Destination contents   whatever the struct held before parsing
//!        ↑ overridden by
//! Parser 1               first argument to parse()
//!        ↑ overridden by
//! Parser N               last argument to parse()
//! ```
//!
//! Turning off [`enforce_priority`](LoaderBuilder::enforce_priority) flips
//! this within a single `parse` call: the first parser to set a key keeps it.
//!
//! # Value conversion
//!
//! Parsers produce [`Value`]s and the loader converts each one to the shape
//! of the slot it targets. Strings parse into numbers and booleans, numbers
//! narrow with range checks, and sequences convert element by element. Map
//! values sent to a struct or map key are spread over the keys below it. A
//! value that cannot be converted fails the parse with
//! [`LayerfigError::InvalidConversion`] or [`LayerfigError::Assign`].
//!
//! Types with their own text format implement [`Unmarshal`] and opt in with
//! `#[serde(with = "layerfig::unmarshal")]`; the hook then receives the raw
//! [`Value`].
//!
//! # Field annotations
//!
//! Rust has no runtime struct tags, so annotations are registered on the
//! builder by field path:
//!
//! ```ignore
//! let loader = Loader::builder(AppConfig::default())
//!     .tag("database.pool_size", "pool,omitempty")
//!     .build()?;
//! ```
//!
//! A name replaces that path segment in the canonical key; `omitempty` skips
//! writes of empty values. Annotations live in namespaces, selected with
//! [`struct_tag`](LoaderBuilder::struct_tag).
//!
//! # Parsers
//!
//! A [`Parser`] receives the delimiter, then the canonical keys (useful for
//! sources like environment variables that cannot spell the delimiter), then
//! streams values over a channel. Byte-oriented decoders implement
//! [`ReadParser`] and are bound to text, bytes or a file with the helpers in
//! [`parser`]. [`MemoryParser`] holds values set in code.
//!
//! # Reloading
//!
//! A [`Notifier`] is a parser that signals changes. [`Loader::notify`] runs
//! one worker per notifier; each signal re-parses that notifier and the
//! result is sent to the application. [`Loader::close`] stops everything.
//!
//! # Logging
//!
//! Diagnostics go through [`tracing`]. Enable
//! [`debug`](LoaderBuilder::debug) to log key resolution and writes, or route
//! the loader's events elsewhere with [`logger`](LoaderBuilder::logger).
//!
//! # Error handling
//!
//! Every fallible operation returns [`LayerfigError`]. Parser and notifier
//! failures pass through unchanged in [`LayerfigError::Parser`].

pub mod error;
pub mod parser;
pub mod unmarshal;

mod builder;
mod coerce;
mod de;
mod field;
mod flatten;
mod format;
mod loader;
mod node;
mod notify;
mod tag;
mod value;

#[cfg(test)]
mod fixtures;

pub use builder::{DEFAULT_DELIMITER, LoaderBuilder};
pub use error::{BoxError, LayerfigError, Result, must};
pub use format::{CaseInsensitive, CaseSensitive, Formatter};
pub use loader::{Destination, Loader};
pub use notify::Notifier;
pub use parser::{MemoryParser, Parser, ReadParser, Values, stream};
pub use tag::{DEFAULT_STRUCT_TAG, Tag};
pub use unmarshal::Unmarshal;
pub use value::{Kind, Value};
