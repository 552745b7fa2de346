use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{Dispatch, debug, warn};

use crate::error::{LayerfigError, Result};
use crate::flatten;
use crate::format::{CaseInsensitive, Formatter};
use crate::loader::{Destination, Loader};
use crate::tag::{DEFAULT_STRUCT_TAG, TagSet};

/// Default key delimiter.
pub const DEFAULT_DELIMITER: &str = ".";

/// Settings fixed when the loader is built.
pub(crate) struct Options {
    pub delimiter: String,
    pub formatter: Arc<dyn Formatter>,
    pub struct_tag: String,
    pub tags: TagSet,
    pub debug: bool,
    pub logger: Option<Dispatch>,
    pub enforce_priority: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            delimiter: DEFAULT_DELIMITER.to_string(),
            formatter: Arc::new(CaseInsensitive),
            struct_tag: DEFAULT_STRUCT_TAG.to_string(),
            tags: TagSet::default(),
            debug: false,
            logger: None,
            enforce_priority: true,
        }
    }
}

/// Builder for a [`Loader`].
///
/// - **Keys**: [`delimiter()`](Self::delimiter) and
///   [`key_formatter()`](Self::key_formatter) decide what canonical keys look like.
/// - **Annotations**: [`tag()`](Self::tag) renames fields or marks them
///   `omitempty`, inside the namespace chosen by [`struct_tag()`](Self::struct_tag).
/// - **Precedence**: [`enforce_priority()`](Self::enforce_priority).
/// - **Diagnostics**: [`debug()`](Self::debug), [`logger()`](Self::logger).
pub struct LoaderBuilder<T> {
    dest: Arc<RwLock<T>>,
    options: Options,
}

impl<T: Destination> LoaderBuilder<T> {
    pub(crate) fn new(dest: Arc<RwLock<T>>) -> Self {
        Self {
            dest,
            options: Options::default(),
        }
    }

    /// Set the key delimiter (default: `"."`). An empty delimiter is ignored.
    pub fn delimiter(mut self, delimiter: &str) -> Self {
        if delimiter.is_empty() {
            warn!("Ignoring empty key delimiter");
        } else {
            self.options.delimiter = delimiter.to_string();
        }
        self
    }

    /// Replace the key formatter (default: [`CaseInsensitive`]).
    ///
    /// The formatter is applied to canonical keys and to every key a parser
    /// yields. It must be idempotent and keep delimiters where they are.
    pub fn key_formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.options.formatter = Arc::new(formatter);
        self
    }

    /// Choose the annotation namespace fields are read from
    /// (default: `"layerfig"`).
    pub fn struct_tag(mut self, namespace: &str) -> Self {
        self.options.struct_tag = namespace.to_string();
        self
    }

    /// Annotate the field at `path` in the default namespace.
    ///
    /// `path` is the serde field names from the root joined with `.`, for
    /// example `"database.url"`. `annotation` is `name[,omitempty]`: a
    /// non-empty name replaces the field's key segment, and `omitempty`
    /// skips writes of empty values.
    pub fn tag(self, path: &str, annotation: &str) -> Self {
        self.tag_in(DEFAULT_STRUCT_TAG, path, annotation)
    }

    /// Annotate the field at `path` in the given namespace.
    pub fn tag_in(mut self, namespace: &str, path: &str, annotation: &str) -> Self {
        self.options.tags.insert(namespace, path, annotation);
        self
    }

    /// Log flattening, lookups and writes at debug level (default: off).
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Send the loader's diagnostics to `logger` instead of the global
    /// subscriber.
    pub fn logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.options.logger = Some(logger.into());
        self
    }

    /// Discard the loader's diagnostics.
    pub fn nop_logger(mut self) -> Self {
        self.options.logger = Some(Dispatch::none());
        self
    }

    /// Whether later parsers override earlier ones within one parse
    /// (default: `true`). When `false`, the first parser to write a key wins.
    pub fn enforce_priority(mut self, enforce: bool) -> Self {
        self.options.enforce_priority = enforce;
        self
    }

    /// Snapshot the destination and flatten it into canonical keys.
    pub fn build(self) -> Result<Loader<T>> {
        let root = {
            let dest = self.dest.read();
            flatten::snapshot(&*dest).map_err(|e| LayerfigError::InvalidDestination {
                found: e.to_string(),
            })?
        };
        if !matches!(root, crate::node::Node::Record(_)) {
            return Err(LayerfigError::InvalidDestination {
                found: format!("{} ({})", std::any::type_name::<T>(), root.kind()),
            });
        }

        let fields = match &self.options.logger {
            Some(logger) => tracing::dispatcher::with_default(logger, || {
                flatten::flatten(&root, &self.options)
            }),
            None => flatten::flatten(&root, &self.options),
        };
        if self.options.debug {
            debug!(fields = fields.len(), "Built loader");
        }
        Ok(Loader::from_parts(self.dest, fields, self.options))
    }
}
