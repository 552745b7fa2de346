//! The loader: routes parsed values into the destination.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::instrument::WithSubscriber;
use tracing::{debug, trace, warn};

use crate::builder::{LoaderBuilder, Options};
use crate::de;
use crate::error::{LayerfigError, Result};
use crate::field::{Field, Fields};
use crate::flatten;
use crate::node::Node;
use crate::notify::Coordinator;
use crate::parser::Parser;
use crate::value::{Kind, Value};

/// Types a loader can fill: any struct that round-trips through serde.
pub trait Destination: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Destination for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Loads values from parsers into a shared destination.
///
/// Cloning is cheap; clones share the destination, the key map and the
/// running notifiers.
pub struct Loader<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

pub(crate) struct Inner<T> {
    dest: Arc<RwLock<T>>,
    /// The key map. Also serialises parses.
    fields: AsyncMutex<Fields>,
    options: Options,
    pub(crate) coordinator: Mutex<Coordinator>,
}

impl<T> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Loader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The snapshot one parser writes into.
struct Draft {
    doc: Node,
    /// The last state known to commit, held while an enclosing value is
    /// still incomplete.
    fallback: Option<Node>,
}

/// A map handed to a slot that is not a container.
fn is_shape_mismatch(err: &LayerfigError) -> bool {
    matches!(err, LayerfigError::InvalidConversion { from: Kind::Map, .. })
}

/// Keys written so far during one parse call.
#[derive(Default)]
struct Written {
    /// By earlier parsers.
    before: HashSet<String>,
    /// By the current parser.
    current: HashSet<String>,
}

impl<T: Destination> Loader<T> {
    /// Build a loader for `dest` with default options.
    pub fn new(dest: T) -> Result<Self> {
        Self::builder(dest).build()
    }

    /// Start building a loader that owns `dest`.
    pub fn builder(dest: T) -> LoaderBuilder<T> {
        LoaderBuilder::new(Arc::new(RwLock::new(dest)))
    }

    /// Start building a loader over a destination the caller already shares.
    pub fn from_shared(dest: Arc<RwLock<T>>) -> LoaderBuilder<T> {
        LoaderBuilder::new(dest)
    }

    pub(crate) fn from_parts(dest: Arc<RwLock<T>>, fields: Fields, options: Options) -> Self {
        Loader {
            inner: Arc::new(Inner {
                dest,
                fields: AsyncMutex::new(fields),
                options,
                coordinator: Mutex::new(Coordinator::default()),
            }),
        }
    }

    /// Read access to the destination.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.dest.read()
    }

    /// A copy of the destination.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.dest.read().clone()
    }

    /// The shared destination handle.
    pub fn handle(&self) -> Arc<RwLock<T>> {
        Arc::clone(&self.inner.dest)
    }

    /// Every canonical key known so far, including map entries learned from
    /// earlier parses. Sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.fields.lock().await.keys()
    }

    /// Run `parsers` in order, later parsers taking precedence.
    ///
    /// Stops at the first error. Writes made before the error stay in the
    /// destination.
    pub async fn parse(&self, parsers: &mut [&mut dyn Parser]) -> Result<()> {
        self.with_logger(async {
            let mut fields = self.inner.fields.lock().await;
            let mut written = Written::default();
            for parser in parsers.iter_mut() {
                self.parse_one(&mut fields, &mut **parser, &mut written)
                    .await?;
            }
            Ok::<(), LayerfigError>(())
        })
        .await
    }

    /// Re-run a single parser, as notifiers do on change.
    pub(crate) async fn reparse<P: Parser + ?Sized>(&self, parser: &mut P) -> Result<()> {
        self.with_logger(async {
            let mut fields = self.inner.fields.lock().await;
            self.parse_one(&mut fields, parser, &mut Written::default())
                .await
        })
        .await
    }

    pub(crate) async fn with_logger<F: Future>(&self, fut: F) -> F::Output {
        match &self.inner.options.logger {
            Some(logger) => fut.with_subscriber(logger.clone()).await,
            None => fut.await,
        }
    }

    async fn parse_one<P: Parser + ?Sized>(
        &self,
        fields: &mut Fields,
        parser: &mut P,
        written: &mut Written,
    ) -> Result<()> {
        let options = &self.inner.options;
        parser.set_delimiter(&options.delimiter);

        let keys = fields.keys();
        let (tx, rx) = mpsc::channel(keys.len().max(1));
        for key in keys {
            if tx.send(key).await.is_err() {
                break;
            }
        }
        drop(tx);
        parser.keys(rx).await?;

        let mut values = parser.values().await?;
        let mut draft = Draft {
            doc: self.snapshot()?,
            fallback: None,
        };
        let mut outcome = Ok(());
        while let Some((key, value)) = values.recv().await {
            let key = options.formatter.format(&key, &options.delimiter);
            if let Err(e) = self.dispatch(fields, &mut draft, key, value, written) {
                outcome = Err(e);
                break;
            }
        }
        drop(values);

        let committed = match self.commit(draft.doc) {
            Err(e) => {
                if let Some(fallback) = draft.fallback
                    && let Err(fallback_err) = self.commit(fallback)
                {
                    warn!(error = %fallback_err, "Could not keep partial writes");
                }
                Err(self.canonical_error(fields, e))
            }
            Ok(()) => Ok(()),
        };
        written.before.extend(written.current.drain());
        match (outcome, committed) {
            (Err(e), Err(commit_err)) => {
                warn!(error = %commit_err, "Could not keep partial writes");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn dispatch(
        &self,
        fields: &mut Fields,
        draft: &mut Draft,
        key: String,
        value: Value,
        written: &mut Written,
    ) -> Result<()> {
        let options = &self.inner.options;
        let Some(field) = self.lookup(fields, &draft.doc, &key) else {
            return match value {
                Value::Map(entries) => self.expand(fields, draft, &key, entries, written),
                _ => {
                    if options.debug {
                        debug!(key = %key, "Key not found, ignoring");
                    }
                    Ok(())
                }
            };
        };

        if matches!(field.kind, Kind::Map | Kind::Record)
            && let Value::Map(entries) = value
        {
            return self.expand(fields, draft, &key, entries, written);
        }

        if !options.enforce_priority && written.before.contains(&key) {
            if options.debug {
                debug!(key = %key, "Already set by an earlier parser, skipping");
            }
            return Ok(());
        }
        if field.omitempty && value.is_empty() {
            if options.debug {
                debug!(key = %key, "Empty value for omitempty field, skipping");
            }
            return Ok(());
        }

        trace!(key = %key, value = %value, kind = %field.kind, "Writing");
        if !field.is_lazy() {
            field.write(&mut draft.doc, value)?;
            written.current.insert(key);
            return Ok(());
        }

        // Untyped and self-converting slots are checked against the real type
        // by committing a copy of the draft.
        let before = draft.doc.clone();
        let mut checked = field.write(&mut draft.doc, value);
        if checked.is_ok() {
            checked = match de::commit::<T>(draft.doc.clone()) {
                Ok(_) => {
                    draft.fallback = None;
                    Ok(())
                }
                Err(e) if field.owns(&e) || (field.provisional && is_shape_mismatch(&e)) => {
                    Err(self.canonical_error(fields, e))
                }
                // An enclosing value is still incomplete, e.g. a new struct
                // entry whose remaining fields arrive later.
                Err(_) => {
                    draft.fallback.get_or_insert(before.clone());
                    Ok(())
                }
            };
        }

        match checked {
            Ok(()) => {
                written.current.insert(key);
                Ok(())
            }
            Err(e) => {
                draft.doc = before;
                if field.provisional && is_shape_mismatch(&e) {
                    fields.remove(&key);
                    if options.debug {
                        debug!(key = %key, "Key not found, ignoring");
                    }
                    return Ok(());
                }
                Err(e)
            }
        }
    }

    /// Dispatch each entry of a mapping value as its own key.
    fn expand(
        &self,
        fields: &mut Fields,
        draft: &mut Draft,
        key: &str,
        entries: BTreeMap<String, Value>,
        written: &mut Written,
    ) -> Result<()> {
        let options = &self.inner.options;
        for (child, value) in entries {
            let child_key = options
                .formatter
                .format(&format!("{key}{}{child}", options.delimiter), &options.delimiter);
            self.dispatch(fields, draft, child_key, value, written)?;
        }
        Ok(())
    }

    /// Find the handle for `key`: an exact match, or a new entry below the
    /// closest dynamic map that prefixes it. New entries are remembered.
    fn lookup(&self, fields: &mut Fields, doc: &Node, key: &str) -> Option<Field> {
        if let Some(field) = fields.get(key) {
            return Some(field.clone());
        }

        let options = &self.inner.options;
        let delimiter = options.delimiter.as_str();
        let mut prefix = key;
        while let Some((head, _)) = prefix.rsplit_once(delimiter) {
            prefix = head;
            let Some(container) = fields.get(prefix) else {
                continue;
            };
            if !container.is_container() {
                return None;
            }
            let residual = key[prefix.len() + delimiter.len()..]
                .split(delimiter)
                .map(String::from)
                .collect();
            let field = container.entry(key.to_string(), residual, doc);
            if options.debug {
                debug!(key = %key, container = %prefix, kind = %field.kind, "Learned map entry");
            }
            fields.insert(field.clone());
            return Some(field);
        }
        None
    }

    /// Report a commit error under the canonical key of the slot it names.
    fn canonical_error(&self, fields: &Fields, mut err: LayerfigError) -> LayerfigError {
        if let LayerfigError::Assign { key, .. } | LayerfigError::InvalidConversion { key, .. } =
            &mut err
            && let Some(canonical) = fields.canonical(key, &self.inner.options.delimiter)
        {
            *key = canonical;
        }
        err
    }

    fn snapshot(&self) -> Result<Node> {
        let dest = self.inner.dest.read();
        flatten::snapshot(&*dest).map_err(|e| LayerfigError::InvalidDestination {
            found: e.to_string(),
        })
    }

    fn commit(&self, doc: Node) -> Result<()> {
        let value: T = de::commit(doc)?;
        *self.inner.dest.write() = value;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fields_snapshot(&self) -> Vec<String> {
        self.inner
            .fields
            .try_lock()
            .expect("fields locked during test")
            .keys()
    }
}
