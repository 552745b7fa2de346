//! Parser contracts and the adapters that turn byte sources into parsers.
//!
//! A [`Parser`] is told the delimiter, is offered the canonical keys, and
//! then streams `(key, value)` pairs. Keys must be handed over unformatted;
//! the loader applies the key formatter on its side.

use std::io::Read;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{LayerfigError, Result};
use crate::value::Value;

/// Stream of `(key, value)` pairs produced by a parser.
pub type Values = mpsc::Receiver<(String, Value)>;

/// Buffer size of channels created by [`stream`].
pub const VALUES_CAPACITY: usize = 64;

/// A source of configuration values.
#[async_trait]
pub trait Parser: Send {
    /// Receive the key delimiter before any other call.
    fn set_delimiter(&mut self, _delimiter: &str) {}

    /// Receive the canonical keys the destination currently knows about.
    /// The channel holds every key and is closed once they are all queued.
    async fn keys(&mut self, mut keys: mpsc::Receiver<String>) -> Result<()> {
        while keys.recv().await.is_some() {}
        Ok(())
    }

    /// Start producing values. The loader drains the returned channel.
    async fn values(&mut self) -> Result<Values>;
}

/// A parser over a byte source, such as a file decoder.
pub trait ReadParser: Send {
    fn set_delimiter(&mut self, _delimiter: &str) {}

    /// Decode `source` and return the values it holds. The source is only
    /// read during this call.
    fn values(&mut self, source: &mut dyn Read) -> Result<Values>;
}

/// Spawn a task feeding `pairs` into a fresh channel. The task stops early
/// when the receiver is dropped.
pub fn stream<I>(pairs: I) -> Values
where
    I: IntoIterator<Item = (String, Value)> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = mpsc::channel(VALUES_CAPACITY);
    tokio::spawn(async move {
        for pair in pairs {
            if tx.send(pair).await.is_err() {
                break;
            }
        }
    });
    rx
}

enum Source {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// A [`ReadParser`] bound to a source. Built by [`from_str`], [`from_bytes`]
/// and [`from_file`].
pub struct SourceParser<P> {
    parser: P,
    source: Source,
}

/// Parse the given text with `parser`.
pub fn from_str<P: ReadParser>(parser: P, text: &str) -> SourceParser<P> {
    from_bytes(parser, text.as_bytes().to_vec())
}

/// Parse the given bytes with `parser`.
pub fn from_bytes<P: ReadParser>(parser: P, bytes: impl Into<Vec<u8>>) -> SourceParser<P> {
    SourceParser {
        parser,
        source: Source::Bytes(bytes.into()),
    }
}

/// Parse the file at `path` with `parser`. The file is read anew on every
/// parse, so the parser picks up edits.
pub fn from_file<P: ReadParser>(parser: P, path: impl Into<PathBuf>) -> SourceParser<P> {
    SourceParser {
        parser,
        source: Source::File(path.into()),
    }
}

#[async_trait]
impl<P: ReadParser> Parser for SourceParser<P> {
    fn set_delimiter(&mut self, delimiter: &str) {
        self.parser.set_delimiter(delimiter);
    }

    async fn values(&mut self) -> Result<Values> {
        match &self.source {
            Source::Bytes(bytes) => self.parser.values(&mut bytes.as_slice()),
            Source::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| LayerfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                self.parser.values(&mut bytes.as_slice())
            }
        }
    }
}

/// A parser over values held in memory. Later `add`s of the same key
/// replace the earlier value in place.
#[derive(Debug, Clone, Default)]
pub struct MemoryParser {
    values: Vec<(String, Value)>,
}

impl MemoryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add(key, value);
        self
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.values.retain(|(k, _)| k != key);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl Parser for MemoryParser {
    async fn values(&mut self) -> Result<Values> {
        Ok(stream(self.values.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::fixtures::test::JsonParser;

    async fn drain(mut values: Values) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        while let Some(pair) = values.recv().await {
            out.push(pair);
        }
        out
    }

    #[tokio::test]
    async fn memory_parser_keeps_insertion_order() {
        let mut parser = MemoryParser::new()
            .with("b", 1)
            .with("a", "x")
            .with("b", 2);
        let pairs = drain(parser.values().await.unwrap()).await;
        assert_eq!(
            pairs,
            vec![("b".into(), Value::I32(2)), ("a".into(), Value::from("x"))]
        );

        parser.remove("b");
        let pairs = drain(parser.values().await.unwrap()).await;
        assert_eq!(pairs, vec![("a".into(), Value::from("x"))]);
    }

    #[tokio::test]
    async fn stream_outlives_capacity() {
        let pairs: Vec<(String, Value)> = (0..VALUES_CAPACITY * 3)
            .map(|i| (format!("k{i}"), Value::from(i as u64)))
            .collect();
        let got = drain(stream(pairs.clone())).await;
        assert_eq!(got, pairs);
    }

    #[tokio::test]
    async fn default_keys_drains_channel() {
        let mut parser = MemoryParser::new();
        let (tx, rx) = mpsc::channel(2);
        tx.send("a".to_string()).await.unwrap();
        drop(tx);
        parser.keys(rx).await.unwrap();
    }

    #[tokio::test]
    async fn from_str_reads_text() {
        let mut parser = from_str(JsonParser::default(), r#"{"db": {"url": "pg://"}}"#);
        parser.set_delimiter(".");
        let pairs = drain(parser.values().await.unwrap()).await;
        assert_eq!(pairs, vec![("db.url".into(), Value::from("pg://"))]);
    }

    #[tokio::test]
    async fn from_file_rereads_on_every_call() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 1}}"#).unwrap();
        let mut parser = from_file(JsonParser::default(), file.path());
        let first = drain(parser.values().await.unwrap()).await;
        assert_eq!(first, vec![("port".into(), Value::I64(1))]);

        std::fs::write(file.path(), r#"{"port": 2}"#).unwrap();
        let second = drain(parser.values().await.unwrap()).await;
        assert_eq!(second, vec![("port".into(), Value::I64(2))]);
    }

    #[tokio::test]
    async fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let mut parser = from_file(JsonParser::default(), &path);
        match parser.values().await {
            Err(LayerfigError::Io { path: p, .. }) => assert_eq!(p, path),
            Err(other) => panic!("Expected Io, got: {other:?}"),
            Ok(_) => panic!("Expected Io, got values"),
        }
    }
}
