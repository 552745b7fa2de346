#[cfg(test)]
pub mod test {
    use std::collections::{BTreeMap, HashMap};
    use std::io::Read;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use tokio::sync::mpsc;

    use crate::builder::DEFAULT_DELIMITER;
    use crate::error::{LayerfigError, Result};
    use crate::notify::Notifier;
    use crate::parser::{MemoryParser, Parser, ReadParser, Values, stream};
    use crate::value::Value;

    #[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
    pub struct TestConfig {
        /// The application host.
        pub host: String,

        /// The port number.
        pub port: u16,

        /// Enable debug mode.
        pub debug: bool,

        /// Database settings.
        pub database: TestDbConfig,
    }

    #[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
    pub struct TestDbConfig {
        /// Connection string URL.
        pub url: Option<String>,

        /// Connection pool size.
        pub pool_size: usize,
    }

    // -- JSON documents ---------------------------------------------------------

    /// Decodes a JSON object into delimiter-joined keys. Nested objects are
    /// flattened; objects inside arrays stay mappings.
    pub struct JsonParser {
        delimiter: String,
    }

    impl Default for JsonParser {
        fn default() -> Self {
            Self {
                delimiter: DEFAULT_DELIMITER.to_string(),
            }
        }
    }

    impl ReadParser for JsonParser {
        fn set_delimiter(&mut self, delimiter: &str) {
            self.delimiter = delimiter.to_string();
        }

        fn values(&mut self, source: &mut dyn Read) -> Result<Values> {
            let doc: serde_json::Value =
                serde_json::from_reader(source).map_err(LayerfigError::parser)?;
            let serde_json::Value::Object(object) = doc else {
                return Err(LayerfigError::parser("top level must be an object"));
            };
            let mut pairs = Vec::new();
            flatten_object(&self.delimiter, None, object, &mut pairs);
            Ok(stream(pairs))
        }
    }

    fn flatten_object(
        delimiter: &str,
        prefix: Option<&str>,
        object: serde_json::Map<String, serde_json::Value>,
        out: &mut Vec<(String, Value)>,
    ) {
        for (name, value) in object {
            let key = match prefix {
                Some(prefix) => format!("{prefix}{delimiter}{name}"),
                None => name,
            };
            match value {
                serde_json::Value::Object(inner) => {
                    flatten_object(delimiter, Some(&key), inner, out)
                }
                other => out.push((key, json_value(other))),
            }
        }
    }

    fn json_value(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::I64(i)
                } else if let Some(u) = n.as_u64() {
                    Value::U64(u)
                } else {
                    Value::F64(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(json_value).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, json_value(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }

    // -- Environment-style variables --------------------------------------------

    /// Reads `PREFIX_KEY=value` pairs. Uses the announced keys to map
    /// underscores back to delimiters, so `APP_DATABASE_POOL_SIZE` finds
    /// `database.pool_size`.
    pub struct EnvParser {
        prefix: String,
        vars: Vec<(String, String)>,
        delimiter: String,
        known: HashMap<String, String>,
    }

    impl EnvParser {
        pub fn new(prefix: &str, vars: &[(&str, &str)]) -> Self {
            Self {
                prefix: format!("{prefix}_"),
                vars: vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                delimiter: DEFAULT_DELIMITER.to_string(),
                known: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl Parser for EnvParser {
        fn set_delimiter(&mut self, delimiter: &str) {
            self.delimiter = delimiter.to_string();
        }

        async fn keys(&mut self, mut keys: mpsc::Receiver<String>) -> Result<()> {
            self.known.clear();
            while let Some(key) = keys.recv().await {
                let env = key.replace(&self.delimiter, "_").to_uppercase();
                self.known.insert(env, key);
            }
            Ok(())
        }

        async fn values(&mut self) -> Result<Values> {
            let pairs: Vec<(String, Value)> = self
                .vars
                .iter()
                .filter_map(|(name, value)| {
                    let rest = name.strip_prefix(&self.prefix)?;
                    let key = match self.known.get(rest) {
                        Some(key) => key.clone(),
                        None => rest.replace('_', &self.delimiter),
                    };
                    Some((key, Value::String(value.clone())))
                })
                .collect();
            Ok(stream(pairs))
        }
    }

    // -- Misbehaving and observing parsers --------------------------------------

    /// Fails in `values` with the given message.
    pub struct FailingParser(pub String);

    #[async_trait]
    impl Parser for FailingParser {
        async fn values(&mut self) -> Result<Values> {
            Err(LayerfigError::parser(self.0.clone()))
        }
    }

    /// Records what the loader hands it and yields nothing.
    #[derive(Default)]
    pub struct RecordingParser {
        pub delimiter: String,
        pub keys: Vec<String>,
    }

    #[async_trait]
    impl Parser for RecordingParser {
        fn set_delimiter(&mut self, delimiter: &str) {
            self.delimiter = delimiter.to_string();
        }

        async fn keys(&mut self, mut keys: mpsc::Receiver<String>) -> Result<()> {
            while let Some(key) = keys.recv().await {
                self.keys.push(key);
            }
            Ok(())
        }

        async fn values(&mut self) -> Result<Values> {
            Ok(stream(Vec::new()))
        }
    }

    // -- Notifier driven by the test --------------------------------------------

    /// A notifier over an in-memory source, paired with a [`Trigger`].
    pub struct MemoryNotifier {
        parser: Arc<Mutex<MemoryParser>>,
        signals: Option<mpsc::Receiver<Result<()>>>,
        close_error: Option<String>,
    }

    /// Test-side handle: edit the source and signal changes.
    pub struct Trigger {
        parser: Arc<Mutex<MemoryParser>>,
        signals: mpsc::Sender<Result<()>>,
    }

    impl MemoryNotifier {
        pub fn new(parser: MemoryParser) -> (Self, Trigger) {
            let parser = Arc::new(Mutex::new(parser));
            let (tx, rx) = mpsc::channel(8);
            let notifier = Self {
                parser: Arc::clone(&parser),
                signals: Some(rx),
                close_error: None,
            };
            (notifier, Trigger { parser, signals: tx })
        }

        /// Make `close` fail with `message`.
        pub fn failing_close(mut self, message: &str) -> Self {
            self.close_error = Some(message.to_string());
            self
        }
    }

    impl Trigger {
        pub fn set(&self, key: &str, value: impl Into<Value>) {
            self.parser.lock().add(key, value);
        }

        /// Signal a change. Ignored once the worker is gone.
        pub async fn fire(&self) {
            let _ = self.signals.send(Ok(())).await;
        }

        /// Signal a watch failure.
        pub async fn fail(&self, message: &str) {
            let _ = self
                .signals
                .send(Err(LayerfigError::parser(message.to_string())))
                .await;
        }
    }

    #[async_trait]
    impl Parser for MemoryNotifier {
        async fn values(&mut self) -> Result<Values> {
            let mut parser = self.parser.lock().clone();
            parser.values().await
        }
    }

    #[async_trait]
    impl Notifier for MemoryNotifier {
        fn notify(&mut self) -> mpsc::Receiver<Result<()>> {
            self.signals.take().unwrap_or_else(|| mpsc::channel(1).1)
        }

        async fn close(&mut self) -> Result<()> {
            match self.close_error.take() {
                Some(message) => Err(LayerfigError::parser(message)),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn env_parser_maps_underscores_through_known_keys() {
        let mut parser = EnvParser::new(
            "APP",
            &[
                ("APP_DATABASE_POOL_SIZE", "9"),
                ("APP_HOST", "h"),
                ("OTHER_HOST", "x"),
            ],
        );
        let (tx, rx) = mpsc::channel(4);
        tx.send("database.pool_size".to_string()).await.unwrap();
        tx.send("host".to_string()).await.unwrap();
        drop(tx);
        parser.keys(rx).await.unwrap();

        let mut values = parser.values().await.unwrap();
        let mut got = Vec::new();
        while let Some(pair) = values.recv().await {
            got.push(pair);
        }
        assert_eq!(
            got,
            vec![
                ("database.pool_size".to_string(), Value::from("9")),
                ("host".to_string(), Value::from("h")),
            ]
        );
    }

    #[tokio::test]
    async fn json_parser_flattens_objects() {
        let mut parser = JsonParser::default();
        parser.set_delimiter("__");
        let text = r#"{"a": {"b": 1, "c": [{"d": true}]}, "e": -2.5}"#;
        let mut values = parser.values(&mut text.as_bytes()).unwrap();
        let mut got = Vec::new();
        while let Some(pair) = values.recv().await {
            got.push(pair);
        }
        let mut entry = BTreeMap::new();
        entry.insert("d".to_string(), Value::Bool(true));
        assert_eq!(
            got,
            vec![
                ("a__b".to_string(), Value::I64(1)),
                ("a__c".to_string(), Value::Seq(vec![Value::Map(entry)])),
                ("e".to_string(), Value::F64(-2.5)),
            ]
        );
    }

    #[test]
    fn json_parser_rejects_non_objects() {
        let mut parser = JsonParser::default();
        assert!(matches!(
            parser.values(&mut "[1]".as_bytes()),
            Err(LayerfigError::Parser(_))
        ));
    }
}
