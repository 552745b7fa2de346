//! Key formatting.
//!
//! Canonical keys are formatted once when the destination is flattened and
//! once for every key a parser yields, so lookups are symmetric. Parsers must
//! hand over keys unformatted.

/// Formats a canonical key. Implementations must be idempotent and must not
/// move or remove delimiters.
pub trait Formatter: Send + Sync {
    fn format(&self, key: &str, delimiter: &str) -> String;
}

impl<F> Formatter for F
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    fn format(&self, key: &str, delimiter: &str) -> String {
        self(key, delimiter)
    }
}

/// Keeps keys exactly as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseSensitive;

impl Formatter for CaseSensitive {
    fn format(&self, key: &str, _delimiter: &str) -> String {
        key.to_string()
    }
}

/// Lowercases every path segment. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitive;

impl Formatter for CaseInsensitive {
    fn format(&self, key: &str, delimiter: &str) -> String {
        if delimiter.is_empty() {
            return key.to_lowercase();
        }
        key.split(delimiter)
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &["foo", "FOO.Bar", "a.B.c", "Fizz_Buzz.x", "..", "ÄÖ.Ü"];

    #[test]
    fn case_sensitive_is_identity() {
        for key in KEYS {
            assert_eq!(CaseSensitive.format(key, "."), *key);
        }
    }

    #[test]
    fn case_insensitive_lowercases_segments() {
        assert_eq!(CaseInsensitive.format("FIZZ.BUZZ", "."), "fizz.buzz");
        assert_eq!(CaseInsensitive.format("Foo::Bar", "::"), "foo::bar");
    }

    #[test]
    fn formatters_are_idempotent() {
        let formatters: [&dyn Formatter; 2] = [&CaseSensitive, &CaseInsensitive];
        for f in formatters {
            for key in KEYS {
                let once = f.format(key, ".");
                assert_eq!(f.format(&once, "."), once);
            }
        }
    }

    #[test]
    fn delimiters_keep_their_positions() {
        for key in KEYS {
            let formatted = CaseInsensitive.format(key, ".");
            let before: Vec<usize> = key.match_indices('.').map(|(i, _)| i).collect();
            let after: Vec<usize> = formatted.match_indices('.').map(|(i, _)| i).collect();
            assert_eq!(before.len(), after.len());
            if key.is_ascii() {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn closures_are_formatters() {
        let upper = |key: &str, _: &str| key.to_uppercase();
        assert_eq!(upper.format("a.b", "."), "A.B");
    }
}
