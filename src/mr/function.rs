//! Built-in `map`/`reduce` applications.
//!
//! The real `map`/`reduce` pair is an opaque external collaborator; these
//! two are the stand-ins a worker binary links against, selected by name
//! at startup.

use super::kv::KeyValue;

pub type MapFn = fn(filename: &str, contents: &str) -> Vec<KeyValue>;
pub type ReduceFn = fn(key: &str, values: &[String]) -> String;

/// Word count: one `(word, "1")` pair per whitespace-delimited token.
pub mod wc {
    use super::*;

    pub fn map(_filename: &str, contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect()
    }

    pub fn reduce(_key: &str, values: &[String]) -> String {
        values.len().to_string()
    }
}

/// Indexer: for each distinct word, the sorted, deduplicated list of
/// filenames it appears in, comma-joined.
pub mod indexer {
    use super::*;

    pub fn map(filename: &str, contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, filename))
            .collect()
    }

    pub fn reduce(_key: &str, values: &[String]) -> String {
        let mut files: Vec<&str> = values.iter().map(String::as_str).collect();
        files.sort_unstable();
        files.dedup();
        format!("{} {}", files.len(), files.join(","))
    }
}

/// Resolves a built-in application by name for the worker CLI's `--app` flag.
pub fn lookup(name: &str) -> Option<(MapFn, ReduceFn)> {
    match name {
        "wc" => Some((wc::map, wc::reduce)),
        "indexer" => Some((indexer::map, indexer::reduce)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wc_counts_repeated_words() {
        let kvs = wc::map("f", "a b a");
        assert_eq!(kvs.len(), 3);
        let count = kvs.iter().filter(|kv| kv.key == "a").count();
        assert_eq!(wc::reduce("a", &vec!["1".to_string(); count]), "2");
    }

    #[test]
    fn indexer_dedupes_filenames() {
        let out = indexer::reduce(
            "word",
            &["f1".to_string(), "f2".to_string(), "f1".to_string()],
        );
        assert_eq!(out, "2 f1,f2");
    }

    #[test]
    fn lookup_rejects_unknown_app() {
        assert!(lookup("does-not-exist").is_none());
    }
}
