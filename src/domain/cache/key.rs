//! Cache key construction

use std::fmt::Display;

/// Delimiter between key segments
pub const KEY_DELIMITER: char = ':';

/// Builds a cache key as `{prefix}{namespace}:{part}:{part}...`
///
/// Empty parts are dropped rather than kept as empty segments. Parts are not
/// escaped, so a part containing the delimiter can collide with a longer part
/// sequence; callers own that.
pub fn build_key<I, S>(prefix: &str, namespace: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::with_capacity(prefix.len() + namespace.len() + 16);
    key.push_str(prefix);
    key.push_str(namespace);
    key.push(KEY_DELIMITER);

    let mut first = true;

    for part in parts {
        let part = part.as_ref();

        if part.is_empty() {
            continue;
        }

        if !first {
            key.push(KEY_DELIMITER);
        }

        key.push_str(part);
        first = false;
    }

    key
}

/// Fluent builder for keys with optional segments
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    namespace: String,
    parts: Vec<String>,
}

impl CacheKeyBuilder {
    /// Starts a key in the given namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            parts: Vec::new(),
        }
    }

    /// Appends a segment
    pub fn part(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Appends a segment when present; `None` is dropped
    pub fn maybe_part<T: Display>(self, part: Option<T>) -> Self {
        match part {
            Some(part) => self.part(part),
            None => self,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Builds the key under the given prefix
    pub fn build(&self, prefix: &str) -> String {
        build_key(prefix, &self.namespace, &self.parts)
    }
}
