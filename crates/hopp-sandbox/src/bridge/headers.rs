//! Case-insensitive header multimap.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Ordered header collection with case-insensitive names.
///
/// Names are stored lowercased. Appending to an existing name joins the
/// values with `", "`, so every name appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().position(|(k, _)| *k == name)
    }

    /// Add a value, joining with an existing one.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => {
                let existing = &mut self.entries[i].1;
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self
                .entries
                .push((name.to_ascii_lowercase(), value.to_string())),
        }
    }

    /// Replace any existing value.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = value.to_string(),
            None => self
                .entries
                .push((name.to_ascii_lowercase(), value.to_string())),
        }
    }

    /// The value for `name`, or `None` when absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Whether `name` is present.
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove `name` if present.
    pub fn delete(&mut self, name: &str) {
        if let Some(i) = self.position(name) {
            self.entries.remove(i);
        }
    }

    /// `(name, value)` pairs in insertion order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no header is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v.as_ref());
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

// Accepts either `[[name, value], ...]` or `{ name: value }`.
impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a list of [name, value] pairs or a name -> value map")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((k, v)) = seq.next_element::<(String, String)>()? {
                    headers.append(&k, &v);
                }
                Ok(headers)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((k, v)) = map.next_entry::<String, String>()? {
                    headers.append(&k, &v);
                }
                Ok(headers)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Headers, E> {
                Ok(Headers::new())
            }
        }

        deserializer.deserialize_any(HeadersVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let mut h = Headers::new();
        h.set("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert!(h.has("CONTENT-TYPE"));
        h.delete("content-TYPE");
        assert!(h.get("Content-Type").is_none());
    }

    #[test]
    fn append_joins_values() {
        let mut h = Headers::new();
        h.append("Accept", "text/html");
        h.append("accept", "application/json");
        assert_eq!(h.get("Accept"), Some("text/html, application/json"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn set_replaces_and_keeps_position() {
        let mut h: Headers = [("a", "1"), ("b", "2")].into_iter().collect();
        h.set("A", "3");
        assert_eq!(
            h.entries(),
            &[("a".to_string(), "3".to_string()), ("b".into(), "2".into())]
        );
    }

    #[test]
    fn deserializes_pairs_and_maps() {
        let from_pairs: Headers =
            serde_json::from_str(r#"[["X-Id","1"],["x-id","2"]]"#).unwrap();
        assert_eq!(from_pairs.get("x-id"), Some("1, 2"));

        let from_map: Headers = serde_json::from_str(r#"{"Accept":"*/*"}"#).unwrap();
        assert_eq!(from_map.get("accept"), Some("*/*"));

        assert_eq!(
            serde_json::to_string(&from_map).unwrap(),
            r#"[["accept","*/*"]]"#
        );
    }
}
