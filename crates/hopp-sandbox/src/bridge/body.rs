//! Host-side body storage for Response and Request shadows.
//!
//! A shadow object in the VM carries only its body id. The bytes and the
//! consumed flag live here so that `bodyUsed` and the single-consumption rule
//! are decided on the host, synchronously, at the moment a read starts.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::marshal::HostValue;

/// Failures reported to the script when reading a body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    /// The body was already read (or handed to `fetch`).
    #[error("Body has already been consumed")]
    AlreadyUsed,
    /// No body is registered under this id.
    #[error("unknown body id {0}")]
    Unknown(u32),
    /// `json()` was called on bytes that do not parse.
    #[error("{0}")]
    Json(String),
}

impl BodyError {
    /// Name of the JS error class the bootstrap raises for this failure.
    pub fn js_class(&self) -> &'static str {
        match self {
            BodyError::AlreadyUsed => "BodyConsumedError",
            BodyError::Unknown(_) => "TypeError",
            BodyError::Json(_) => "JSONError",
        }
    }
}

/// How a script asked to read a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyKind {
    /// `text()`
    Text,
    /// `json()`
    Json,
    /// `arrayBuffer()`
    ArrayBuffer,
    /// `blob()`
    Blob,
    /// `formData()`
    FormData,
}

impl std::str::FromStr for BodyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(BodyKind::Text),
            "json" => Ok(BodyKind::Json),
            "arrayBuffer" => Ok(BodyKind::ArrayBuffer),
            "blob" => Ok(BodyKind::Blob),
            "formData" => Ok(BodyKind::FormData),
            other => Err(format!("unknown body reader '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
struct BodySlot {
    bytes: Rc<[u8]>,
    used: bool,
    content_type: Option<String>,
}

/// A body's bytes and content type, detached from the registry.
#[derive(Debug, Clone)]
pub struct BodySnapshot {
    /// Raw bytes.
    pub bytes: Rc<[u8]>,
    /// Content type recorded at registration.
    pub content_type: Option<String>,
}

/// Arena of bodies for one run.
#[derive(Debug, Default)]
pub struct BodyRegistry {
    next_id: u32,
    slots: HashMap<u32, BodySlot>,
}

impl BodyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a body and return its id.
    pub fn register(&mut self, bytes: Vec<u8>, content_type: Option<String>) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.slots.insert(
            id,
            BodySlot {
                bytes: bytes.into(),
                used: false,
                content_type,
            },
        );
        id
    }

    /// Check and flip the consumed flag in one step.
    pub fn mark_used(&mut self, id: u32) -> Result<(), BodyError> {
        let slot = self.slots.get_mut(&id).ok_or(BodyError::Unknown(id))?;
        if slot.used {
            return Err(BodyError::AlreadyUsed);
        }
        slot.used = true;
        Ok(())
    }

    /// Whether the body has been consumed.
    pub fn is_used(&self, id: u32) -> Result<bool, BodyError> {
        self.slots
            .get(&id)
            .map(|slot| slot.used)
            .ok_or(BodyError::Unknown(id))
    }

    /// Register a second handle over the same bytes. The clone inherits the
    /// consumed flag, so cloning a used body yields a used body.
    pub fn clone_slot(&mut self, id: u32) -> Result<u32, BodyError> {
        let slot = self.slots.get(&id).ok_or(BodyError::Unknown(id))?.clone();
        self.next_id += 1;
        let new_id = self.next_id;
        self.slots.insert(new_id, slot);
        Ok(new_id)
    }

    /// Bytes and content type, independent of the consumed flag.
    pub fn snapshot(&self, id: u32) -> Result<BodySnapshot, BodyError> {
        self.slots
            .get(&id)
            .map(|slot| BodySnapshot {
                bytes: slot.bytes.clone(),
                content_type: slot.content_type.clone(),
            })
            .ok_or(BodyError::Unknown(id))
    }

    /// Number of registered bodies.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Decode body bytes for the requested reader.
pub fn decode_body(snapshot: &BodySnapshot, kind: BodyKind) -> Result<HostValue, BodyError> {
    let bytes = &snapshot.bytes[..];
    match kind {
        BodyKind::Text => Ok(HostValue::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        BodyKind::Json => {
            let text = String::from_utf8_lossy(bytes);
            serde_json::from_str::<serde_json::Value>(&text)
                .map(HostValue::from)
                .map_err(|e| BodyError::Json(format!("Failed to parse response body as JSON: {e}")))
        }
        BodyKind::ArrayBuffer => Ok(HostValue::Bytes(bytes.to_vec())),
        BodyKind::Blob => {
            let mut blob = IndexMap::new();
            blob.insert(
                "type".to_string(),
                HostValue::String(snapshot.content_type.clone().unwrap_or_default()),
            );
            blob.insert("bytes".to_string(), HostValue::Bytes(bytes.to_vec()));
            Ok(HostValue::Object(blob))
        }
        BodyKind::FormData => Ok(HostValue::Array(
            url::form_urlencoded::parse(bytes)
                .map(|(k, v)| {
                    HostValue::Array(vec![
                        HostValue::String(k.into_owned()),
                        HostValue::String(v.into_owned()),
                    ])
                })
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_consumption_is_rejected() {
        let mut reg = BodyRegistry::new();
        let id = reg.register(b"hello".to_vec(), None);
        assert!(!reg.is_used(id).unwrap());
        reg.mark_used(id).unwrap();
        assert!(reg.is_used(id).unwrap());
        assert_eq!(reg.mark_used(id), Err(BodyError::AlreadyUsed));
        assert_eq!(
            BodyError::AlreadyUsed.to_string(),
            "Body has already been consumed"
        );
    }

    #[test]
    fn clone_shares_bytes_and_copies_flag() {
        let mut reg = BodyRegistry::new();
        let id = reg.register(b"abc".to_vec(), Some("text/plain".into()));
        let fresh = reg.clone_slot(id).unwrap();
        reg.mark_used(id).unwrap();
        assert!(!reg.is_used(fresh).unwrap());
        reg.mark_used(fresh).unwrap();

        let stale = reg.clone_slot(id).unwrap();
        assert!(reg.is_used(stale).unwrap());
        assert!(Rc::ptr_eq(
            &reg.snapshot(id).unwrap().bytes,
            &reg.snapshot(stale).unwrap().bytes
        ));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut reg = BodyRegistry::new();
        assert_eq!(reg.mark_used(9), Err(BodyError::Unknown(9)));
        assert_eq!(reg.clone_slot(9), Err(BodyError::Unknown(9)));
    }

    #[test]
    fn json_decodes_or_reports_json_error() {
        let mut reg = BodyRegistry::new();
        let ok = reg.register(br#"{"id":1}"#.to_vec(), None);
        let bad = reg.register(b"not json".to_vec(), None);

        let value = decode_body(&reg.snapshot(ok).unwrap(), BodyKind::Json).unwrap();
        assert_eq!(value.into_json(), serde_json::json!({ "id": 1 }));

        let err = decode_body(&reg.snapshot(bad).unwrap(), BodyKind::Json).unwrap_err();
        assert!(matches!(err, BodyError::Json(_)));
        assert_eq!(err.js_class(), "JSONError");
    }

    #[test]
    fn form_data_parses_urlencoded_pairs() {
        let mut reg = BodyRegistry::new();
        let id = reg.register(
            b"a=1&b=hello+world".to_vec(),
            Some("application/x-www-form-urlencoded".into()),
        );
        let value = decode_body(&reg.snapshot(id).unwrap(), BodyKind::FormData).unwrap();
        assert_eq!(
            value.into_json(),
            serde_json::json!([["a", "1"], ["b", "hello world"]])
        );
    }

    #[test]
    fn blob_carries_content_type() {
        let mut reg = BodyRegistry::new();
        let id = reg.register(vec![1, 2], Some("image/png".into()));
        let value = decode_body(&reg.snapshot(id).unwrap(), BodyKind::Blob).unwrap();
        assert_eq!(
            value.into_json(),
            serde_json::json!({ "type": "image/png", "bytes": [1, 2] })
        );
    }
}
