//! The outgoing request as pre-request scripts see and edit it, plus the
//! cookie list.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `key`/`value` row with an enabled flag, as used for headers, query
/// params and request variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Name.
    pub key: String,
    /// Value, possibly containing `<<var>>` templates.
    pub value: String,
    /// Disabled rows are kept but not sent.
    #[serde(default = "enabled")]
    pub active: bool,
}

fn enabled() -> bool {
    true
}

impl KeyValue {
    /// An active row.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            active: true,
        }
    }
}

/// Request body with its content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    /// `None` means no body.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Raw body text.
    #[serde(default)]
    pub body: Option<String>,
}

/// Snapshot of the request a pre-request script may modify.
///
/// Fields scripts cannot touch (auth, collection metadata) are carried
/// through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    /// HTTP method.
    pub method: String,
    /// URL, possibly templated.
    pub endpoint: String,
    /// Header rows.
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    /// Query parameter rows.
    #[serde(default)]
    pub params: Vec<KeyValue>,
    /// Body.
    #[serde(default)]
    pub body: RequestBody,
    /// Request-scoped variables.
    #[serde(default)]
    pub request_variables: Vec<KeyValue>,
    /// Everything else, passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            method: "GET".into(),
            endpoint: String::new(),
            headers: Vec::new(),
            params: Vec::new(),
            body: RequestBody::default(),
            request_variables: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// One edit a script applies through `hopp.request`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestMutation {
    /// `hopp.request.setUrl(url)`
    SetUrl {
        /// New endpoint.
        url: String,
    },
    /// `hopp.request.setMethod(method)`
    SetMethod {
        /// New method, uppercased on apply.
        method: String,
    },
    /// `hopp.request.setHeader(key, value)`
    SetHeader {
        /// Header name, matched case-insensitively.
        key: String,
        /// Header value.
        value: String,
    },
    /// `hopp.request.removeHeader(key)`
    RemoveHeader {
        /// Header name, matched case-insensitively.
        key: String,
    },
    /// `hopp.request.setParam(key, value)`
    SetParam {
        /// Param name.
        key: String,
        /// Param value.
        value: String,
    },
    /// `hopp.request.removeParam(key)`
    RemoveParam {
        /// Param name.
        key: String,
    },
    /// `hopp.request.setBody({ contentType, body })`
    #[serde(rename_all = "camelCase")]
    SetBody {
        /// New content type; `None` clears the body.
        content_type: Option<String>,
        /// New body text.
        body: Option<String>,
    },
    /// `hopp.request.setVariable(key, value)`
    SetVariable {
        /// Variable name.
        key: String,
        /// Variable value.
        value: String,
    },
}

fn upsert(rows: &mut Vec<KeyValue>, key: &str, value: &str, case_insensitive: bool) {
    let matches = |row: &KeyValue| {
        if case_insensitive {
            row.key.eq_ignore_ascii_case(key)
        } else {
            row.key == key
        }
    };
    match rows.iter_mut().find(|row| matches(row)) {
        Some(row) => {
            row.value = value.to_string();
            row.active = true;
        }
        None => rows.push(KeyValue::new(key, value)),
    }
}

impl RequestSnapshot {
    /// Apply one mutation in place.
    pub fn apply(&mut self, mutation: RequestMutation) {
        match mutation {
            RequestMutation::SetUrl { url } => self.endpoint = url,
            RequestMutation::SetMethod { method } => self.method = method.to_ascii_uppercase(),
            RequestMutation::SetHeader { key, value } => {
                upsert(&mut self.headers, &key, &value, true)
            }
            RequestMutation::RemoveHeader { key } => {
                self.headers.retain(|h| !h.key.eq_ignore_ascii_case(&key))
            }
            RequestMutation::SetParam { key, value } => {
                upsert(&mut self.params, &key, &value, false)
            }
            RequestMutation::RemoveParam { key } => self.params.retain(|p| p.key != key),
            RequestMutation::SetBody { content_type, body } => {
                self.body = match content_type {
                    Some(ct) => RequestBody {
                        content_type: Some(ct),
                        body,
                    },
                    None => RequestBody::default(),
                }
            }
            RequestMutation::SetVariable { key, value } => {
                upsert(&mut self.request_variables, &key, &value, false)
            }
        }
    }
}

/// Cookies as an opaque list. `None` means cookies are not available to
/// this run, which scripts see as `null` from `getAll()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar(pub Option<Vec<Value>>);

impl CookieJar {
    /// The current list, if cookies are enabled.
    pub fn get_all(&self) -> Option<&[Value]> {
        self.0.as_deref()
    }

    /// Replace the whole list.
    pub fn set_all(&mut self, cookies: Vec<Value>) {
        self.0 = Some(cookies);
    }

    /// Empty the list, keeping cookies enabled.
    pub fn clear(&mut self) {
        self.0 = Some(Vec::new());
    }

    /// Move the list out for the run result.
    pub fn into_inner(self) -> Option<Vec<Value>> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutations_edit_the_snapshot() {
        let mut req = RequestSnapshot {
            endpoint: "<<base>>/users".into(),
            headers: vec![KeyValue::new("Accept", "*/*")],
            ..Default::default()
        };
        req.apply(RequestMutation::SetMethod {
            method: "post".into(),
        });
        req.apply(RequestMutation::SetHeader {
            key: "accept".into(),
            value: "application/json".into(),
        });
        req.apply(RequestMutation::SetHeader {
            key: "X-Trace".into(),
            value: "1".into(),
        });
        req.apply(RequestMutation::SetParam {
            key: "page".into(),
            value: "2".into(),
        });
        req.apply(RequestMutation::RemoveHeader {
            key: "x-trace".into(),
        });

        assert_eq!(req.method, "POST");
        assert_eq!(req.headers, vec![KeyValue::new("Accept", "application/json")]);
        assert_eq!(req.params, vec![KeyValue::new("page", "2")]);
    }

    #[test]
    fn mutation_wire_shape() {
        let m: RequestMutation = serde_json::from_value(json!({
            "op": "setBody",
            "contentType": "application/json",
            "body": "{}"
        }))
        .unwrap();
        let mut req = RequestSnapshot::default();
        req.apply(m);
        assert_eq!(req.body.content_type.as_deref(), Some("application/json"));

        let clear: RequestMutation =
            serde_json::from_value(json!({ "op": "setBody", "contentType": null, "body": null }))
                .unwrap();
        req.apply(clear);
        assert_eq!(req.body, RequestBody::default());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let raw = json!({
            "method": "GET",
            "endpoint": "https://x.test",
            "auth": { "authType": "bearer", "token": "<<token>>" },
        });
        let req: RequestSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(req.extra["auth"]["authType"], "bearer");
        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["auth"]["token"], "<<token>>");
        assert_eq!(back["requestVariables"], json!([]));
    }

    #[test]
    fn cookie_jar_distinguishes_disabled_from_empty() {
        let mut jar = CookieJar::default();
        assert!(jar.get_all().is_none());
        jar.clear();
        assert_eq!(jar.get_all(), Some(&[][..]));
        jar.set_all(vec![json!({ "name": "sid", "value": "1" })]);
        assert_eq!(jar.into_inner().unwrap().len(), 1);
    }
}
