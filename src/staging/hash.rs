use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

pub const CONTENT_ID_LEN: usize = 8;

/// Fixed-length hex fingerprint of a parameter section.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(raw: &str) -> Option<Self> {
        let ok = raw.len() == CONTENT_ID_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit());
        ok.then(|| ContentId(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentId::parse(&value).ok_or_else(|| format!("invalid content id {value:?}"))
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_value(&map[key], out);
            }
            out.push('}');
        }
        // scalars already have a single JSON rendering
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint of a section's values, independent of key order.
pub fn content_id(section: &Map<String, Value>) -> ContentId {
    let canonical = canonical_json(&Value::Object(section.clone()));
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest
        .iter()
        .take(CONTENT_ID_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();
    ContentId(hex)
}
