//! Opaque ledger-entry metadata.
//!
//! `ledger_entries.metadata` is schemaless at write time: writers stamp in
//! whatever keys their role needs (batch id, fee role, royalty generation,
//! webhook event id...) and readers who set a key are the only ones
//! expected to read it back. Money values never live here — they live in
//! the `amount_cents`/`fee_cents`/`net_cents` columns.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Metadata(Map::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn batch_id(batch_id: &str) -> Self {
        Metadata::new().with("batch_id", json!(batch_id))
    }

    pub fn role(mut self, role: &str) -> Self {
        self.0.insert("role".to_string(), json!(role));
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.0)
    }

    pub fn from_json(v: Value) -> Self {
        match v {
            Value::Object(m) => Metadata(m),
            _ => Metadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let meta = Metadata::batch_id("b-1").role("fee").with("generation", 2);
        let json = meta.into_json();
        let back = Metadata::from_json(json);
        assert_eq!(back.get_str("batch_id"), Some("b-1"));
        assert_eq!(back.get_str("role"), Some("fee"));
        assert_eq!(back.get_u64("generation"), Some(2));
    }

    #[test]
    fn non_object_json_yields_empty_metadata() {
        let back = Metadata::from_json(json!("not an object"));
        assert_eq!(back.get_str("anything"), None);
    }
}
