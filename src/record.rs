//! The unit of data moved by the exporter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One search hit, carried through the pipeline without inspection.
///
/// Serializes exactly like the wrapped JSON value, so a record written to an
/// export file is byte-for-byte the hit the server returned (modulo key order,
/// which is sorted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Records returned by a single scroll call, in server order.
pub type Batch = Vec<Record>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_transparently() {
        let record = Record::new(json!({"_id": "1", "_source": {"b": 2, "a": 1}}));
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text, r#"{"_id":"1","_source":{"a":1,"b":2}}"#);
    }

    #[test]
    fn deserializes_any_json_shape() {
        let record: Record = serde_json::from_str("[1, \"two\", null]").unwrap();
        assert_eq!(record.as_value(), &json!([1, "two", null]));
    }
}
