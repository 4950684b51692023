//! Documents stored in collections.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Monotonically assigned identifier of a document within a collection.
///
/// Surrogate ids are independent of storage position, never reused, and
/// may have gaps left by removed documents.
pub type SurrogateId = u64;

/// Field name of the surrogate id in serialized documents.
pub const ID_FIELD: &str = "$loki";

/// Field name of the document metadata in serialized documents.
pub const META_FIELD: &str = "meta";

/// Bookkeeping attached to every document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Number of updates applied since insertion.
    pub revision: u64,
}

/// A JSON document with its surrogate id.
///
/// Serializes as the body object with two reserved fields added:
/// `$loki` (the surrogate id) and `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$loki")]
    id: SurrogateId,
    #[serde(default)]
    meta: DocumentMeta,
    #[serde(flatten)]
    body: Map<String, Value>,
}

impl Document {
    /// Creates a document from its parts. Reserved fields in `body` are dropped.
    #[must_use]
    pub fn new(id: SurrogateId, meta: DocumentMeta, mut body: Map<String, Value>) -> Self {
        strip_reserved(&mut body);
        Self { id, meta, body }
    }

    /// Returns the surrogate id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SurrogateId {
        self.id
    }

    /// Returns the document metadata.
    #[must_use]
    pub fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    /// Returns the document body, without reserved fields.
    #[must_use]
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Returns a field of the body.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Consumes the document, returning its body.
    #[must_use]
    pub fn into_body(self) -> Map<String, Value> {
        self.body
    }

    pub(crate) fn replace_body(&mut self, mut body: Map<String, Value>) {
        strip_reserved(&mut body);
        self.body = body;
        self.meta.revision += 1;
    }
}

/// Converts a JSON value into a document body.
pub(crate) fn into_body(value: Value) -> CoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::invalid_document(format!(
            "expected a JSON object, got {}",
            kind(&other)
        ))),
    }
}

fn strip_reserved(body: &mut Map<String, Value>) {
    body.remove(ID_FIELD);
    body.remove(META_FIELD);
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        into_body(value).unwrap()
    }

    #[test]
    fn serializes_with_reserved_fields() {
        let doc = Document::new(3, DocumentMeta::default(), body(json!({"name": "ada"})));
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"$loki": 3, "meta": {"revision": 0}, "name": "ada"}));
    }

    #[test]
    fn deserializes_reserved_fields_out_of_body() {
        let doc: Document =
            serde_json::from_value(json!({"$loki": 9, "meta": {"revision": 2}, "age": 36}))
                .unwrap();
        assert_eq!(doc.id(), 9);
        assert_eq!(doc.meta().revision, 2);
        assert_eq!(doc.body().len(), 1);
        assert_eq!(doc.get("age"), Some(&json!(36)));
    }

    #[test]
    fn missing_meta_defaults() {
        let doc: Document = serde_json::from_value(json!({"$loki": 1})).unwrap();
        assert_eq!(doc.meta().revision, 0);
    }

    #[test]
    fn reserved_fields_are_stripped_from_body() {
        let doc = Document::new(
            1,
            DocumentMeta::default(),
            body(json!({"$loki": 99, "meta": 1, "x": 1})),
        );
        assert_eq!(doc.id(), 1);
        assert_eq!(doc.body().len(), 1);
    }

    #[test]
    fn replace_body_bumps_revision() {
        let mut doc = Document::new(1, DocumentMeta::default(), body(json!({"x": 1})));
        doc.replace_body(body(json!({"x": 2})));
        assert_eq!(doc.meta().revision, 1);
        assert_eq!(doc.get("x"), Some(&json!(2)));
    }

    #[test]
    fn non_object_body_rejected() {
        let err = into_body(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }
}
