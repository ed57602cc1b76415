//! Per-document write outcomes

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Value as JsonValue};

use crate::error::DocError;
use crate::rev::RevId;

/// Successful write of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOk {
    /// Document id
    pub id: String,
    /// Revision the write produced (or re-confirmed)
    pub rev: RevId,
}

impl Serialize for WriteOk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("ok", &true)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("rev", &self.rev)?;
        map.end()
    }
}

/// One slot of a bulk write's results sequence
pub type WriteResult = std::result::Result<WriteOk, DocError>;

impl WriteOk {
    /// `{"ok": true, "id": .., "rev": ..}`
    pub fn to_json(&self) -> JsonValue {
        json!({"ok": true, "id": self.id, "rev": self.rev.to_string()})
    }
}

/// Render a results sequence as JSON (`{ok,id,rev}` or `{error,reason,id}` per slot).
///
/// Always one element per slot.
pub fn results_to_json(results: &[WriteResult]) -> JsonValue {
    JsonValue::Array(
        results
            .iter()
            .map(|slot| match slot {
                Ok(ok) => ok.to_json(),
                Err(err) => err.to_json(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_ok_shape() {
        let ok = WriteOk {
            id: "a".into(),
            rev: RevId::new(1, "x"),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "id": "a", "rev": "1-x"}));
    }

    #[test]
    fn test_results_to_json_mixes_slots() {
        let results: Vec<WriteResult> = vec![
            Ok(WriteOk {
                id: "a".into(),
                rev: RevId::new(2, "y"),
            }),
            Err(DocError::MissingDoc { id: "b".into() }),
        ];
        let json = results_to_json(&results);
        assert_eq!(json[0]["ok"], true);
        assert_eq!(json[1]["error"], "not_found");
        assert_eq!(json[1]["reason"], "deleted");
    }

    #[test]
    fn test_results_to_json_keeps_one_element_per_slot() {
        let results: Vec<WriteResult> = vec![
            Err(DocError::InvalidArgument {
                id: "a".into(),
                name: "f".into(),
                reason: "Attachment is not a valid base64 string".into(),
            }),
            Ok(WriteOk {
                id: "b".into(),
                rev: RevId::new(1, "x"),
            }),
            Err(DocError::Conflict { id: "c".into() }),
        ];
        let json = results_to_json(&results);
        let slots = json.as_array().unwrap();
        assert_eq!(slots.len(), results.len());
        assert_eq!(slots[0], serde_json::to_value(results[0].as_ref().unwrap_err()).unwrap());
        assert_eq!(slots[1], serde_json::to_value(results[1].as_ref().unwrap()).unwrap());
        assert_eq!(slots[2]["id"], "c");
    }
}
