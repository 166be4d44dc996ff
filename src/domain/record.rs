// ============================================================
// Layer 3 — InstructionRecord
// ============================================================
// One line of the JSON-lines dataset:
//
//   {"instruction": "Name a prime number.", "response": "7"}
//
// Both fields are required strings. Anything else on the line
// (ids, categories, ...) is ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    /// The prompt the model sees
    pub instruction: String,

    /// The text the model is trained to produce
    pub response: String,
}

impl InstructionRecord {
    pub fn new(instruction: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            response:    response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_fields_are_ignored() {
        let r: InstructionRecord =
            serde_json::from_str(r#"{"id": 4, "instruction": "a", "response": "b"}"#).unwrap();
        assert_eq!(r, InstructionRecord::new("a", "b"));
    }

    #[test]
    fn test_missing_response_is_rejected() {
        let r = serde_json::from_str::<InstructionRecord>(r#"{"instruction": "a"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn test_non_string_field_is_rejected() {
        let r = serde_json::from_str::<InstructionRecord>(r#"{"instruction": "a", "response": 3}"#);
        assert!(r.is_err());
    }
}
