//! Request and response bodies of the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WELCOME_MESSAGE: &str = "Welcome to LangChain API with Groq";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Welcome {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Loc {
    Field(String),
    Offset(usize),
}

/// One validation failure, pydantic style.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub loc: Vec<Loc>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationErrorBody {
    pub detail: Vec<ValidationIssue>,
}

impl ValidationErrorBody {
    fn single(loc: Vec<Loc>, msg: &str, kind: &str) -> Self {
        Self {
            detail: vec![ValidationIssue {
                loc,
                msg: msg.to_string(),
                kind: kind.to_string(),
            }],
        }
    }
}

fn body_loc(field: Option<&str>) -> Vec<Loc> {
    let mut loc = vec![Loc::Field("body".to_string())];
    if let Some(field) = field {
        loc.push(Loc::Field(field.to_string()));
    }
    loc
}

/// Byte offset of a serde_json error, for the `loc` of `json_invalid`.
fn error_offset(bytes: &[u8], err: &serde_json::Error) -> usize {
    let line_start = match err.line() {
        0 | 1 => 0,
        line => bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(line - 2)
            .map_or(bytes.len(), |(i, _)| i + 1),
    };
    (line_start + err.column().saturating_sub(1)).min(bytes.len())
}

/// Decode a `/ask` body. Extra fields are ignored.
pub fn parse_question(bytes: &[u8]) -> Result<Question, ValidationErrorBody> {
    if bytes.is_empty() {
        return Err(ValidationErrorBody::single(
            body_loc(None),
            "Field required",
            "missing",
        ));
    }

    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        let mut loc = body_loc(None);
        loc.push(Loc::Offset(error_offset(bytes, &e)));
        ValidationErrorBody::single(loc, "JSON decode error", "json_invalid")
    })?;

    let Value::Object(mut fields) = value else {
        return Err(ValidationErrorBody::single(
            body_loc(None),
            "Input should be a valid dictionary or object to extract fields from",
            "model_attributes_type",
        ));
    };

    match fields.remove("question") {
        Some(Value::String(question)) => Ok(Question { question }),
        Some(_) => Err(ValidationErrorBody::single(
            body_loc(Some("question")),
            "Input should be a valid string",
            "string_type",
        )),
        None => Err(ValidationErrorBody::single(
            body_loc(Some("question")),
            "Field required",
            "missing",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(body: &[u8]) -> String {
        parse_question(body).unwrap_err().detail[0].kind.clone()
    }

    #[test]
    fn test_valid_question() {
        let q = parse_question(br#"{"question":"why","extra":1}"#).unwrap();
        assert_eq!(q.question, "why");
    }

    #[test]
    fn test_empty_question_accepted() {
        assert_eq!(parse_question(br#"{"question":""}"#).unwrap().question, "");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(kind(b"{}"), "missing");
        assert_eq!(kind(br#"{"question":null}"#), "string_type");
        assert_eq!(kind(br#"{"question":7}"#), "string_type");
        assert_eq!(kind(br#"["question"]"#), "model_attributes_type");
        assert_eq!(kind(b"{\"question\":"), "json_invalid");
        assert_eq!(kind(b"  "), "json_invalid");
    }

    #[test]
    fn test_missing_field_shape() {
        let body = serde_json::to_value(parse_question(b"{}").unwrap_err()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"detail":[{"loc":["body","question"],"msg":"Field required","type":"missing"}]})
        );
    }

    #[test]
    fn test_empty_body_is_missing() {
        let body = serde_json::to_value(parse_question(b"").unwrap_err()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"detail":[{"loc":["body"],"msg":"Field required","type":"missing"}]})
        );
    }

    #[test]
    fn test_json_invalid_offset_after_newline() {
        let err = parse_question(b"{\"question\":\n").unwrap_err();
        assert_eq!(err.detail[0].loc[1], Loc::Offset(13));
    }

    #[test]
    fn test_json_invalid_offset() {
        let err = parse_question(b"{\"question\": oops}").unwrap_err();
        assert_eq!(err.detail[0].loc[0], Loc::Field("body".to_string()));
        assert!(matches!(err.detail[0].loc[1], Loc::Offset(n) if n <= 18));
    }
}
