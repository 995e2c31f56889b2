//! RESP reply → REST JSON envelope encoding.
//!
//! Pure, order-preserving transform. Type table:
//! integer → number, bulk string → string (lossy UTF-8), simple status →
//! string, nil → null, array → nested JSON array.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::command::BatchMode;
use crate::executor::ExecutionResult;

/// One per-command envelope: `{"result": …}` or `{"error": …}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Result { result: JsonValue },
    Error { error: String },
}

/// Whole response body: the lone envelope for `Single`, an array of
/// envelopes (input order) for `Pipeline` and `Transaction`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Single(Envelope),
    Batch(Vec<Envelope>),
}

/// Maps one RESP value into its JSON representation.
#[must_use]
pub fn encode_value(value: &redis::Value) -> JsonValue {
    match value {
        redis::Value::Nil => JsonValue::Null,
        redis::Value::Int(i) => json!(i),
        redis::Value::Data(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Bulk(items) => JsonValue::Array(items.iter().map(encode_value).collect()),
        redis::Value::Status(status) => JsonValue::String(status.clone()),
        redis::Value::Okay => JsonValue::String("OK".to_string()),
    }
}

#[must_use]
pub fn encode_result(result: &ExecutionResult) -> Envelope {
    match result {
        ExecutionResult::Reply(value) => Envelope::Result {
            result: encode_value(value),
        },
        ExecutionResult::Failure(message) => Envelope::Error {
            error: message.clone(),
        },
    }
}

#[must_use]
pub fn encode_response(mode: BatchMode, results: &[ExecutionResult]) -> ResponseBody {
    match mode {
        BatchMode::Single => results.first().map_or_else(
            || ResponseBody::Batch(Vec::new()),
            |result| ResponseBody::Single(encode_result(result)),
        ),
        BatchMode::Pipeline | BatchMode::Transaction => {
            ResponseBody::Batch(results.iter().map(encode_result).collect())
        }
    }
}
