//! Command decoding.
//!
//! Turns an inbound HTTP request (path or JSON body) into one or more
//! structured commands. Decoding is pure parsing: it never touches the
//! network and is deterministic for a given input.
//!
//! Three request shapes exist, matching the hosted REST API:
//!
//! - single command, body-encoded: `POST /` with `["SET", "foo", "bar"]`
//! - single command, path-encoded: `/SET/foo/bar` (segments percent-decoded)
//! - batches: `POST /pipeline` and `POST /multi-exec` with an array of
//!   command-arrays

use serde_json::Value as JsonValue;

use crate::error::GatewayError;

/// One Redis command: the verb followed by its arguments, all opaque strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<String>,
}

impl Command {
    /// Builds a command from non-empty parts.
    ///
    /// # Errors
    /// Returns `MalformedRequest` when `parts` is empty or the verb is blank.
    pub fn new(parts: Vec<String>) -> Result<Self, GatewayError> {
        match parts.first() {
            Some(name) if !name.is_empty() => Ok(Self { parts }),
            _ => Err(GatewayError::MalformedRequest(
                "empty command".to_string(),
            )),
        }
    }

    /// Liveness probe issued by the pool before reusing an idle connection.
    pub(crate) fn ping() -> Self {
        Self {
            parts: vec!["PING".to_string()],
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.parts[0]
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.parts[1..]
    }
}

/// How a batch of commands is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Exactly one command, one envelope in the response.
    Single,
    /// Independent commands in order; a failure does not abort the rest.
    Pipeline,
    /// All-or-nothing MULTI/EXEC execution.
    Transaction,
}

/// A decoded request: ordered commands plus their execution mode.
#[derive(Debug, Clone)]
pub struct CommandBatch {
    pub mode: BatchMode,
    pub commands: Vec<Command>,
}

impl CommandBatch {
    pub fn single(command: Command) -> Self {
        Self {
            mode: BatchMode::Single,
            commands: vec![command],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Decodes a body-encoded single command (`["SET", "foo", "bar"]`).
///
/// # Errors
/// `MalformedRequest` on invalid JSON, a non-array body, an empty array, or
/// non-scalar elements.
pub fn decode_single_body(body: &[u8]) -> Result<CommandBatch, GatewayError> {
    let json: JsonValue = serde_json::from_slice(body)
        .map_err(|e| GatewayError::MalformedRequest(format!("invalid JSON body: {e}")))?;
    Ok(CommandBatch::single(decode_command(&json)?))
}

/// Decodes a path-encoded single command (`/SET/foo/bar`).
///
/// # Errors
/// `MalformedRequest` when the path carries no command name or a segment is
/// not valid percent-encoded UTF-8.
pub fn decode_single_path(path: &str) -> Result<CommandBatch, GatewayError> {
    let parts = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| {
                    GatewayError::MalformedRequest(format!("invalid path segment: {segment}"))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CommandBatch::single(Command::new(parts)?))
}

/// Decodes a pipeline or transaction body: a JSON array of command-arrays.
/// An empty outer array is valid and yields a zero-command batch.
///
/// # Errors
/// `MalformedRequest` on invalid JSON, a non-array body, or any inner element
/// that is not itself a command array.
pub fn decode_batch(body: &[u8], mode: BatchMode) -> Result<CommandBatch, GatewayError> {
    let json: JsonValue = serde_json::from_slice(body)
        .map_err(|e| GatewayError::MalformedRequest(format!("invalid JSON body: {e}")))?;

    let JsonValue::Array(entries) = json else {
        return Err(GatewayError::MalformedRequest(
            "expected a JSON array of commands".to_string(),
        ));
    };

    let commands = entries
        .iter()
        .map(decode_command)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CommandBatch { mode, commands })
}

/// One command-array → `Command`. Scalar non-string elements (numbers,
/// booleans) are stringified, matching the hosted API's lenient encoding.
fn decode_command(json: &JsonValue) -> Result<Command, GatewayError> {
    let JsonValue::Array(elements) = json else {
        return Err(GatewayError::MalformedRequest(
            "command must be a JSON array".to_string(),
        ));
    };

    let parts = elements
        .iter()
        .map(|element| match element {
            JsonValue::String(s) => Ok(s.clone()),
            JsonValue::Number(n) => Ok(n.to_string()),
            JsonValue::Bool(b) => Ok(b.to_string()),
            other => Err(GatewayError::MalformedRequest(format!(
                "command argument must be a scalar, got {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Command::new(parts)
}
