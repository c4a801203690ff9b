use serde_json::Value;

use crate::ExecutionError;

/// Name of the only field of the request body.
pub const SCRIPT_FIELD: &str = "script";

/// A request that passed all the checks of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Source code of the untrusted script.
    pub script: String,
}

/// Check the body of a request, extracting the script to run.
///
/// The checks are performed in this order, the first failing one is reported:
/// - the body is an object with a `script` string field;
/// - the script is not only whitespace;
/// - the script is at most `max_bytes` bytes long;
/// - the script does not contain NUL bytes.
pub fn validate(body: &Value, max_bytes: usize) -> Result<ExecutionRequest, ExecutionError> {
    let script = match body.get(SCRIPT_FIELD) {
        Some(script) => script,
        None => {
            return Err(ExecutionError::Validation(format!(
                "JSON must include key \"{SCRIPT_FIELD}\"."
            )))
        }
    };
    let script = match script.as_str() {
        Some(script) if !script.chars().all(is_blank) => script,
        _ => {
            return Err(ExecutionError::Validation(format!(
                "\"{SCRIPT_FIELD}\" must be a non-empty string."
            )))
        }
    };
    if script.len() > max_bytes {
        return Err(ExecutionError::Validation(format!(
            "\"{SCRIPT_FIELD}\" is too large (max {max_bytes} bytes)."
        )));
    }
    if script.contains('\0') {
        return Err(ExecutionError::Validation(
            "Script contains NUL bytes, which are not allowed.".to_string(),
        ));
    }
    Ok(ExecutionRequest {
        script: script.to_string(),
    })
}

/// Whitespace as Python's `str.isspace()` sees it: Unicode `White_Space` plus the ASCII
/// information separators.
fn is_blank(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}
