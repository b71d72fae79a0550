//! The uniform success/failure container returned across process boundaries.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status code of a successful [`Outcome`].
pub const STATUS_OK: u16 = 200;

/// Status code of a failed [`Outcome`].
pub const STATUS_ERROR: u16 = 100;

/// A tagged result that is safe to serialize and hand to another process.
///
/// `status == 200` means `data` holds the payload and `message` is empty.
/// Any other status carries a non-empty `message` and no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T = Value> {
    status: u16,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Outcome<T> {
    /// A successful outcome carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
            data: Some(data),
        }
    }

    /// A failed outcome with status [`STATUS_ERROR`].
    pub fn error(message: impl Into<String>) -> Self {
        Self::msg(STATUS_ERROR, message)
    }

    /// A data-less failure with an explicit status.
    ///
    /// Only [`ok`](Self::ok) may produce status 200, so `STATUS_OK` is
    /// remapped to [`STATUS_ERROR`]. An empty message is replaced by a
    /// generic one.
    pub fn msg(status: u16, message: impl Into<String>) -> Self {
        let status = if status == STATUS_OK { STATUS_ERROR } else { status };
        let mut message = message.into();
        if message.is_empty() {
            message = format!("operation failed with status {status}");
        }
        Self {
            status,
            message,
            data: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Consumes the outcome, returning the payload on success.
    pub fn into_data(self) -> Option<T> {
        self.data
    }

    /// Converts into a standard `Result`, using the message as the error.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(self.message)
        }
    }

    /// Maps the payload of a successful outcome.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            status: self.status,
            message: self.message,
            data: self.data.map(f),
        }
    }

    /// Re-types a failed outcome, dropping nothing but the (absent) payload.
    pub fn cast<U>(self) -> Outcome<U> {
        Outcome {
            status: self.status,
            message: self.message,
            data: None,
        }
    }
}

impl<T: Serialize> Outcome<T> {
    /// Serializes into a JSON value for transport.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<T: Serialize> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{{ status: {}, message: {:?} }}", self.status, self.message),
        }
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_carries_data() {
        let outcome = Outcome::ok(42);
        assert!(outcome.is_ok());
        assert_eq!(outcome.status(), 200);
        assert_eq!(outcome.message(), "");
        assert_eq!(outcome.data(), Some(&42));
    }

    #[test]
    fn test_error_has_message_and_no_data() {
        let outcome: Outcome<i32> = Outcome::error("plugin not found");
        assert!(!outcome.is_ok());
        assert_eq!(outcome.status(), 100);
        assert_eq!(outcome.message(), "plugin not found");
        assert!(outcome.data().is_none());
    }

    #[test]
    fn test_msg_never_leaves_failure_message_empty() {
        let outcome: Outcome<()> = Outcome::msg(500, "");
        assert!(!outcome.message().is_empty());
    }

    #[test]
    fn test_msg_with_ok_status_is_a_failure() {
        let outcome: Outcome<()> = Outcome::msg(STATUS_OK, "nothing to report");
        assert!(!outcome.is_ok());
        assert_eq!(outcome.status(), STATUS_ERROR);
        assert_eq!(outcome.message(), "nothing to report");
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn test_display_is_pretty_json() {
        let text = Outcome::ok("done").to_string();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], 200);
        assert_eq!(parsed["data"], "done");
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_from_result() {
        let failed: Outcome<u8> = Err::<u8, _>("boom").into();
        assert_eq!(failed.message(), "boom");
        let fine: Outcome<u8> = Ok::<u8, String>(1).into();
        assert_eq!(fine.into_data(), Some(1));
    }
}
