//! Request-time failures
//!
//! Every layer of a route chain returns `Result<(), HttpException>`. An
//! exception short-circuits the rest of the chain and is rendered as a JSON
//! body with its status.

use crate::error::Error;
use crate::http::Response;
use serde_json::{Value, json};
use thiserror::Error;

/// An HTTP status plus a human-readable message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}: {message}")]
pub struct HttpException {
    pub status: u16,
    pub message: String,
    unexpected: bool,
}

impl HttpException {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            unexpected: false,
        }
    }

    /// A 500 for a failure no layer chose to report; the dispatcher hands
    /// it to the error handler like a panic
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            unexpected: true,
            ..Self::internal(message)
        }
    }

    #[inline]
    pub fn is_unexpected(&self) -> bool {
        self.unexpected
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }

    /// `{"error": message}`, or `{"error": [line, ..]}` when the message
    /// spans several lines (one per invalid field)
    pub fn body(&self) -> Value {
        if self.message.contains('\n') {
            let lines: Vec<&str> = self
                .message
                .lines()
                .filter(|line| !line.is_empty())
                .collect();
            json!({ "error": lines })
        } else {
            json!({ "error": self.message })
        }
    }

    /// Overwrite `res` with this exception
    pub fn write_to(&self, res: &mut Response) {
        res.set_status(self.status);
        res.set_payload(self.body());
    }
}

impl From<Error> for HttpException {
    fn from(err: Error) -> Self {
        Self::unexpected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_body() {
        let err = HttpException::forbidden("you can not access");
        assert_eq!(err.status, 403);
        assert_eq!(err.body(), json!({"error": "you can not access"}));
    }

    #[test]
    fn test_multi_line_body() {
        let err = HttpException::bad_request("name is required\nage must be positive");
        assert_eq!(
            err.body(),
            json!({"error": ["name is required", "age must be positive"]})
        );
    }

    #[test]
    fn test_from_error() {
        let err: HttpException = Error::not_found("db").into();
        assert_eq!(err.status, 500);
        assert_eq!(err.message, "Provider not found: db");
        assert!(err.is_unexpected());
        assert!(!HttpException::internal("chosen").is_unexpected());
    }

    #[test]
    fn test_write_to() {
        let mut res = Response::new();
        HttpException::service_unavailable("timeout").write_to(&mut res);
        assert_eq!(res.status(), 503);
        assert_eq!(res.payload(), Some(&json!({"error": "timeout"})));
    }
}
