//! Pipes
//!
//! A pipe parses one input surface (body, query string or path parameters)
//! into a typed value, validates it and stores it on the context. Any failure
//! ends the request with 400.
//!
//! # Examples
//!
//! ```rust
//! use serde::Deserialize;
//! use trellis::pipe::{self, FieldError, Validate};
//!
//! #[derive(Deserialize)]
//! struct Search {
//!     name: Option<String>,
//! }
//!
//! impl Validate for Search {
//!     fn validate(&self) -> Vec<FieldError> {
//!         match self.name {
//!             Some(_) => Vec::new(),
//!             None => vec![FieldError::new("name", "name is required")],
//!         }
//!     }
//! }
//!
//! let search = pipe::query::<Search>();
//! # let _ = search;
//! ```

use crate::context::Ctx;
use crate::exception::HttpException;
use crate::http::Request;
use crate::middleware::{HttpResult, Middleware, Next};
use crate::provider::Injectable;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Which part of the request a pipe reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeSource {
    Body,
    Query,
    Param,
}

/// One invalid field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every invalid field of one value, displayed one message per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                f.write_str("\n")?;
            }
            f.write_str(&err.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Field validation for pipe targets. The default accepts everything.
pub trait Validate {
    fn validate(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

/// A chain step that parses and validates one input surface
pub trait Pipe: Send + Sync + 'static {
    fn source(&self) -> PipeSource;

    /// Parse, validate and store the typed value on `ctx`
    fn apply(&self, ctx: &mut Ctx) -> HttpResult;
}

/// Deserializes `T` from one input surface with serde
pub struct DtoPipe<T> {
    source: PipeSource,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DtoPipe<T>
where
    T: DeserializeOwned + Validate,
{
    pub fn new(source: PipeSource) -> Self {
        Self {
            source,
            _marker: PhantomData,
        }
    }

    /// Read the surface into `T`
    pub fn parse(&self, request: &Request) -> Result<T, HttpException> {
        let parsed = match self.source {
            PipeSource::Body => {
                if request.body().is_empty() {
                    serde_json::from_value(Value::Object(Map::new()))
                } else {
                    serde_json::from_slice(request.body())
                }
            }
            PipeSource::Query => from_strings(
                request
                    .query_pairs()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            ),
            PipeSource::Param => from_strings(
                request
                    .params()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            ),
        };

        parsed.map_err(|e| HttpException::bad_request(e.to_string()))
    }

    /// Check the parsed value's fields
    pub fn validate(&self, value: &T) -> Result<(), ValidationErrors> {
        let errors = value.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

// Query and path values arrive as strings. A target with numeric or boolean
// fields gets a second attempt with scalar-looking values converted.
fn from_strings<'a, T, I>(pairs: I) -> serde_json::Result<T>
where
    T: DeserializeOwned,
    I: Iterator<Item = (&'a str, &'a str)> + Clone,
{
    let raw: Map<String, Value> = pairs
        .clone()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();

    match serde_json::from_value(Value::Object(raw)) {
        Ok(value) => Ok(value),
        Err(first) => {
            let coerced: Map<String, Value> = pairs
                .map(|(k, v)| (k.to_string(), coerce(v)))
                .collect();
            serde_json::from_value(Value::Object(coerced)).map_err(|_| first)
        }
    }
}

fn coerce(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        if n.is_finite() {
            return Value::from(n);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

impl<T> Pipe for DtoPipe<T>
where
    T: DeserializeOwned + Validate + Injectable,
{
    fn source(&self) -> PipeSource {
        self.source
    }

    fn apply(&self, ctx: &mut Ctx) -> HttpResult {
        let value = self.parse(ctx.request())?;
        self.validate(&value)
            .map_err(|errors| HttpException::bad_request(errors.to_string()))?;
        ctx.set_pipe_value(value);
        Ok(())
    }
}

/// Parse the JSON body into `T`
pub fn body<T: DeserializeOwned + Validate + Injectable>() -> DtoPipe<T> {
    DtoPipe::new(PipeSource::Body)
}

/// Parse the query string into `T`
pub fn query<T: DeserializeOwned + Validate + Injectable>() -> DtoPipe<T> {
    DtoPipe::new(PipeSource::Query)
}

/// Parse the path parameters into `T`
pub fn param<T: DeserializeOwned + Validate + Injectable>() -> DtoPipe<T> {
    DtoPipe::new(PipeSource::Param)
}

pub(crate) struct PipeLayer {
    pipes: Vec<Arc<dyn Pipe>>,
}

impl PipeLayer {
    pub(crate) fn new(pipes: Vec<Arc<dyn Pipe>>) -> Self {
        Self { pipes }
    }
}

impl Middleware for PipeLayer {
    fn handle(&self, ctx: &mut Ctx, next: Next<'_>) -> HttpResult {
        for pipe in &self.pipes {
            pipe.apply(ctx)?;
        }
        next.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_ctx;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Signup {
        email: Option<String>,
        age: Option<u32>,
    }

    impl Validate for Signup {
        fn validate(&self) -> Vec<FieldError> {
            let mut errors = Vec::new();
            if self.email.is_none() {
                errors.push(FieldError::new("email", "email is required"));
            }
            if self.age.is_none() {
                errors.push(FieldError::new("age", "age is required"));
            }
            errors
        }
    }

    #[derive(Debug, Deserialize)]
    struct Page {
        page: u32,
    }

    impl Validate for Page {}

    #[test]
    fn test_body_pipe() {
        let mut ctx = test_ctx(
            Request::new("POST", "/").with_json(json!({"email": "a@b.c", "age": 30})),
        );
        body::<Signup>().apply(&mut ctx).unwrap();

        let signup = ctx.pipe_value::<Signup>().unwrap();
        assert_eq!(signup.age, Some(30));
    }

    #[test]
    fn test_validation_messages_joined() {
        let mut ctx = test_ctx(Request::new("POST", "/").with_json(json!({})));
        let err = body::<Signup>().apply(&mut ctx).unwrap_err();

        assert_eq!(err.status, 400);
        assert_eq!(err.message, "email is required\nage is required");
        assert_eq!(
            err.body(),
            json!({"error": ["email is required", "age is required"]})
        );
        assert!(ctx.pipe_value::<Signup>().is_none());
    }

    #[test]
    fn test_query_numbers_coerced() {
        let mut ctx = test_ctx(Request::new("GET", "/?page=3"));
        query::<Page>().apply(&mut ctx).unwrap();
        assert_eq!(ctx.pipe_value::<Page>().unwrap().page, 3);
    }

    #[test]
    fn test_malformed_body() {
        let mut ctx = test_ctx(Request::new("POST", "/").with_body("{not json"));
        let err = body::<Signup>().apply(&mut ctx).unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_param_pipe_reads_path_params() {
        let mut request = Request::new("GET", "/users/7");
        request.set_params([("page".to_string(), "7".to_string())].into());
        let mut ctx = test_ctx(request);

        let pipe = param::<Page>();
        assert_eq!(pipe.source(), PipeSource::Param);
        pipe.apply(&mut ctx).unwrap();
        assert_eq!(ctx.pipe_value::<Page>().unwrap().page, 7);
    }
}
