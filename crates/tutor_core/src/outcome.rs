//! crates/tutor_core/src/outcome.rs
//!
//! Tagged result for every "ask the service, else fall back" step.

use std::fmt;

/// Why a service-backed step could not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    ServiceError(String),
    EmptyResponse,
    Malformed(String),
    Insufficient { got: usize, needed: usize },
    EmptyContext,
    UnrecognizedToken(String),
    NotInContext,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::ServiceError(e) => write!(f, "service error: {e}"),
            FallbackReason::EmptyResponse => f.write_str("empty response"),
            FallbackReason::Malformed(e) => write!(f, "malformed output: {e}"),
            FallbackReason::Insufficient { got, needed } => {
                write!(f, "insufficient output: got {got}, needed {needed}")
            }
            FallbackReason::EmptyContext => f.write_str("no retrieval context"),
            FallbackReason::UnrecognizedToken(t) => write!(f, "unrecognized token '{t}'"),
            FallbackReason::NotInContext => f.write_str("answer not in context"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Fallback(FallbackReason),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Fallback(r) => Outcome::Fallback(r),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => f(v),
            Outcome::Fallback(r) => Outcome::Fallback(r),
        }
    }

    /// Resolves to the service value, or to `fallback(reason)`.
    pub fn or_fallback(self, fallback: impl FnOnce(&FallbackReason) -> T) -> T {
        match self {
            Outcome::Ok(v) => v,
            Outcome::Fallback(reason) => fallback(&reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(v) => Some(v),
            Outcome::Fallback(_) => None,
        }
    }
}

impl<T> From<Result<T, FallbackReason>> for Outcome<T> {
    fn from(result: Result<T, FallbackReason>) -> Self {
        match result {
            Ok(v) => Outcome::Ok(v),
            Err(r) => Outcome::Fallback(r),
        }
    }
}
