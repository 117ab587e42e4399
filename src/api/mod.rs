//! REST API module.
//!
//! Contains the registry routes' handlers. Success bodies are bare JSON;
//! failures use the error envelope from `errors`.

mod servers;

pub use servers::*;

/// Handler result: a JSON response or an `AppError` envelope.
pub type ApiResult<T> = Result<T, crate::errors::AppError>;
