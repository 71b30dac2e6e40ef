//! Request validator
//!
//! Checks the shape of a search body before anything reaches the worker.

use serde_json::Value;
use thiserror::Error;

/// A search request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Query text, never empty after trimming
    pub query: String,
    /// Requested platform, exactly as sent
    pub platform: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Query parameter must be a string")]
    QueryNotString,

    #[error("Query parameter must not be empty")]
    EmptyQuery,

    #[error("Filters must be an object")]
    FiltersNotObject,

    #[error("Platform filter must be a string")]
    PlatformNotString,
}

/// Validate a raw JSON search body
pub fn validate(body: &Value) -> Result<SearchRequest, ValidationError> {
    let query = match body.get("query") {
        Some(Value::String(q)) => q,
        _ => return Err(ValidationError::QueryNotString),
    };
    if query.trim().is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let platform = match body.get("filters") {
        None | Some(Value::Null) => None,
        Some(Value::Object(filters)) => match filters.get("platform") {
            None | Some(Value::Null) => None,
            Some(Value::String(p)) => Some(p.clone()),
            Some(_) => return Err(ValidationError::PlatformNotString),
        },
        Some(_) => return Err(ValidationError::FiltersNotObject),
    };

    Ok(SearchRequest {
        query: query.clone(),
        platform,
    })
}
