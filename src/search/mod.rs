//! Search request handling around the worker: input validation before the
//! gateway, platform filtering after it.

pub mod filter;
pub mod validator;

pub use filter::filter;
pub use validator::{validate, ValidationError};
