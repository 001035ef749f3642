//! Structural cast between untyped documents and typed values.
//!
//! Wire payloads travel as [`serde_json::Value`] documents. A structural
//! cast serialises the source and deserialises it into the target type:
//! fields present in the document but absent from the target are dropped,
//! fields the target requires but the document lacks are a decode error.
//!
//! Both the typed client [`call`](crate::client::AgentHandle::call) and the
//! server's per-operation argument decoding route through here, so the
//! conversion stays side-effect-free and allocates only the intermediate
//! document.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{AppError, Result};

/// Convert any serialisable value into an untyped document.
///
/// # Errors
///
/// Returns [`AppError::Cast`] if the value cannot be represented as JSON
/// (e.g. a map with non-string keys).
pub fn to_document<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| AppError::Cast(format!("serialise: {e}")))
}

/// Convert an untyped document into a concrete type.
///
/// # Errors
///
/// Returns [`AppError::Cast`] if a field required by `T` is missing from
/// the document or has an incompatible shape.
pub fn from_document<T: DeserializeOwned>(doc: serde_json::Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| AppError::Cast(format!("deserialise: {e}")))
}

/// Re-shape one typed value into another through the document form.
///
/// Equivalent to `from_document(to_document(value)?)` — the marshal-then-
/// unmarshal conversion used when a handler's output must become a caller's
/// expected type.
///
/// # Errors
///
/// Returns [`AppError::Cast`] on either leg of the conversion.
pub fn restructure<I: Serialize, O: DeserializeOwned>(value: &I) -> Result<O> {
    from_document(to_document(value)?)
}
