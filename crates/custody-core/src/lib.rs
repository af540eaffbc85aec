//! Core abstractions for evidence custody: the case data model, metadata
//! store contracts and the object store contract.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod model;
pub mod records;
pub mod storage;
