//! Encryption-at-rest building blocks for the custody pipeline.
//! AES-256-GCM with keys sourced from the environment or the OS keyring,
//! plus the per-invocation staging area the pipeline encrypts into.

pub mod encryptor;
pub mod key_provider;
pub mod staging;
