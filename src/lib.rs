//! # Firestore Admin for Rust
//!
//! Library provides the server-side execution core for Google Firestore:
//! - Reads, queries and aggregations consumed as streams from the gRPC API;
//! - Atomic write batches and read-then-write transactions with bounded retry;
//! - A rate-limited, automatically batched bulk writer for large ingestions;
//! - Data bundle building for client hydration;
//! - Own Serde serializer mapping Rust structures onto Firestore values;
//! - Full async based on Tokio runtime and the
//!   [gcloud-sdk library](https://github.com/abdolence/gcloud-sdk-rs) client
//!   that automatically detects tokens or GKE environment;

#![allow(clippy::new_without_default)]

pub mod errors;
pub use errors::{FirestoreError, FirestoreErrorCode};

pub type FirestoreResult<T> = Result<T, FirestoreError>;

mod firestore_value;
pub use firestore_value::*;

mod resource_path;
pub use resource_path::*;

pub mod timestamp_utils;

mod firestore_serde;
pub use firestore_serde::*;

mod db;
pub use db::*;
