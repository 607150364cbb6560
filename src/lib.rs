//! Chunk Upload Server
//!
//! Resumable chunked file uploads: chunks arrive in any order under an
//! expiring session, are reassembled once the client asks to finalize, and
//! the result is published to an S3-compatible bucket.

pub mod clients;
pub mod config;
pub mod error;
pub mod kv;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
