//! Chunked Upload Module
//!
//! Resumable, out-of-order chunked uploads with:
//! - Expiring session records in a keyed store
//! - Per-chunk staging files, reassembled in index order
//! - Publication of the final artifact to an S3-compatible bucket
//! - Cleanup on every terminal outcome, including silent expiry
//!
//! Protocol Flow:
//! 1. First chunk arrives without a token: a session is created and its id
//!    is returned to the client as a cookie
//! 2. Remaining chunks arrive in any order, carrying the token
//! 3. The client flags the request that should finalize; once every chunk is
//!    present the server compiles, publishes and discards the session
//! 4. Sessions never finalized are reaped when their record expires

pub mod binding;
pub mod cleanup;
pub mod compiler;
pub mod publisher;
pub mod reaper;
pub mod registry;
pub mod service;
pub mod staging;
pub mod types;

pub use binding::IdentityBindings;
pub use cleanup::Cleanup;
pub use compiler::{CompiledArtifact, Compiler};
pub use publisher::{content_type_for, PublishedObject, Publisher, METADATA_KEY};
pub use reaper::{Reaper, ReaperHandle};
pub use registry::SessionRegistry;
pub use service::UploadService;
pub use staging::{ArtifactLayout, StagingArea};
pub use types::*;
