// Library root
// -----------
// This crate exposes the uploader as a library; the binary (`main.rs`)
// wires configuration, logging and the CLI flags around it.
//
// Module responsibilities:
// - `size`: parses human-readable sizes ("500MB") for the part size.
// - `config`: loads `upload.env` and the environment into a `Config`.
// - `logging`: builds the tracing subscriber handed to the run.
// - `api`: HTTP calls to the drive backend, behind the `DriveApi` trait.
// - `pacer`: retry with backoff for control-plane calls.
// - `part`: splits a file into parts and uploads a single part.
// - `upload`: uploads one file: parts in parallel, then finalize.
// - `walker`: mirrors a local directory tree, skipping existing files.
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod pacer;
pub mod part;
pub mod size;
pub mod upload;
pub mod walker;

#[cfg(test)]
mod fake;

pub use api::{ApiClient, DriveApi};
pub use config::Config;
pub use error::UploadError;
pub use upload::{UploadOptions, Uploader};
pub use walker::{DirectoryWalker, WalkSummary};
