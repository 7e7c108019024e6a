//! librag - local retrieval engine
//!
//! Keeps a folder of documents chunked, embedded and searchable in memory,
//! persists the index as JSON lines (optionally gzip), keeps it in step with
//! the folder in the background, and answers questions with retrieved
//! context through a local Ollama server.

pub mod chat;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod ingest;
pub mod library;
pub mod retrieval;
pub mod storage;
pub mod watch;

pub use engine::{Backends, Engine, LoadOptions};
pub use error::{LibragError, Result};
