//! sift - hybrid retrieval engine
//!
//! Runs vector, full-text and tag search over a chunked document store and
//! fuses the three rankings with Reciprocal Rank Fusion. Embedding calls go
//! through a circuit breaker, relative timeframe phrases in queries become
//! concrete date filters, and a failing branch degrades the search instead of
//! failing it.

pub mod breaker;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod retrieval;
pub mod storage;
pub mod timeframe;

pub use engine::Sift;
pub use error::{Result, SiftError};
