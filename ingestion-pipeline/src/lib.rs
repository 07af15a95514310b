#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod indexer;
pub mod loader;
pub mod pipeline;

pub use pipeline::{list_albums, DefaultLoadServices, LoadPipeline, LoadServices};
