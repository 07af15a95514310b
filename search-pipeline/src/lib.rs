#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod cleanup;
pub mod delivery;
pub mod engine;
pub mod pipeline;
pub mod render;

pub use pipeline::{DefaultSearchServices, SearchPipeline, SearchServices};
