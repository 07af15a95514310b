pub mod config;
pub mod slug;
