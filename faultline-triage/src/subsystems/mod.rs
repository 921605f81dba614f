pub mod categorize;
pub mod embedder;
pub mod fetch;
pub mod localize;
