// Common types and utilities shared across the application

pub mod embedding;
pub mod entity_ids;
pub mod id;
pub mod utils;

pub use embedding::Embeddable;
pub use entity_ids::*;
pub use id::{Id, V4, V7};
pub use utils::generate_content_hash;
