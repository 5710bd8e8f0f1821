//! Pack definitions: embedded household presets plus custom packs from disk.

pub mod embedded;
pub mod loader;
pub mod schema;

pub use loader::{load_custom_pack, load_pack, validate_pack};
pub use schema::{CategoryRule, PackConfig, PackSources};
