//! Filesystem adapters.

mod repository;

pub use repository::{DEFAULT_SETTINGS_FILE, JsonFileServerDescriptorRepository};
