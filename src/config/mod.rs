// Configuration module for p2volley
// Handles loading relay and client settings from TOML file

pub mod loader;
pub mod types;

pub use loader::{create_default_config, get_config_path, load_config};
pub use types::{ClientConfig, Config, RelayConfig};
