pub mod config;
pub mod copy;
pub mod filter;
pub mod image;
pub mod prometheus;
pub mod registry;
pub mod secrets;
pub mod signals;
pub mod skopeo;
pub mod webhook;

use crate::config::settings::Settings;
use std::sync::OnceLock;

// Singleton settings for all application
pub fn settings() -> &'static Settings {
    static CONFIG: OnceLock<Settings> = OnceLock::new();
    CONFIG.get_or_init(|| Settings::new().unwrap())
}
