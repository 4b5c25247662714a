//! Tool settings
//!
//! Loaded with precedence: CLI > env > file > defaults. The CLI layer applies
//! its flags on top of the builder returned here.

mod builder;
mod env;
mod file;

use std::path::Path;

pub use builder::{LoggingSettings, Settings, SettingsBuilder};

use crate::error::Result;

/// Load settings from the first settings file found, then the environment
pub fn load_settings() -> Result<SettingsBuilder> {
    let mut builder = SettingsBuilder::new();

    if let Some(path) = file::find_settings_file() {
        tracing::debug!(path = %path.display(), "Loading settings file");
        builder = file::load_from_file(&path, builder)?;
    }

    env::load_from_env(builder)
}

/// Load settings from an explicit file, then the environment
pub fn load_settings_from_path(path: &Path) -> Result<SettingsBuilder> {
    let builder = file::load_from_file(path, SettingsBuilder::new())?;
    env::load_from_env(builder)
}
