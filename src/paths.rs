//! Locations of settings and proxy storage.

use std::path::{Path, PathBuf};

/// Environment override for the settings directory.
pub const CONFIG_DIR_ENV: &str = "SEQRENDER_CONFIG_DIR";

/// Where settings live: CLI dir, then env var, then the platform config dir.
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var → None (platform default)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }

    /// Settings directory.
    ///
    /// Platform paths:
    /// - Linux: ~/.config/seqrender
    /// - macOS: ~/Library/Application Support/seqrender
    /// - Windows: %APPDATA%\seqrender
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        dirs_next::config_dir()
            .map(|dir| dir.join("seqrender"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }
}

/// Proxy file for a source image: `<dir>/proxy_<pct>/<file name>`.
pub fn proxy_image_path(proxy_dir: &Path, percent: u32, source: &Path) -> Option<PathBuf> {
    let name = source.file_name()?;
    Some(proxy_dir.join(format!("proxy_{}", percent)).join(name))
}

/// Proxy frame for a movie: `<dir>/proxy_<pct>/<stem>/<frame:06>.jpg`.
pub fn proxy_movie_frame_path(proxy_dir: &Path, percent: u32, source: &Path, frame: i32) -> Option<PathBuf> {
    let stem = source.file_stem()?;
    Some(
        proxy_dir
            .join(format!("proxy_{}", percent))
            .join(stem)
            .join(format!("{:06}.jpg", frame)),
    )
}
