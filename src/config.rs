use std::fs;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ClothError, Result};
use crate::storage::models::TagData;

pub struct AppPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub images_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub config_file: PathBuf,
    pub ui_state_file: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

impl AppPaths {
    /// Uses `base` when given, otherwise `~/.cloth-stock`.
    pub fn resolve(base: Option<PathBuf>) -> Result<Self> {
        match base {
            Some(base) => Ok(Self::from_base(base)),
            None => {
                let home = dirs::home_dir().ok_or_else(|| {
                    ClothError::Config("Could not determine home directory".to_string())
                })?;
                Ok(Self::from_base(home.join(".cloth-stock")))
            }
        }
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            db_path: base.join("cloth-stock.db"),
            images_dir: base.join("images"),
            inbox_dir: base.join("inbox"),
            config_file: base.join("config.toml"),
            ui_state_file: base.join("ui_state.json"),
            pid_file: base.join("watch.pid"),
            log_file: base.join("watch.log"),
            base_dir: base,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        fs::create_dir_all(&self.images_dir)?;
        Ok(())
    }
}

/// User settings read from `config.toml`, overridable through
/// `CLOTH_STOCK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_size: i32,
    pub default_color: String,
    pub default_category: String,
    pub list_limit: i64,
    pub watch_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_size: 100,
            default_color: String::new(),
            default_category: "uncategorized".to_string(),
            list_limit: 20,
            watch_interval_ms: 1000,
            inbox_dir: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix("CLOTH_STOCK").try_parsing(true))
    }

    fn load_with_env(path: &Path, env: Environment) -> Result<Self> {
        let defaults = Settings::default();
        let settings = Config::builder()
            .set_default("default_size", i64::from(defaults.default_size))?
            .set_default("default_color", defaults.default_color)?
            .set_default("default_category", defaults.default_category)?
            .set_default("list_limit", defaults.list_limit)?
            .set_default("watch_interval_ms", defaults.watch_interval_ms)?
            .add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(env)
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        debug!(path = %path.display(), ?settings, "loaded settings");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ClothError::Config(format!("Failed to serialize settings: {e}")))?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn default_tags(&self) -> TagData {
        TagData {
            size: self.default_size,
            color: self.default_color.clone(),
            category: self.default_category.clone(),
        }
    }

    pub fn inbox(&self, paths: &AppPaths) -> PathBuf {
        self.inbox_dir.clone().unwrap_or_else(|| paths.inbox_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env() -> Environment {
        Environment::with_prefix("CLOTH_STOCK_TEST_UNUSED")
    }

    #[test]
    fn test_from_base() {
        let paths = AppPaths::from_base(PathBuf::from("/tmp/test-cs"));
        assert_eq!(paths.base_dir, PathBuf::from("/tmp/test-cs"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/test-cs/cloth-stock.db"));
        assert_eq!(paths.images_dir, PathBuf::from("/tmp/test-cs/images"));
        assert_eq!(paths.inbox_dir, PathBuf::from("/tmp/test-cs/inbox"));
        assert_eq!(paths.config_file, PathBuf::from("/tmp/test-cs/config.toml"));
        assert_eq!(paths.pid_file, PathBuf::from("/tmp/test-cs/watch.pid"));
        assert_eq!(paths.log_file, PathBuf::from("/tmp/test-cs/watch.log"));
    }

    #[test]
    fn test_resolve_explicit_base() {
        let paths = AppPaths::resolve(Some(PathBuf::from("/tmp/elsewhere"))).unwrap();
        assert_eq!(paths.base_dir, PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn test_resolve_uses_home_dir() {
        let paths = AppPaths::resolve(None).unwrap();
        assert!(paths.base_dir.ends_with(".cloth-stock"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_with_env(&dir.path().join("config.toml"), no_env()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_size = 120\ndefault_category = \"tops\"\n").unwrap();
        let settings = Settings::load_with_env(&path, no_env()).unwrap();
        assert_eq!(settings.default_size, 120);
        assert_eq!(settings.default_category, "tops");
        assert_eq!(settings.list_limit, 20);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let settings = Settings {
            default_color: "navy".to_string(),
            watch_interval_ms: 250,
            inbox_dir: Some(PathBuf::from("/tmp/camera")),
            ..Default::default()
        };
        settings.save(&path).unwrap();
        let loaded = Settings::load_with_env(&path, no_env()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_default_tags() {
        let settings = Settings::default();
        let tags = settings.default_tags();
        assert_eq!(tags.size, 100);
        assert_eq!(tags.category, "uncategorized");
    }

    #[test]
    fn test_inbox_override() {
        let paths = AppPaths::from_base(PathBuf::from("/tmp/test-cs"));
        let mut settings = Settings::default();
        assert_eq!(settings.inbox(&paths), PathBuf::from("/tmp/test-cs/inbox"));
        settings.inbox_dir = Some(PathBuf::from("/mnt/camera"));
        assert_eq!(settings.inbox(&paths), PathBuf::from("/mnt/camera"));
    }
}
