pub mod calendar;
pub mod config_cmd;
pub mod index;
pub mod run;
pub mod search;

use cadence_config::{AppConfig, ConfigError};
use cadence_memory::{ChunkSpec, SqliteTextIndex};
use std::path::Path;

/// Load from an explicit file, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        return AppConfig::load();
    };
    let mut config = AppConfig::load_from(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Create the parent directory of a file if it is missing.
pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

pub async fn open_index(config: &AppConfig) -> Result<SqliteTextIndex, Box<dyn std::error::Error>> {
    let db = &config.index.db_path;
    ensure_parent(db)?;
    let spec = ChunkSpec::new(config.index.chunk_size, config.index.chunk_overlap);
    Ok(SqliteTextIndex::open(&db.to_string_lossy(), spec).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.channel.kind, "cli");
    }

    #[test]
    fn explicit_file_is_validated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gate]\nskip_short_prob = 1.5\n").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn parent_dirs_are_created() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a/b/index.db");
        ensure_parent(&file).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
