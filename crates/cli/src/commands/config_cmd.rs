//! `cadence config`: configuration management.

use cadence_config::AppConfig;
use std::path::{Path, PathBuf};

fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Write the default template unless a file is already there.
fn init(path: &Path) -> Result<bool, std::io::Error> {
    if path.exists() {
        return Ok(false);
    }
    super::ensure_parent(path)?;
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}

/// Strip secrets before printing.
fn redacted(mut config: AppConfig) -> AppConfig {
    let hidden = || Some("[REDACTED]".to_string());
    for backend in std::iter::once(&mut config.backends.primary)
        .chain(config.backends.secondary.as_mut())
        .chain(config.backends.search.as_mut())
    {
        if backend.api_key.is_some() {
            backend.api_key = hidden();
        }
    }
    if config.channel.bot_token.is_some() {
        config.channel.bot_token = hidden();
    }
    config
}

pub async fn run(path: Option<&Path>, show: bool, init_file: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = config_path(path);

    if init_file {
        if init(&file)? {
            println!("Wrote {}", file.display());
        } else {
            println!("{} already exists, left unchanged", file.display());
        }
        return Ok(());
    }

    let config = super::load_config(path)?;
    if show {
        println!("{}", toml::to_string_pretty(&redacted(config))?);
        return Ok(());
    }

    println!("{}", file.display());
    println!("  persona:  {}", config.persona.name);
    println!(
        "  backends: {} ({}){}",
        config.backends.primary.name,
        config.backends.primary.model,
        config
            .backends
            .secondary
            .as_ref()
            .map(|s| format!(", fallback {}", s.name))
            .unwrap_or_default()
    );
    println!("  channel:  {}", config.channel.kind);
    println!("  library:  {}", config.index.source_dir.display());
    println!("  chapters: {}", config.artifacts.dir.display());
    println!("Configuration is valid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        assert!(init(&path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[persona]"));

        std::fs::write(&path, "# mine").unwrap();
        assert!(!init(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");
    }

    #[test]
    fn secrets_are_redacted() {
        let mut config = AppConfig::default();
        config.backends.primary.api_key = Some("sk-secret".into());
        config.channel.bot_token = Some("123:abc".into());
        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(!shown.contains("123:abc"));
        assert!(shown.contains("[REDACTED]"));
    }
}
