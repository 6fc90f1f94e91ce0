//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_info, print_success};
use st_core::config::{self, TunnelConfig};

/// Command-line values that win over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub remote_port: Option<u16>,
}

impl Overrides {
    pub fn apply(&self, config: &mut TunnelConfig) {
        if let Some(profile) = &self.profile {
            config.aws.profile = Some(profile.clone());
        }
        if let Some(region) = &self.region {
            config.aws.region = Some(region.clone());
        }
        if let Some(port) = self.remote_port {
            config.remote_port = port;
        }
    }
}

/// Config file in effect: `--config` or the default location
pub fn config_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load the file (or defaults), apply overrides and validate the result
pub fn load_effective_config(
    config_path: Option<&Path>,
    overrides: &Overrides,
) -> Result<TunnelConfig> {
    let mut config = config::load_tunnel_config(config_path).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            self::config_path(config_path).display()
        )
    })?;
    overrides.apply(&mut config);
    config
        .validate()
        .context("Invalid configuration after applying command-line options")?;
    Ok(config)
}

/// Show the effective configuration as TOML
pub fn config_show(config_path: Option<&Path>, overrides: &Overrides) -> Result<()> {
    let path = self::config_path(config_path);
    let config = load_effective_config(config_path, overrides)?;

    if path.exists() {
        print_info(&format!("Configuration file: {}", path.display()));
    } else {
        print_info(&format!(
            "No configuration file at {}, showing defaults",
            path.display()
        ));
    }
    println!();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = self::config_path(config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    config::save_config(&path, &TunnelConfig::default())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    print_success(&format!("Created configuration file: {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "remote_port = 3389\n[aws]\nprofile = \"dev\"\n").unwrap();

        let overrides = Overrides {
            profile: Some("prod".into()),
            region: Some("eu-west-1".into()),
            remote_port: None,
        };
        let config = load_effective_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.remote_port, 3389);
        assert_eq!(config.aws.profile.as_deref(), Some("prod"));
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_override_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let overrides = Overrides {
            remote_port: Some(0),
            ..Default::default()
        };
        assert!(load_effective_config(Some(&path), &overrides).is_err());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        config_init(Some(&path), false).unwrap();
        assert!(path.exists());
        assert!(config_init(Some(&path), false).is_err());
        config_init(Some(&path), true).unwrap();

        let loaded = load_effective_config(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(loaded.remote_port, 22);
    }
}
