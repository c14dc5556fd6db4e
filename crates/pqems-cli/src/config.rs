use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use pqems_core::storage::BackendKind;
use pqems_crypto::KemAlgorithm;
use pqems_storage::trust_anchor::DEFAULT_NV_INDEX;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/pqems/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Override for the directory holding encrypted key records.
    pub data_dir: Option<PathBuf>,
    /// Force a backend instead of probing the host.
    pub backend: Option<BackendKind>,
    pub kem_algorithm: KemAlgorithm,
    /// Keyring service name for OS-held key-encryption keys.
    pub keyring_service: String,
    /// TPM NV index holding the hardware key-encryption key.
    pub tpm_nv_index: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend: None,
            kem_algorithm: KemAlgorithm::default(),
            keyring_service: "pqems".to_string(),
            tpm_nv_index: DEFAULT_NV_INDEX,
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("pqems").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.kem_algorithm, KemAlgorithm::Kyber1024);
        assert_eq!(cfg.tpm_nv_index, 0x0150_0016);
    }

    #[test]
    fn returns_default_when_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "  \n").expect("write");
        assert_eq!(load_from_path(&path).expect("load"), Config::default());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/pqems-data"
            backend = "os_vault"
            kem_algorithm = "kyber768"
            keyring_service = "pqems-test"
            tpm_nv_index = 0x1500020
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/tmp/pqems-data")),
                backend: Some(BackendKind::OsVault),
                kem_algorithm: KemAlgorithm::Kyber768,
                keyring_service: "pqems-test".into(),
                tpm_nv_index: 0x0150_0020,
            }
        );
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "backend = \"hardware\"\n").expect("write");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(cfg.backend, Some(BackendKind::Hardware));
        assert_eq!(cfg.keyring_service, "pqems");
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "kem_algorithm = \"rsa2048\"\n").expect("write");
        assert!(load_from_path(&path).is_err());
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/pqems-data")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let other = Config {
            keyring_service: "ignored".into(),
            ..Config::default()
        };
        let second = write_to_path_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);
        let loaded = load_from_path(&path).expect("load");
        assert_eq!(loaded, cfg);
    }
}
