use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CloudError, auth::Token, error, this_errors};

pub const CONFIG_DIR_ENV: &str = "BENDSQL_CONFIG_DIR";
const CONFIG_DIR_NAME: &str = "bendsql";
const CONFIG_FILE_NAME: &str = "config.json";

/// Persisted CLI state: the selected org/warehouse, an endpoint override and
/// the current token.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub warehouse: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
}

impl ConfigFile {
    /// `$BENDSQL_CONFIG_DIR/config.json`, or `bendsql/config.json` under the
    /// platform config dir (`~/.config` on Linux).
    pub fn default_path() -> Result<PathBuf, CloudError> {
        if let Some(dir) = std::env::var(CONFIG_DIR_ENV).ok().filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir).join(CONFIG_FILE_NAME));
        }

        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| error!("could not determine config directory"))?;
        Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// A missing file reads as an empty config.
    pub fn load(path: &Path) -> Result<Self, CloudError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = this_errors!("failed to read config file", std::fs::read(path));
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        Ok(this_errors!(
            "failed to parse config file",
            serde_json::from_slice::<Self>(&content)
        ))
    }

    pub fn save(&self, path: &Path) -> Result<(), CloudError> {
        if let Some(parent) = path.parent() {
            this_errors!("failed to create config dir", std::fs::create_dir_all(parent));
        }

        let content = this_errors!("failed to serialise config", serde_json::to_vec_pretty(self));
        this_errors!("failed to write config file", std::fs::write(path, content));

        Ok(())
    }

    /// Loads the file at `path`, applies `edit` and writes it back.
    pub fn update(path: &Path, edit: impl FnOnce(&mut Self)) -> Result<Self, CloudError> {
        let mut cfg = Self::load(path)?;
        edit(&mut cfg);
        cfg.save(path)?;
        Ok(cfg)
    }

    pub fn warehouse(&self) -> Option<&str> {
        Some(self.warehouse.as_str()).filter(|w| !w.is_empty())
    }

    pub fn endpoint(&self) -> Option<&str> {
        Some(self.endpoint.as_str()).filter(|e| !e.is_empty())
    }
}
