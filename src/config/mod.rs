use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `modules` (comma separated unit names)
pub const MODULES_ENV: &str = "PLUGWIRE_MODULES";

/// Environment variable overriding `module_root`
pub const MODULE_ROOT_ENV: &str = "PLUGWIRE_MODULE_ROOT";

/// Host configuration.
///
/// Loaded in layers: built-in defaults, then the YAML file, then environment
/// overrides. Top-level keys the host does not know about are kept in
/// `sections` so modules can read their own settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Module unit names to load, in load order
    #[serde(default)]
    pub modules: Vec<String>,

    /// Explicit module root; skips directory discovery when set
    #[serde(default)]
    pub module_root: Option<PathBuf>,

    #[serde(default)]
    pub locator: LocatorConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Remaining sections, passed through to modules untouched
    #[serde(flatten)]
    pub sections: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Directory next to the executable in a packaged install
    #[serde(default = "default_production_dir")]
    pub production_dir: String,

    /// Directory searched for upwards from the executable during development
    #[serde(default = "default_development_dir")]
    pub development_dir: String,

    /// How many parent directories the development search may climb
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default)]
    pub version_policy: VersionPolicy,
}

/// What to do when a dependency is requested in a version other than the
/// one already loaded under the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionPolicy {
    /// Reuse the loaded version and log a warning
    #[default]
    FirstLoadedWins,
    /// Refuse the request with a version conflict
    Strict,
}

// Default value functions
fn default_production_dir() -> String {
    "modules".to_string()
}

fn default_development_dir() -> String {
    "module-build".to_string()
}

fn default_max_depth() -> usize {
    6
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            production_dir: default_production_dir(),
            development_dir: default_development_dir(),
            max_depth: default_max_depth(),
        }
    }
}

impl Config {
    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        let config = if config_path.exists() {
            Self::read_file(&config_path)?
        } else {
            Self::default()
        };

        Ok(config.with_env_overrides())
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::read_file(path.as_ref())?.with_env_overrides())
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text without applying overrides
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_yaml::to_string(self).context("Failed to serialize config")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path.as_ref(), contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default configuration path
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        Ok(home.join(".plugwire").join("config.yaml"))
    }

    /// Apply `PLUGWIRE_MODULES` and `PLUGWIRE_MODULE_ROOT` from the process
    /// environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(MODULES_ENV).ok().as_deref(),
            std::env::var_os(MODULE_ROOT_ENV).map(PathBuf::from),
        )
    }

    /// Apply overrides explicitly. Empty entries in `modules` are dropped.
    #[must_use]
    pub fn with_overrides(mut self, modules: Option<&str>, module_root: Option<PathBuf>) -> Self {
        if let Some(list) = modules {
            self.modules = list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(root) = module_root {
            self.module_root = Some(root);
        }
        self
    }

    /// Deserialize a module-owned section, `None` if the key is absent.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.sections
            .get(key)
            .map(|value| {
                serde_yaml::from_value(value.clone())
                    .with_context(|| format!("Invalid configuration section '{key}'"))
            })
            .transpose()
    }
}
