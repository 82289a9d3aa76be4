use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::MnemeConfig;

/// Loads and optionally hot-reloads the Mneme configuration.
#[derive(Debug)]
pub struct ConfigLoader {
    config: Arc<RwLock<MnemeConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > MNEME_CONFIG env > ~/.mneme/mneme.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MNEME_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mneme")
            .join("mneme.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> mneme_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&config_path, &raw)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            MnemeConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config: log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(mneme_core::MnemeError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config (no file backing).
    pub fn from_config(config: MnemeConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> MnemeConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<MnemeConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse(path: &Path, raw: &str) -> mneme_core::Result<MnemeConfig> {
        toml::from_str::<MnemeConfig>(raw).map_err(|e| {
            mneme_core::MnemeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (MNEME_DB_PATH, MNEME_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: MnemeConfig) -> MnemeConfig {
        if let Ok(v) = std::env::var("MNEME_DB_PATH") {
            config.memory.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MNEME_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("MNEME_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.sweep.interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("MNEME_DECAY_FACTOR") {
            if let Ok(factor) = v.parse::<f64>() {
                config.sweep.decay_factor = factor;
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> mneme_core::Result<()> {
        if !self.config_path.exists() {
            return Err(mneme_core::MnemeError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&self.config_path, &raw)?);
        new_config.validate().map_err(mneme_core::MnemeError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that swaps in the new config when the file changes.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(&self) -> mneme_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("config file changed, reloading");
                    let raw = match std::fs::read_to_string(&path_for_event) {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(error = %e, "failed to read config file during hot-reload");
                            return;
                        }
                    };
                    match ConfigLoader::parse(&path_for_event, &raw) {
                        Ok(new_config) => {
                            let new_config = ConfigLoader::apply_env_overrides(new_config);
                            if let Err(e) = new_config.validate() {
                                warn!(error = %e, "config file is invalid, keeping current config");
                                return;
                            }
                            *config.write() = new_config;
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| {
            mneme_core::MnemeError::Config(format!("failed to create file watcher: {}", e))
        })?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                mneme_core::MnemeError::Config(format!("failed to watch config directory: {}", e))
            })?;

        Ok(watcher)
    }
}
