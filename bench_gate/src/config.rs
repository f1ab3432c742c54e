use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{defaults, evaluation_config::RawEvaluationConfig};

/// Configuration files contributing to the effective configuration, in
/// increasing priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    /// `$XDG_CONFIG_HOME/bench-gate/config.toml` or `~/.config/bench-gate/config.toml`
    pub system: Option<PathBuf>,
    /// Nearest `.benchgateconfig` above the working directory
    pub local: Option<PathBuf>,
    /// File passed on the command line. Must exist.
    pub explicit: Option<PathBuf>,
}

impl ConfigSources {
    /// Discovers configuration files from the process environment.
    pub fn discover(explicit: Option<&Path>) -> Self {
        let xdg_config_home = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
        let home = dirs_next::home_dir();
        let local = env::current_dir()
            .ok()
            .and_then(|cwd| find_local_config(&cwd));

        ConfigSources {
            system: system_config_path(xdg_config_home.as_deref(), home.as_deref()),
            local,
            explicit: explicit.map(Path::to_path_buf),
        }
    }

    /// Merges all sources. Later sources override earlier ones.
    pub fn build(&self) -> Result<Config, ConfigError> {
        let mut builder = Config::builder();

        // 1. System-wide config
        if let Some(system) = &self.system {
            builder = builder.add_source(
                File::from(system.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // 2. Local config
        if let Some(local) = &self.local {
            builder = builder.add_source(
                File::from(local.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // 3. Explicit config
        if let Some(explicit) = &self.explicit {
            builder = builder.add_source(
                File::from(explicit.as_path())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder.build()
    }

    /// Existing files among the sources, in merge order.
    pub fn existing(&self) -> Vec<&Path> {
        [&self.system, &self.local, &self.explicit]
            .into_iter()
            .flatten()
            .map(PathBuf::as_path)
            .filter(|p| p.is_file())
            .collect()
    }
}

/// Read hierarchical configuration (system -> local -> explicit override)
pub fn read_hierarchical_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let sources = ConfigSources::discover(explicit);
    log::debug!("Configuration sources: {:?}", sources);
    sources.build()
}

fn system_config_path(xdg_config_home: Option<&Path>, home: Option<&Path>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        Some(
            xdg_config_home
                .join(defaults::SYSTEM_CONFIG_DIR_NAME)
                .join("config.toml"),
        )
    } else {
        home.map(|home| {
            home.join(".config")
                .join(defaults::SYSTEM_CONFIG_DIR_NAME)
                .join("config.toml")
        })
    }
}

/// Searches `start` and its ancestors for a local configuration file.
pub fn find_local_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(defaults::LOCAL_CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

fn section_or_default<T>(config: &Config, key: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match config.get::<T>(key) {
        Ok(section) => Ok(section),
        Err(ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(e),
    }
}

/// The `[evaluation]` section. Missing keys stay unset.
pub fn evaluation_section(config: &Config) -> Result<RawEvaluationConfig, ConfigError> {
    section_or_default(config, "evaluation")
}

/// Location of the history document (`[store]` section).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub folder: PathBuf,
    pub file: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            folder: PathBuf::from(defaults::DEFAULT_DATA_FOLDER),
            file: defaults::DEFAULT_DATA_FILE.to_string(),
        }
    }
}

impl StoreSettings {
    pub fn data_file(&self) -> PathBuf {
        self.folder.join(&self.file)
    }
}

pub fn store_section(config: &Config) -> Result<StoreSettings, ConfigError> {
    section_or_default(config, "store")
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sources_with_local(dir: &TempDir, content: &str) -> ConfigSources {
        let local = dir.path().join(defaults::LOCAL_CONFIG_FILE_NAME);
        fs::write(&local, content).unwrap();
        ConfigSources {
            local: Some(local),
            ..Default::default()
        }
    }

    #[test]
    fn test_parsing_evaluation_section() {
        let dir = TempDir::new().unwrap();
        let sources = sources_with_local(
            &dir,
            r#"
[evaluation]
method = "threshold"
failing_condition = "all"
comparison_operators = ["smaller", "tolerance"]
comparison_margins = [10, -1]
threshold_values = [120.5, 3]
moving_ave_window_size = 7
"#,
        );
        let config = sources.build().unwrap();
        let evaluation = evaluation_section(&config).unwrap();
        assert_eq!(evaluation.method.as_deref(), Some("threshold"));
        assert_eq!(evaluation.failing_condition.as_deref(), Some("all"));
        assert_eq!(
            evaluation.comparison_operators,
            Some(vec!["smaller".to_string(), "tolerance".to_string()])
        );
        assert_eq!(evaluation.comparison_margins, Some(vec![10.0, -1.0]));
        assert_eq!(evaluation.threshold_values, Some(vec![120.5, 3.0]));
        assert_eq!(evaluation.moving_ave_window_size, Some(7));
        assert_eq!(evaluation.trend_thresholds, None);
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config = ConfigSources::default().build().unwrap();
        assert_eq!(
            evaluation_section(&config).unwrap(),
            RawEvaluationConfig::default()
        );
        let store = store_section(&config).unwrap();
        assert_eq!(store, StoreSettings::default());
        assert_eq!(
            store.data_file(),
            Path::new(defaults::DEFAULT_DATA_FOLDER).join(defaults::DEFAULT_DATA_FILE)
        );
    }

    #[test]
    fn test_explicit_config_overrides_local_and_system() {
        let dir = TempDir::new().unwrap();
        let system = dir.path().join("system.toml");
        fs::write(
            &system,
            "[evaluation]\nmethod = \"previous\"\n[store]\nfolder = \"system-data\"\n",
        )
        .unwrap();
        let mut sources = sources_with_local(&dir, "[evaluation]\nmethod = \"jump_detection\"\n");
        sources.system = Some(system);

        let config = sources.build().unwrap();
        assert_eq!(
            evaluation_section(&config).unwrap().method.as_deref(),
            Some("jump_detection")
        );
        // Keys not overridden survive from lower priority sources.
        assert_eq!(
            store_section(&config).unwrap().folder,
            PathBuf::from("system-data")
        );

        let explicit = dir.path().join("explicit.toml");
        fs::write(&explicit, "[evaluation]\nmethod = \"threshold_range\"\n").unwrap();
        sources.explicit = Some(explicit);
        let config = sources.build().unwrap();
        assert_eq!(
            evaluation_section(&config).unwrap().method.as_deref(),
            Some("threshold_range")
        );
        assert_eq!(sources.existing().len(), 3);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let sources = ConfigSources {
            explicit: Some(dir.path().join("does-not-exist.toml")),
            ..Default::default()
        };
        assert!(sources.build().is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let sources = sources_with_local(&dir, "[evaluation\nmethod = ");
        assert!(sources.build().is_err());
    }

    #[test]
    fn test_find_local_config_upward_search() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        let config_path = dir.path().join("a").join(defaults::LOCAL_CONFIG_FILE_NAME);
        fs::write(&config_path, "").unwrap();

        assert_eq!(find_local_config(&nested), Some(config_path));
    }

    #[test]
    fn test_find_local_config_not_found() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("x");
        fs::create_dir_all(&nested).unwrap();
        // Only finds files, not directories of the same name.
        fs::create_dir_all(dir.path().join(defaults::LOCAL_CONFIG_FILE_NAME)).unwrap();
        let found = find_local_config(&nested);
        assert!(found.map_or(true, |p| !p.starts_with(dir.path())));
    }

    #[test]
    fn test_system_config_path_prefers_xdg() {
        let xdg = Path::new("/xdg");
        let home = Path::new("/home/user");
        assert_eq!(
            system_config_path(Some(xdg), Some(home)),
            Some(PathBuf::from("/xdg/bench-gate/config.toml"))
        );
        assert_eq!(
            system_config_path(None, Some(home)),
            Some(PathBuf::from("/home/user/.config/bench-gate/config.toml"))
        );
        assert_eq!(system_config_path(None, None), None);
    }
}
