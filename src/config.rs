use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sim::inst::{INSTRUCTION_SIZE, WORD_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub page_size: usize,
    pub physical_pages: usize,
    pub time_quantum: u32,
    pub heap_base: i32,
    pub initial_sp: i32,
    pub trace: bool,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            page_size: 256,
            physical_pages: 32,
            time_quantum: 10,
            heap_base: 0x1000,
            initial_sp: 0xFF00,
            trace: false,
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(content: &str) -> Result<SimConfig, ConfigError> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<SimConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        SimConfig::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < INSTRUCTION_SIZE || self.page_size % WORD_SIZE != 0 {
            return Err(ConfigError::Invalid(format!(
                "page_size must be a multiple of {} and at least {}, got {}",
                WORD_SIZE, INSTRUCTION_SIZE, self.page_size
            )));
        }
        if i32::try_from(self.page_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "page_size {} does not fit the address space",
                self.page_size
            )));
        }
        if self.physical_pages == 0 {
            return Err(ConfigError::Invalid(
                "physical_pages must be at least 1".to_string(),
            ));
        }
        if self.time_quantum == 0 {
            return Err(ConfigError::Invalid(
                "time_quantum must be at least 1".to_string(),
            ));
        }
        if self.heap_base <= 0 || self.heap_base as usize % self.page_size != 0 {
            return Err(ConfigError::Invalid(format!(
                "heap_base {:#x} must be a positive multiple of the page size",
                self.heap_base
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(32, config.physical_pages);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SimConfig::from_toml_str("time_quantum = 3\ntrace = true\n").unwrap();
        assert_eq!(3, config.time_quantum);
        assert!(config.trace);
        assert_eq!(256, config.page_size);
    }

    #[test]
    fn rejects_bad_values() {
        for toml in [
            "page_size = 10",
            "page_size = 8",
            "page_size = 30",
            "physical_pages = 0",
            "time_quantum = 0",
            "heap_base = 100",
        ] {
            assert!(
                matches!(SimConfig::from_toml_str(toml), Err(ConfigError::Invalid(_))),
                "{}",
                toml
            );
        }
        assert!(matches!(
            SimConfig::from_toml_str("page_sizes = 64"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "page_size = 64\nphysical_pages = 4").unwrap();
        let config = SimConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(64, config.page_size);
        assert_eq!(4, config.physical_pages);

        let missing = SimConfig::from_toml_file(Path::new("/nonexistent/ossim.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
