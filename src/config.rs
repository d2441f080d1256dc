//! Run Configuration Module
//!
//! All parameterizable aspects of a tuning run: where the external
//! simulator lives, and how the genetic search behaves. Everything here is
//! injected into the components at construction time; nothing reads
//! process-wide constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Filesystem layout of the external simulator installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimPaths {
    /// Simulator installation root (config-store paths are relative to it)
    pub root: PathBuf,
    /// Simulator executable
    pub binary: PathBuf,
    /// Directory for transient per-evaluation config files
    pub config_dir: PathBuf,
    /// Fixed simulator configuration, relative to the config store
    pub simconfig: String,
    /// Trace file played back in hardware-only runs
    pub trace_file: String,
}

impl SimPaths {
    /// Conventional layout under a DRAMSys checkout:
    /// binary at `build/bin/DRAMSys`, transient configs under `configs/`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        SimPaths {
            binary: root.join("build/bin/DRAMSys"),
            config_dir: root.join("configs"),
            root,
            simconfig: "simconfig/example.json".to_string(),
            trace_file: "traces/resnet50_synthetic.stl".to_string(),
        }
    }
}

impl Default for SimPaths {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
        SimPaths::for_root(home.join("DRAMSys"))
    }
}

/// Genetic-search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaParams {
    /// Individuals per generation
    pub population_size: usize,
    /// Fixed number of generations (no adaptive stopping)
    pub generations: usize,
    /// Top-ranked individuals copied verbatim into the next generation
    pub elite_count: usize,
    /// Contestants sampled per parent slot in tournament selection
    pub tournament_size: usize,
    /// Per-parameter probability of re-randomizing during mutation
    pub mutation_rate: f64,
    /// Wall-clock bound per simulator invocation, in seconds
    pub timeout_secs: u64,
    /// Skip parameter tuples that were already evaluated this run
    pub dedup: bool,
    /// Concurrent simulator invocations (1 = sequential)
    pub jobs: usize,
}

impl Default for GaParams {
    fn default() -> Self {
        GaParams {
            population_size: 12,
            generations: 8,
            elite_count: 2,
            tournament_size: 3,
            mutation_rate: 0.2,
            timeout_secs: 120,
            dedup: false,
            jobs: 1,
        }
    }
}

impl GaParams {
    /// Profile for hardware-only runs.
    pub fn hardware_profile() -> Self {
        GaParams::default()
    }

    /// Profile for workload-only runs: a smaller space, so a smaller
    /// population with more aggressive mutation and tighter tournaments.
    pub fn workload_profile() -> Self {
        GaParams {
            population_size: 8,
            generations: 4,
            tournament_size: 2,
            mutation_rate: 0.3,
            ..GaParams::default()
        }
    }

    /// Profile for full hardware+workload runs: the space is large enough
    /// that repeated tuples waste simulator time, so dedup is on.
    pub fn full_profile() -> Self {
        GaParams {
            population_size: 12,
            generations: 6,
            mutation_rate: 0.25,
            dedup: true,
            ..GaParams::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A complete run configuration, loadable from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub paths: SimPaths,
    pub ga: GaParams,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl RunConfig {
    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_str = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_str)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_for_root() {
        let paths = SimPaths::for_root("/opt/DRAMSys");
        assert_eq!(paths.binary, PathBuf::from("/opt/DRAMSys/build/bin/DRAMSys"));
        assert_eq!(paths.config_dir, PathBuf::from("/opt/DRAMSys/configs"));
        assert_eq!(paths.simconfig, "simconfig/example.json");
    }

    #[test]
    fn test_profiles() {
        let workload = GaParams::workload_profile();
        assert_eq!(workload.tournament_size, 2);
        assert!(workload.mutation_rate > GaParams::hardware_profile().mutation_rate);

        let full = GaParams::full_profile();
        assert!(full.dedup);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");

        let mut config = RunConfig {
            paths: SimPaths::for_root("/opt/DRAMSys"),
            ga: GaParams::full_profile(),
        };
        config.ga.population_size = 20;
        config.save(&path).unwrap();

        let recovered = RunConfig::load(&path).unwrap();
        assert_eq!(recovered.ga.population_size, 20);
        assert!(recovered.ga.dedup);
        assert_eq!(recovered.paths.root, PathBuf::from("/opt/DRAMSys"));
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "population = \"not a table\"").unwrap();
        assert!(matches!(RunConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
