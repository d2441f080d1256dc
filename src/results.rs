//! Result Persistence Module
//!
//! Durable records of a tuning run: a per-generation JSONL log that is
//! flushed as soon as each generation completes (so a crash mid-run never
//! loses finished generations), a final machine-readable summary, and an
//! export of the winning configuration in the simulator's own format.

use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::{EvaluatedIndividual, GenerationRecord, Individual, RunOutcome};
use crate::config::SimPaths;
use crate::simulator::{SimulationConfig, TraceMode};
use crate::space::{Genome, SearchScope};

/// Losing results defeats the run's purpose, so persistence failures are
/// surfaced to the caller instead of being swallowed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Run metadata recorded alongside the results.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub scope: SearchScope,
    pub population_size: usize,
    pub generations: usize,
}

#[derive(Serialize)]
struct SummaryDoc<'a> {
    timestamp: String,
    best_configuration: Option<&'a Individual>,
    /// Best-ever fitness after each generation that had one
    progress: Vec<f64>,
    all_results: &'a [EvaluatedIndividual],
    stats: SummaryStats,
}

#[derive(Serialize)]
struct SummaryStats {
    total_tested: usize,
    total_evaluations: usize,
    unique_configs: usize,
    generations: usize,
    population_size: usize,
    scope: SearchScope,
}

/// Writes run records under one results directory.
pub struct ResultStore {
    dir: PathBuf,
    log_path: PathBuf,
    log: File,
}

impl ResultStore {
    /// Open a store, creating the directory and truncating any previous
    /// generation log.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let log_path = dir.join("generations.jsonl");
        let log = File::create(&log_path).map_err(io_err(&log_path))?;
        Ok(ResultStore { dir, log_path, log })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generation_log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append one generation snapshot and flush it to disk immediately.
    pub fn record_generation(&mut self, record: &GenerationRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.log
            .write_all(line.as_bytes())
            .and_then(|_| self.log.flush())
            .map_err(io_err(&self.log_path))
    }

    /// Write the final summary document.
    pub fn write_summary(
        &self,
        outcome: &RunOutcome,
        info: &RunInfo,
    ) -> Result<PathBuf, PersistenceError> {
        let doc = SummaryDoc {
            timestamp: Utc::now().to_rfc3339(),
            best_configuration: outcome.best.as_ref(),
            progress: outcome
                .generations
                .iter()
                .filter_map(|g| g.best_ever.as_ref().map(|b| b.fitness))
                .collect(),
            all_results: &outcome.history,
            stats: SummaryStats {
                total_tested: outcome.history.len(),
                total_evaluations: outcome.total_evaluations,
                unique_configs: outcome.unique_configs,
                generations: info.generations,
                population_size: info.population_size,
                scope: info.scope,
            },
        };

        let path = self.dir.join("optimization_results.json");
        let json = serde_json::to_string_pretty(&doc)?;
        fs::write(&path, json).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Export the winning genome as a ready-to-run simulator configuration.
    pub fn export_best_config(
        &self,
        paths: &SimPaths,
        mode: TraceMode,
        genome: &Genome,
    ) -> Result<PathBuf, PersistenceError> {
        let config = SimulationConfig::build(paths, mode, genome, "optimized_best");
        let path = self.dir.join("best_config.json");
        let json = serde_json::to_string_pretty(&config)?;
        fs::write(&path, json).map_err(io_err(&path))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SearchSpace;

    fn individual(fitness: f64) -> Individual {
        let mut ind = Individual::unevaluated(SearchSpace::new(SearchScope::Full).baseline);
        ind.fitness = fitness;
        ind.bandwidth = 10.0;
        ind.success = true;
        ind.evaluated = true;
        ind
    }

    fn record(generation: usize, fitness: f64) -> GenerationRecord {
        GenerationRecord {
            generation,
            successes: 3,
            best: Some(individual(fitness)),
            best_ever: Some(individual(fitness)),
        }
    }

    #[test]
    fn test_generation_log_is_flushed_per_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultStore::create(dir.path().join("results")).unwrap();

        // Each record must be on disk immediately, so a later failure can
        // never lose previously recorded generations.
        for gen in 1..=3 {
            store.record_generation(&record(gen, 1000.0 * gen as f64)).unwrap();
            let content = fs::read_to_string(store.generation_log_path()).unwrap();
            assert_eq!(content.lines().count(), gen);
        }

        let content = fs::read_to_string(store.generation_log_path()).unwrap();
        for (i, line) in content.lines().enumerate() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["generation"], i + 1);
            assert_eq!(value["successes"], 3);
        }
    }

    #[test]
    fn test_summary_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::create(dir.path()).unwrap();

        let outcome = RunOutcome {
            best: Some(individual(500.0)),
            generations: vec![record(1, 900.0), record(2, 500.0)],
            history: vec![
                EvaluatedIndividual {
                    generation: 1,
                    individual: individual(900.0),
                },
                EvaluatedIndividual {
                    generation: 2,
                    individual: individual(500.0),
                },
            ],
            total_evaluations: 8,
            unique_configs: 7,
            cancelled: false,
        };
        let info = RunInfo {
            scope: SearchScope::Full,
            population_size: 4,
            generations: 2,
        };

        let path = store.write_summary(&outcome, &info).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        assert!(value["timestamp"].is_string());
        assert_eq!(value["best_configuration"]["fitness"], 500.0);
        assert_eq!(value["progress"], serde_json::json!([900.0, 500.0]));
        assert_eq!(value["all_results"].as_array().unwrap().len(), 2);
        // Tagged-with-generation entries are flattened individuals.
        assert_eq!(value["all_results"][0]["generation"], 1);
        assert_eq!(value["all_results"][0]["success"], true);
        assert_eq!(value["stats"]["total_tested"], 2);
        assert_eq!(value["stats"]["total_evaluations"], 8);
        assert_eq!(value["stats"]["unique_configs"], 7);
        assert_eq!(value["stats"]["population_size"], 4);
        assert_eq!(value["stats"]["scope"], "full");
    }

    #[test]
    fn test_summary_without_best_reports_null() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::create(dir.path()).unwrap();

        let outcome = RunOutcome {
            best: None,
            generations: Vec::new(),
            history: Vec::new(),
            total_evaluations: 12,
            unique_configs: 12,
            cancelled: false,
        };
        let info = RunInfo {
            scope: SearchScope::Hardware,
            population_size: 4,
            generations: 3,
        };

        let path = store.write_summary(&outcome, &info).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert!(value["best_configuration"].is_null());
        assert_eq!(value["progress"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_export_best_config_is_simulator_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::create(dir.path()).unwrap();
        let paths = SimPaths::for_root("/opt/DRAMSys");
        let genome = SearchSpace::new(SearchScope::Hardware).baseline;

        let path = store
            .export_best_config(&paths, TraceMode::Player, &genome)
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(value["simulation"]["simulationid"], "optimized_best");
        assert_eq!(value["simulation"]["tracesetup"][0]["type"], "player");
        assert_eq!(
            value["simulation"]["memspec"],
            "memspec/JEDEC_4Gb_DDR4-2400_8bit_A.json"
        );
    }
}
