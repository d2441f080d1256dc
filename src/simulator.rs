//! Simulator Adapter Module
//!
//! The only boundary to the external DRAMSys binary. An [`Evaluator`]
//! turns a genome into a fitness measurement; the [`DramSys`] implementation
//! does it by writing the simulator's JSON configuration, running the
//! binary under a wall-clock timeout, and scraping the statistics it prints
//! to stdout. Every failure kind (launch error, timeout, non-zero exit,
//! missing metrics) folds into an unsuccessful outcome; nothing here aborts
//! the surrounding search.

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::SimPaths;
use crate::space::{AddressDistribution, Genome};

/// Highest address handed to the synthetic traffic generator (4 GiB space).
const GENERATOR_MAX_ADDRESS: u64 = 4_294_967_295;

/// Result of one external evaluation.
///
/// The evaluation succeeded iff the total-time metric was present in the
/// simulator output; bandwidth is reported opportunistically.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvalOutcome {
    /// Simulated completion time in picoseconds
    pub total_time_ps: Option<u64>,
    /// Average non-idle bandwidth in GB/s
    pub bandwidth_gbps: Option<f64>,
}

impl EvalOutcome {
    pub fn failure() -> Self {
        EvalOutcome::default()
    }

    pub fn is_success(&self) -> bool {
        self.total_time_ps.is_some()
    }
}

/// Fitness evaluation seam. The genetic engine only ever sees this trait,
/// which keeps it testable against stub evaluators.
pub trait Evaluator: Sync {
    /// Evaluate one fully-specified genome. `eval_id` is unique per
    /// invocation within a run and keys file names and simulation ids.
    fn evaluate(&self, genome: &Genome, eval_id: &str) -> EvalOutcome;
}

/// How the simulator is fed memory traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Replay a fixed trace file (hardware-only runs)
    Player,
    /// Drive the built-in synthetic traffic generator
    Generator,
}

/// The `tracesetup` entry of a simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceSetup {
    Player {
        #[serde(rename = "clkMhz")]
        clk_mhz: u32,
        name: String,
    },
    Generator {
        #[serde(rename = "clkMhz")]
        clk_mhz: u32,
        name: String,
        #[serde(rename = "numRequests")]
        num_requests: u32,
        #[serde(rename = "rwRatio")]
        rw_ratio: f64,
        #[serde(rename = "addressDistribution")]
        address_distribution: AddressDistribution,
        #[serde(rename = "minAddress")]
        min_address: u64,
        #[serde(rename = "maxAddress")]
        max_address: u64,
    },
}

/// The on-disk configuration document the simulator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub simulation: Simulation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub addressmapping: String,
    pub mcconfig: String,
    pub memspec: String,
    pub simconfig: String,
    pub simulationid: String,
    pub tracesetup: Vec<TraceSetup>,
}

impl SimulationConfig {
    /// Build the simulator configuration for one genome.
    pub fn build(paths: &SimPaths, mode: TraceMode, genome: &Genome, sim_id: &str) -> Self {
        let tracesetup = match mode {
            TraceMode::Player => TraceSetup::Player {
                clk_mhz: genome.clk_mhz,
                name: paths.trace_file.clone(),
            },
            TraceMode::Generator => TraceSetup::Generator {
                clk_mhz: genome.clk_mhz,
                name: format!("gen_{}", sim_id),
                num_requests: genome.num_requests,
                rw_ratio: genome.rw_ratio,
                address_distribution: genome.address_distribution,
                min_address: 0,
                max_address: GENERATOR_MAX_ADDRESS,
            },
        };

        SimulationConfig {
            simulation: Simulation {
                addressmapping: genome.addressmapping.clone(),
                mcconfig: genome.mcconfig.clone(),
                memspec: genome.memspec.clone(),
                simconfig: paths.simconfig.clone(),
                simulationid: sim_id.to_string(),
                tracesetup: vec![tracesetup],
            },
        }
    }
}

/// Why one invocation produced no measurement. Folded into
/// `EvalOutcome::failure()` after logging; never escapes to the engine.
#[derive(Debug, Error)]
enum SimFailure {
    #[error("could not write config file: {0}")]
    WriteConfig(#[source] std::io::Error),
    #[error("could not launch simulator: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("could not poll simulator: {0}")]
    Wait(#[source] std::io::Error),
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("exited with {status}: {stderr_tail}")]
    Exit {
        status: ExitStatus,
        stderr_tail: String,
    },
}

/// Removes the transient config file when the evaluation scope ends,
/// regardless of how the invocation went.
struct TempConfig<'a>(&'a Path);

impl Drop for TempConfig<'_> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.0) {
            debug!("could not remove {}: {}", self.0.display(), err);
        }
    }
}

/// Adapter around an external DRAMSys installation.
pub struct DramSys {
    paths: SimPaths,
    mode: TraceMode,
    timeout: Duration,
    total_time_re: Regex,
    avg_bw_re: Regex,
}

impl DramSys {
    pub fn new(paths: SimPaths, mode: TraceMode, timeout: Duration) -> Self {
        DramSys {
            paths,
            mode,
            timeout,
            total_time_re: Regex::new(r"Total Time:\s+(\d+)").unwrap(),
            avg_bw_re: Regex::new(r"AVG BW:\s+([\d.]+)").unwrap(),
        }
    }

    pub fn paths(&self) -> &SimPaths {
        &self.paths
    }

    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    fn try_evaluate(&self, genome: &Genome, eval_id: &str) -> Result<EvalOutcome, SimFailure> {
        let config = SimulationConfig::build(&self.paths, self.mode, genome, eval_id);
        let config_path = self.paths.config_dir.join(format!("opt_{}.json", eval_id));

        let json = serde_json::to_string_pretty(&config).expect("config serialization");
        fs::write(&config_path, json).map_err(SimFailure::WriteConfig)?;
        let _cleanup = TempConfig(&config_path);

        let stdout = self.run_with_timeout(&config_path)?;
        Ok(self.parse_output(&stdout))
    }

    /// Run the simulator on one config file, bounded by the configured
    /// wall-clock timeout. Stdout and stderr are drained on reader threads
    /// while the child is polled, so a chatty simulator cannot block on a
    /// full pipe.
    fn run_with_timeout(&self, config_path: &Path) -> Result<String, SimFailure> {
        let mut child = Command::new(&self.paths.binary)
            .arg(config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SimFailure::Spawn)?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SimFailure::Timeout {
                        secs: self.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(Duration::from_millis(25)),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SimFailure::Wait(err));
                }
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(SimFailure::Exit {
                status,
                stderr_tail: tail(&stderr, 3),
            });
        }
        Ok(stdout)
    }

    /// Extract the total-time and average-bandwidth metrics. Bandwidth
    /// lines tagged IDLE are the bus idle statistic, not throughput.
    fn parse_output(&self, stdout: &str) -> EvalOutcome {
        let mut total_time_ps = None;
        let mut bandwidth_gbps = None;

        for line in stdout.lines() {
            if let Some(caps) = self.total_time_re.captures(line) {
                total_time_ps = caps[1].parse().ok();
            }
            if !line.contains("IDLE") {
                if let Some(caps) = self.avg_bw_re.captures(line) {
                    bandwidth_gbps = caps[1].parse().ok();
                }
            }
        }

        EvalOutcome {
            total_time_ps,
            bandwidth_gbps,
        }
    }
}

impl Evaluator for DramSys {
    fn evaluate(&self, genome: &Genome, eval_id: &str) -> EvalOutcome {
        match self.try_evaluate(genome, eval_id) {
            Ok(outcome) => {
                if !outcome.is_success() {
                    warn!(
                        "simulation {} reported no total-time metric [{}]",
                        eval_id,
                        genome.summary()
                    );
                }
                outcome
            }
            Err(failure) => {
                warn!("simulation {} failed: {} [{}]", eval_id, failure, genome.summary());
                EvalOutcome::failure()
            }
        }
    }
}

/// Collect a pipe's contents without blocking the polling loop.
fn drain(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{SearchScope, SearchSpace};

    fn test_adapter(config_dir: PathBuf, binary: PathBuf, timeout: Duration) -> DramSys {
        let mut paths = SimPaths::for_root("/opt/DRAMSys");
        paths.config_dir = config_dir;
        paths.binary = binary;
        DramSys::new(paths, TraceMode::Generator, timeout)
    }

    fn genome() -> Genome {
        SearchSpace::new(SearchScope::Full).baseline
    }

    #[test]
    fn test_parse_output_extracts_metrics() {
        let sim = test_adapter(PathBuf::from("."), PathBuf::from("x"), Duration::from_secs(1));
        let stdout = "\
some preamble
Total Time:        123456789 ps
AVG BW (IDLE):     99.99 GB/s
AVG BW:            18.42 GB/s
trailer";
        let outcome = sim.parse_output(stdout);
        assert_eq!(outcome.total_time_ps, Some(123456789));
        assert_eq!(outcome.bandwidth_gbps, Some(18.42));
        assert!(outcome.is_success());
    }

    #[test]
    fn test_parse_output_without_total_time_is_failure() {
        let sim = test_adapter(PathBuf::from("."), PathBuf::from("x"), Duration::from_secs(1));
        let outcome = sim.parse_output("AVG BW: 18.42 GB/s\n");
        assert_eq!(outcome.total_time_ps, None);
        assert_eq!(outcome.bandwidth_gbps, Some(18.42));
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_parse_output_ignores_idle_only_bandwidth() {
        let sim = test_adapter(PathBuf::from("."), PathBuf::from("x"), Duration::from_secs(1));
        let outcome = sim.parse_output("Total Time: 42 ps\nAVG BW (IDLE): 7.5 GB/s\n");
        assert_eq!(outcome.total_time_ps, Some(42));
        assert_eq!(outcome.bandwidth_gbps, None);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_generator_config_schema() {
        let paths = SimPaths::for_root("/opt/DRAMSys");
        let config = SimulationConfig::build(&paths, TraceMode::Generator, &genome(), "g0i1");
        let value = serde_json::to_value(&config).unwrap();

        let sim = &value["simulation"];
        assert_eq!(sim["memspec"], "memspec/JEDEC_4Gb_DDR4-2400_8bit_A.json");
        assert_eq!(sim["simconfig"], "simconfig/example.json");
        assert_eq!(sim["simulationid"], "g0i1");

        let trace = &sim["tracesetup"][0];
        assert_eq!(trace["type"], "generator");
        assert_eq!(trace["clkMhz"], 1000);
        assert_eq!(trace["numRequests"], 50000);
        assert_eq!(trace["rwRatio"], 0.9);
        assert_eq!(trace["addressDistribution"], "random");
        assert_eq!(trace["minAddress"], 0);
        assert_eq!(trace["maxAddress"], 4294967295u64);
        assert_eq!(trace["name"], "gen_g0i1");
    }

    #[test]
    fn test_player_config_schema() {
        let paths = SimPaths::for_root("/opt/DRAMSys");
        let config = SimulationConfig::build(&paths, TraceMode::Player, &genome(), "g2i7");
        let value = serde_json::to_value(&config).unwrap();

        let trace = &value["simulation"]["tracesetup"][0];
        assert_eq!(trace["type"], "player");
        assert_eq!(trace["name"], "traces/resnet50_synthetic.stl");
        assert_eq!(trace["clkMhz"], 1000);
        assert!(trace.get("numRequests").is_none());
    }

    #[test]
    fn test_launch_failure_is_folded_and_config_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sim = test_adapter(
            dir.path().to_path_buf(),
            PathBuf::from("/nonexistent/DRAMSys"),
            Duration::from_secs(1),
        );

        let outcome = sim.evaluate(&genome(), "g0i0");
        assert!(!outcome.is_success());
        assert_eq!(outcome, EvalOutcome::failure());

        // Transient config must be cleaned up on the failure path too.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake_dramsys.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_invocation_parses_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo 'Total Time:  4321 ps'; echo 'AVG BW:  12.50 GB/s'",
        );
        let sim = test_adapter(dir.path().to_path_buf(), script, Duration::from_secs(10));

        let outcome = sim.evaluate(&genome(), "g1i2");
        assert_eq!(outcome.total_time_ps, Some(4321));
        assert_eq!(outcome.bandwidth_gbps, Some(12.50));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_simulator() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 30");
        let sim = test_adapter(dir.path().to_path_buf(), script, Duration::from_millis(200));

        let start = Instant::now();
        let outcome = sim.evaluate(&genome(), "g0i3");
        assert!(!outcome.is_success());
        // The child was killed at its deadline, not left to run out.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'Total Time: 99 ps'; exit 3");
        let sim = test_adapter(dir.path().to_path_buf(), script, Duration::from_secs(10));

        let outcome = sim.evaluate(&genome(), "g0i4");
        assert!(!outcome.is_success());
    }
}
