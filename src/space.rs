//! Parameter Space Module
//!
//! Defines the tunable parameters of the DRAM subsystem and their discrete
//! candidate values. Two sub-spaces exist: hardware (memory spec, address
//! mapping, controller policy) and workload (traffic-generator clock,
//! request count, read/write ratio, address distribution). A run searches
//! one or both sub-spaces; frozen parameters are held to baseline values.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Address pattern produced by the synthetic traffic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressDistribution {
    Random,
    Sequential,
}

impl fmt::Display for AddressDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressDistribution::Random => write!(f, "random"),
            AddressDistribution::Sequential => write!(f, "sequential"),
        }
    }
}

/// One candidate point in the space: a value for every parameter.
///
/// All seven parameters are always present; the run's [`SearchScope`]
/// decides which of them the genetic operators may touch. Frozen
/// parameters keep the space's baseline values for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    /// Memory timing spec, a relative path into the simulator's config store
    pub memspec: String,
    /// Address mapping, a relative path into the simulator's config store
    pub addressmapping: String,
    /// Memory controller policy, a relative path into the simulator's config store
    pub mcconfig: String,
    /// Traffic clock in MHz
    pub clk_mhz: u32,
    /// Number of requests the traffic generator issues
    pub num_requests: u32,
    /// Fraction of reads among generated requests
    pub rw_ratio: f64,
    /// Generated address pattern
    pub address_distribution: AddressDistribution,
}

impl Genome {
    /// Canonical key over the full parameter tuple, used for deduplication.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{:.2}|{}",
            self.memspec,
            self.addressmapping,
            self.mcconfig,
            self.clk_mhz,
            self.num_requests,
            self.rw_ratio,
            self.address_distribution,
        )
    }

    /// Short human-readable form for progress lines and failure logs.
    /// Config-store paths are reduced to their file names.
    pub fn summary(&self) -> String {
        format!(
            "{}/{}/{} clk={}MHz req={} rw={:.2} {}",
            file_stem(&self.memspec),
            file_stem(&self.addressmapping),
            file_stem(&self.mcconfig),
            self.clk_mhz,
            self.num_requests,
            self.rw_ratio,
            self.address_distribution,
        )
    }
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".json").unwrap_or(name)
}

/// Which sub-space the genetic operators are allowed to vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// Vary memspec/addressmapping/mcconfig; workload frozen
    Hardware,
    /// Vary the traffic-generator parameters; hardware frozen
    Workload,
    /// Vary everything
    Full,
}

impl SearchScope {
    pub fn hardware_active(self) -> bool {
        matches!(self, SearchScope::Hardware | SearchScope::Full)
    }

    pub fn workload_active(self) -> bool {
        matches!(self, SearchScope::Workload | SearchScope::Full)
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Hardware => write!(f, "hardware"),
            SearchScope::Workload => write!(f, "workload"),
            SearchScope::Full => write!(f, "full"),
        }
    }
}

/// Candidate values for the hardware sub-space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareCandidates {
    pub memspecs: Vec<String>,
    pub addressmappings: Vec<String>,
    pub mcconfigs: Vec<String>,
}

impl Default for HardwareCandidates {
    fn default() -> Self {
        HardwareCandidates {
            memspecs: vec![
                "memspec/JEDEC_4Gb_DDR4-1866_8bit_A.json".to_string(),
                "memspec/JEDEC_4Gb_DDR4-2400_8bit_A.json".to_string(),
                "memspec/JEDEC_4Gb_DDR4-2666_8bit_A.json".to_string(),
                "memspec/JEDEC_8Gb_DDR4-1866_8bit_A.json".to_string(),
                "memspec/JEDEC_8Gb_DDR4-2400_8bit_A.json".to_string(),
            ],
            addressmappings: vec![
                "addressmapping/am_ddr4_8x4Gbx8_dimm_p1KB_brc.json".to_string(),
                "addressmapping/am_ddr4_8x4Gbx8_dimm_p1KB_rbc.json".to_string(),
            ],
            mcconfigs: vec![
                "mcconfig/fifo.json".to_string(),
                "mcconfig/fr_fcfs.json".to_string(),
            ],
        }
    }
}

/// Candidate values for the workload sub-space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadCandidates {
    pub clk_mhz: Vec<u32>,
    pub num_requests: Vec<u32>,
    pub rw_ratio: Vec<f64>,
    pub address_distribution: Vec<AddressDistribution>,
}

impl Default for WorkloadCandidates {
    fn default() -> Self {
        WorkloadCandidates {
            clk_mhz: vec![800, 1000, 1200, 1600, 2000],
            num_requests: vec![10_000, 30_000, 50_000, 70_000, 100_000],
            rw_ratio: vec![0.6, 0.7, 0.8, 0.9, 0.95],
            address_distribution: vec![
                AddressDistribution::Random,
                AddressDistribution::Sequential,
            ],
        }
    }
}

/// The full enumerated search space for one run.
///
/// Immutable once built: candidate sets plus a baseline genome supplying
/// the values of whichever parameters the scope freezes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpace {
    pub scope: SearchScope,
    pub hardware: HardwareCandidates,
    pub workload: WorkloadCandidates,
    /// Values for frozen parameters (and the player clock in hardware-only runs)
    pub baseline: Genome,
}

/// A malformed space aborts the run before any evaluation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaceError {
    #[error("parameter '{parameter}' has an empty candidate set")]
    EmptyCandidates { parameter: &'static str },
}

impl SearchSpace {
    /// Space with default candidate sets and baseline for the given scope.
    pub fn new(scope: SearchScope) -> Self {
        SearchSpace {
            scope,
            hardware: HardwareCandidates::default(),
            workload: WorkloadCandidates::default(),
            baseline: Genome {
                memspec: "memspec/JEDEC_4Gb_DDR4-2400_8bit_A.json".to_string(),
                addressmapping: "addressmapping/am_ddr4_8x4Gbx8_dimm_p1KB_brc.json".to_string(),
                mcconfig: "mcconfig/fr_fcfs.json".to_string(),
                clk_mhz: 1000,
                num_requests: 50_000,
                rw_ratio: 0.9,
                address_distribution: AddressDistribution::Random,
            },
        }
    }

    /// Reject any active parameter with an empty candidate set.
    pub fn validate(&self) -> Result<(), SpaceError> {
        fn check<T>(values: &[T], parameter: &'static str) -> Result<(), SpaceError> {
            if values.is_empty() {
                Err(SpaceError::EmptyCandidates { parameter })
            } else {
                Ok(())
            }
        }

        if self.scope.hardware_active() {
            check(&self.hardware.memspecs, "memspec")?;
            check(&self.hardware.addressmappings, "addressmapping")?;
            check(&self.hardware.mcconfigs, "mcconfig")?;
        }
        if self.scope.workload_active() {
            check(&self.workload.clk_mhz, "clkMhz")?;
            check(&self.workload.num_requests, "numRequests")?;
            check(&self.workload.rw_ratio, "rwRatio")?;
            check(&self.workload.address_distribution, "addressDistribution")?;
        }
        Ok(())
    }

    /// Number of distinct points in the active sub-space.
    pub fn size(&self) -> usize {
        let mut size = 1;
        if self.scope.hardware_active() {
            size *= self.hardware.memspecs.len()
                * self.hardware.addressmappings.len()
                * self.hardware.mcconfigs.len();
        }
        if self.scope.workload_active() {
            size *= self.workload.clk_mhz.len()
                * self.workload.num_requests.len()
                * self.workload.rw_ratio.len()
                * self.workload.address_distribution.len();
        }
        size
    }

    /// Names of the parameters the genetic operators may vary.
    pub fn active_parameters(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.scope.hardware_active() {
            names.extend(["memspec", "addressmapping", "mcconfig"]);
        }
        if self.scope.workload_active() {
            names.extend(["clkMhz", "numRequests", "rwRatio", "addressDistribution"]);
        }
        names
    }
}
