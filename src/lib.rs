//! DRAM Configuration Tuner
//!
//! A genetic-algorithm search engine for DRAM subsystem configurations.
//! The search treats an external cycle-accurate simulator (DRAMSys) as a
//! black-box fitness function: each candidate configuration is written to
//! the simulator's JSON format, the simulator is run with a bounded
//! timeout, and the reported total completion time becomes the fitness
//! (lower is better).
//!
//! # Overview
//!
//! The tuner explores two parameter sub-spaces:
//!
//! - **Hardware**: memory timing spec, address mapping, controller policy
//! - **Workload**: traffic-generator clock, request count, read/write
//!   ratio, address distribution
//!
//! A run may search both sub-spaces, or hold one fixed while searching the
//! other. A fourth mode evaluates a fixed list of named configurations for
//! comparison, with no evolution at all.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dram_tuner::prelude::*;
//!
//! // Describe the search space (defaults cover DDR4 JEDEC specs)
//! let space = SearchSpace::new(SearchScope::Full);
//! space.validate().expect("non-empty candidate sets");
//!
//! // Point the adapter at a DRAMSys installation
//! let paths = SimPaths::for_root("/opt/DRAMSys");
//! let sim = DramSys::new(paths, TraceMode::Generator, std::time::Duration::from_secs(120));
//!
//! // Run the genetic search
//! let params = GaParams::default();
//! let mut engine = GeneticEngine::new(&space, params, &sim, CancelToken::none());
//! let outcome = engine.run().expect("search space is valid");
//!
//! match outcome.best {
//!     Some(best) => println!("best: {} ps", best.fitness),
//!     None => println!("no valid configuration found"),
//! }
//! ```
//!
//! # Architecture
//!
//! - [`space`] — the enumerated parameter space and the typed [`Genome`](space::Genome)
//! - [`simulator`] — the evaluation boundary: config serialization, process
//!   invocation with timeout, output scraping
//! - [`engine`] — population, selection, crossover, mutation, elitism,
//!   deduplication, convergence tracking
//! - [`results`] — durable per-generation records and the final summary
//! - [`comparison`] — fixed-configuration sweep with baseline ranking
//! - [`config`] — injectable run parameters and simulator paths

pub mod comparison;
pub mod config;
pub mod engine;
pub mod results;
pub mod simulator;
pub mod space;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::comparison::{ComparisonEntry, ConfigComparison, NamedConfig};
    pub use crate::config::{GaParams, RunConfig, SimPaths};
    pub use crate::engine::{
        CancelToken, GenerationRecord, GeneticEngine, Individual, RunError, RunOutcome,
    };
    pub use crate::results::{PersistenceError, ResultStore};
    pub use crate::simulator::{DramSys, EvalOutcome, Evaluator, TraceMode};
    pub use crate::space::{AddressDistribution, Genome, SearchScope, SearchSpace, SpaceError};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format a picosecond count with thousands separators, e.g. `1,234,567 ps`.
pub fn format_picos(ps: f64) -> String {
    if !ps.is_finite() {
        return "-".to_string();
    }
    let mut digits = format!("{}", ps as u64);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    while digits.len() > 3 {
        let rest = digits.split_off(digits.len() - 3);
        grouped = if grouped.is_empty() {
            rest
        } else {
            format!("{},{}", rest, grouped)
        };
    }
    grouped = if grouped.is_empty() {
        digits
    } else {
        format!("{},{}", digits, grouped)
    };
    format!("{} ps", grouped)
}

/// Format a bandwidth figure in GB/s, `-` when the simulator reported none.
pub fn format_gbps(bw: f64) -> String {
    if bw > 0.0 {
        format!("{:.2} GB/s", bw)
    } else {
        "-".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_picos_grouping() {
        assert_eq!(format_picos(0.0), "0 ps");
        assert_eq!(format_picos(999.0), "999 ps");
        assert_eq!(format_picos(1000.0), "1,000 ps");
        assert_eq!(format_picos(1234567.0), "1,234,567 ps");
        assert_eq!(format_picos(1000000000.0), "1,000,000,000 ps");
    }

    #[test]
    fn test_format_picos_sentinel() {
        assert_eq!(format_picos(f64::INFINITY), "-");
    }

    #[test]
    fn test_format_gbps() {
        assert_eq!(format_gbps(12.345), "12.35 GB/s");
        assert_eq!(format_gbps(0.0), "-");
    }
}
