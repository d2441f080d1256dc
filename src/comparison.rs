//! Configuration Comparison Module
//!
//! The no-evolution alternative to a full tuning run: evaluate a fixed,
//! named list of configurations once each, rank the survivors by total
//! time, and report the improvement over a designated baseline.

use serde::{Deserialize, Serialize};

use crate::simulator::Evaluator;
use crate::space::{AddressDistribution, Genome};
use crate::{format_gbps, format_picos};

/// One entry of a comparison sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedConfig {
    pub name: String,
    pub genome: Genome,
}

/// Evaluation result for one named configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntry {
    pub name: String,
    pub genome: Genome,
    pub total_time_ps: Option<u64>,
    pub bandwidth_gbps: Option<f64>,
    pub success: bool,
}

/// Results of a fixed comparison sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigComparison {
    pub entries: Vec<ComparisonEntry>,
}

impl ConfigComparison {
    /// Evaluate every named configuration once, in order. Failures are
    /// kept in the result set (marked unsuccessful) for the report.
    pub fn run(configs: &[NamedConfig], evaluator: &dyn Evaluator) -> Self {
        let entries = configs
            .iter()
            .map(|cfg| {
                let outcome = evaluator.evaluate(&cfg.genome, &cfg.name);
                ComparisonEntry {
                    name: cfg.name.clone(),
                    genome: cfg.genome.clone(),
                    total_time_ps: outcome.total_time_ps,
                    bandwidth_gbps: outcome.bandwidth_gbps,
                    success: outcome.is_success(),
                }
            })
            .collect();
        ConfigComparison { entries }
    }

    /// Successful entries, fastest first.
    pub fn ranked(&self) -> Vec<&ComparisonEntry> {
        let mut ranked: Vec<&ComparisonEntry> =
            self.entries.iter().filter(|e| e.success).collect();
        ranked.sort_by_key(|e| e.total_time_ps);
        ranked
    }

    /// The designated baseline: the first entry whose name contains
    /// `baseline`.
    pub fn baseline(&self) -> Option<&ComparisonEntry> {
        self.entries.iter().find(|e| e.name.contains("baseline"))
    }

    /// Percentage improvement of the fastest entry over the baseline.
    pub fn improvement_over_baseline(&self) -> Option<f64> {
        let baseline = self.baseline().and_then(|b| b.total_time_ps)?;
        let best = self.ranked().first().and_then(|b| b.total_time_ps)?;
        Some((baseline as f64 - best as f64) / baseline as f64 * 100.0)
    }

    /// Human-readable ranking report.
    pub fn report(&self) -> String {
        let mut report = String::new();
        report.push_str("RANKED BY TOTAL TIME (lower is better)\n");
        report.push_str("────────────────────────────────────────────────────────────\n");

        let ranked = self.ranked();
        for (i, entry) in ranked.iter().enumerate() {
            report.push_str(&format!(
                "{:>2}. {:<24} {:>20} {:>14}\n",
                i + 1,
                entry.name,
                format_picos(entry.total_time_ps.map_or(f64::INFINITY, |t| t as f64)),
                format_gbps(entry.bandwidth_gbps.unwrap_or(0.0)),
            ));
        }

        let failed: Vec<&ComparisonEntry> = self.entries.iter().filter(|e| !e.success).collect();
        if !failed.is_empty() {
            report.push('\n');
            report.push_str("FAILED\n");
            for entry in failed {
                report.push_str(&format!("    {:<24} simulation failed\n", entry.name));
            }
        }

        if let Some(improvement) = self.improvement_over_baseline() {
            if let Some(best) = ranked.first() {
                report.push('\n');
                report.push_str(&format!(
                    "best configuration: {}\nimprovement over baseline: {:.2}%\n",
                    best.name, improvement,
                ));
            }
        }

        report
    }

    /// The stock comparison list: DDR4 baseline against a faster bin, a
    /// simpler controller, and an LPDDR4 part.
    pub fn presets() -> Vec<NamedConfig> {
        let workload = |memspec: &str, addressmapping: &str, mcconfig: &str| Genome {
            memspec: memspec.to_string(),
            addressmapping: addressmapping.to_string(),
            mcconfig: mcconfig.to_string(),
            clk_mhz: 1000,
            num_requests: 50_000,
            rw_ratio: 0.9,
            address_distribution: AddressDistribution::Random,
        };

        vec![
            NamedConfig {
                name: "baseline_ddr4_2400".to_string(),
                genome: workload(
                    "memspec/JEDEC_4Gb_DDR4-2400_8bit_A.json",
                    "addressmapping/am_ddr4_8x4Gbx8_dimm_p1KB_brc.json",
                    "mcconfig/fr_fcfs.json",
                ),
            },
            NamedConfig {
                name: "fast_ddr4_3200".to_string(),
                genome: workload(
                    "memspec/JEDEC_4Gb_DDR4-3200_8bit_A.json",
                    "addressmapping/am_ddr4_8x4Gbx8_dimm_p1KB_brc.json",
                    "mcconfig/fr_fcfs.json",
                ),
            },
            NamedConfig {
                name: "ddr4_2400_fifo".to_string(),
                genome: workload(
                    "memspec/JEDEC_4Gb_DDR4-2400_8bit_A.json",
                    "addressmapping/am_ddr4_8x4Gbx8_dimm_p1KB_brc.json",
                    "mcconfig/fifo.json",
                ),
            },
            NamedConfig {
                name: "lpddr4_fast".to_string(),
                genome: workload(
                    "memspec/JEDEC_LPDDR4_8Gb_die_x16_3200.json",
                    "addressmapping/am_lpddr4_8Gbx16_brc.json",
                    "mcconfig/fr_fcfs.json",
                ),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::EvalOutcome;

    /// Stub: fitness derived from the memspec name length so the ranking
    /// is predictable; one named entry always fails.
    struct StubEval;

    impl Evaluator for StubEval {
        fn evaluate(&self, genome: &Genome, eval_id: &str) -> EvalOutcome {
            if eval_id == "lpddr4_fast" {
                return EvalOutcome::failure();
            }
            let time = match genome.mcconfig.as_str() {
                "mcconfig/fifo.json" => 3_000,
                _ if genome.memspec.contains("3200") => 1_000,
                _ => 2_000,
            };
            EvalOutcome {
                total_time_ps: Some(time),
                bandwidth_gbps: Some(16.0),
            }
        }
    }

    #[test]
    fn test_ranking_orders_by_total_time() {
        let comparison = ConfigComparison::run(&ConfigComparison::presets(), &StubEval);
        let ranked = comparison.ranked();

        assert_eq!(ranked.len(), 3, "failed entry is excluded from ranking");
        assert_eq!(ranked[0].name, "fast_ddr4_3200");
        assert_eq!(ranked[1].name, "baseline_ddr4_2400");
        assert_eq!(ranked[2].name, "ddr4_2400_fifo");
    }

    #[test]
    fn test_improvement_over_baseline() {
        let comparison = ConfigComparison::run(&ConfigComparison::presets(), &StubEval);
        // baseline 2000 ps, best 1000 ps -> 50% faster
        let improvement = comparison.improvement_over_baseline().unwrap();
        assert!((improvement - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_mentions_every_entry() {
        let comparison = ConfigComparison::run(&ConfigComparison::presets(), &StubEval);
        let report = comparison.report();

        assert!(report.contains("fast_ddr4_3200"));
        assert!(report.contains("baseline_ddr4_2400"));
        assert!(report.contains("lpddr4_fast"));
        assert!(report.contains("simulation failed"));
        assert!(report.contains("improvement over baseline: 50.00%"));
    }

    #[test]
    fn test_no_baseline_means_no_improvement_figure() {
        let configs = vec![NamedConfig {
            name: "only_entry".to_string(),
            genome: ConfigComparison::presets()[0].genome.clone(),
        }];
        let comparison = ConfigComparison::run(&configs, &StubEval);
        assert!(comparison.improvement_over_baseline().is_none());
    }
}
