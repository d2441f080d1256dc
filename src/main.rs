//! DRAM Configuration Tuner - Command Line Interface
//!
//! Usage:
//!   dram-tune optimize [OPTIONS]    Run the genetic search
//!   dram-tune compare [OPTIONS]     Evaluate fixed configurations, no evolution
//!   dram-tune info [OPTIONS]        Show the search space

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use dram_tuner::prelude::*;
use dram_tuner::results::RunInfo;
use dram_tuner::{format_gbps, format_picos};

#[derive(Parser)]
#[command(name = "dram-tune")]
#[command(about = "Genetic-algorithm search for optimal DRAM configurations, driven by DRAMSys")]
#[command(version)]
struct Cli {
    /// Output results in JSON format (for machine parsing)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the genetic search
    Optimize {
        /// Parameter sub-space to search: hardware, workload, or full
        #[arg(short, long, default_value = "full")]
        scope: String,

        /// Individuals per generation (defaults to the scope profile)
        #[arg(short, long)]
        population: Option<usize>,

        /// Number of generations
        #[arg(short, long)]
        generations: Option<usize>,

        /// Top individuals carried unchanged into the next generation
        #[arg(long)]
        elite: Option<usize>,

        /// Per-parameter mutation probability (0.0 - 1.0)
        #[arg(long)]
        mutation_rate: Option<f64>,

        /// Per-evaluation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Concurrent simulator invocations
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Never evaluate the same parameter tuple twice
        #[arg(long)]
        dedup: bool,

        /// DRAMSys installation root (binary at build/bin/DRAMSys)
        #[arg(long)]
        dramsys_root: Option<PathBuf>,

        /// Directory for result records
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        /// Load simulator paths and GA parameters from a TOML file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Evaluate the stock comparison configurations
    Compare {
        /// Per-evaluation timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// DRAMSys installation root
        #[arg(long)]
        dramsys_root: Option<PathBuf>,

        /// Directory for result records
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },

    /// Show the search space
    Info {
        /// Parameter sub-space: hardware, workload, or full
        #[arg(short, long, default_value = "full")]
        scope: String,
    },
}

static SIGINT: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    // Only the flag store here: the engine notices it between evaluations.
    SIGINT.store(true, std::sync::atomic::Ordering::SeqCst);
}

fn install_signal_handler() {
    #[cfg(unix)]
    unsafe {
        let handler: extern "C" fn(libc::c_int) = handle_sigint;
        let _ = libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

fn main() {
    env_logger::init();
    install_signal_handler();
    let cli = Cli::parse();
    let json = cli.json;

    match cli.command {
        Commands::Optimize {
            scope,
            population,
            generations,
            elite,
            mutation_rate,
            timeout,
            jobs,
            dedup,
            dramsys_root,
            results_dir,
            config,
        } => {
            let scope = parse_scope(&scope, json);
            let overrides = ParamOverrides {
                population,
                generations,
                elite,
                mutation_rate,
                timeout,
                jobs,
                dedup,
            };
            run_optimize(scope, overrides, dramsys_root, results_dir, config, json);
        }
        Commands::Compare {
            timeout,
            dramsys_root,
            results_dir,
        } => {
            run_compare(timeout, dramsys_root, results_dir, json);
        }
        Commands::Info { scope } => {
            let scope = parse_scope(&scope, json);
            show_info(scope, json);
        }
    }
}

fn parse_scope(scope: &str, json: bool) -> SearchScope {
    match scope {
        "hardware" => SearchScope::Hardware,
        "workload" => SearchScope::Workload,
        "full" => SearchScope::Full,
        other => fatal(
            json,
            &format!("unknown scope '{}'. Valid scopes: hardware, workload, full", other),
        ),
    }
}

fn fatal(json: bool, message: &str) -> ! {
    if json {
        eprintln!("{}", serde_json::json!({ "error": message }));
    } else {
        eprintln!("{}: {}", "Error".red(), message);
    }
    std::process::exit(1);
}

struct ParamOverrides {
    population: Option<usize>,
    generations: Option<usize>,
    elite: Option<usize>,
    mutation_rate: Option<f64>,
    timeout: Option<u64>,
    jobs: Option<usize>,
    dedup: bool,
}

/// JSON output structure for optimization results
#[derive(serde::Serialize)]
struct OptimizeOutput<'a> {
    scope: SearchScope,
    space_size: usize,
    population_size: usize,
    generations_run: usize,
    total_evaluations: usize,
    unique_configs: usize,
    cancelled: bool,
    best: Option<&'a Individual>,
    progress: Vec<f64>,
}

fn run_optimize(
    scope: SearchScope,
    overrides: ParamOverrides,
    dramsys_root: Option<PathBuf>,
    results_dir: PathBuf,
    config: Option<PathBuf>,
    json: bool,
) {
    // Scope profile first, then the optional config file, then CLI flags.
    let profile = match scope {
        SearchScope::Hardware => GaParams::hardware_profile(),
        SearchScope::Workload => GaParams::workload_profile(),
        SearchScope::Full => GaParams::full_profile(),
    };

    let (mut params, mut paths) = match config {
        Some(path) => match RunConfig::load(&path) {
            Ok(run_config) => (run_config.ga, run_config.paths),
            Err(err) => fatal(json, &err.to_string()),
        },
        None => (profile, SimPaths::default()),
    };
    if let Some(root) = dramsys_root {
        paths = SimPaths::for_root(root);
    }

    if let Some(population) = overrides.population {
        params.population_size = population;
    }
    if let Some(generations) = overrides.generations {
        params.generations = generations;
    }
    if let Some(elite) = overrides.elite {
        params.elite_count = elite;
    }
    if let Some(rate) = overrides.mutation_rate {
        params.mutation_rate = rate;
    }
    if let Some(timeout) = overrides.timeout {
        params.timeout_secs = timeout;
    }
    if let Some(jobs) = overrides.jobs {
        params.jobs = jobs.max(1);
    }
    if overrides.dedup {
        params.dedup = true;
    }

    if params.population_size == 0 || params.generations == 0 {
        fatal(json, "population and generations must be at least 1");
    }
    if !(0.0..=1.0).contains(&params.mutation_rate) {
        fatal(json, "mutation rate must be between 0.0 and 1.0");
    }

    let space = SearchSpace::new(scope);
    if let Err(err) = space.validate() {
        fatal(json, &err.to_string());
    }

    if !json {
        println!("{}", "╔══════════════════════════════════════════════════════════════╗".cyan());
        println!("{}", "║            DRAM Configuration Tuner                          ║".cyan());
        println!("{}", "╚══════════════════════════════════════════════════════════════╝".cyan());
        println!();
        println!("Configuration:");
        println!("  • Scope: {} ({} parameters)", scope, space.active_parameters().len());
        println!("  • Search space: {} configurations", space.size());
        println!("  • Population: {}", params.population_size);
        println!("  • Generations: {}", params.generations);
        println!("  • Elite: {}", params.elite_count);
        println!("  • Mutation rate: {}", params.mutation_rate);
        println!("  • Timeout: {}s per evaluation", params.timeout_secs);
        println!("  • Simulator: {}", paths.binary.display());
        println!();
        println!("{}", "Running genetic search (Ctrl-C stops after in-flight evaluations)...".yellow());
    }

    // Hardware-only runs replay the reference trace; anything that varies
    // the workload drives the synthetic generator.
    let mode = match scope {
        SearchScope::Hardware => TraceMode::Player,
        _ => TraceMode::Generator,
    };
    let sim = DramSys::new(paths.clone(), mode, params.timeout());

    let mut store = match ResultStore::create(&results_dir) {
        Ok(store) => store,
        Err(err) => fatal(json, &err.to_string()),
    };

    let total_generations = params.generations;
    let mut engine = GeneticEngine::new(&space, params.clone(), &sim, CancelToken::new(&SIGINT));

    let result = engine.run_with_observer(|record| {
        store.record_generation(record)?;
        if !json {
            print_generation(record, total_generations);
        }
        Ok(())
    });

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => fatal(json, &err.to_string()),
    };

    let info = RunInfo {
        scope,
        population_size: params.population_size,
        generations: params.generations,
    };
    let summary_path = match store.write_summary(&outcome, &info) {
        Ok(path) => path,
        Err(err) => fatal(json, &err.to_string()),
    };

    let best_config_path = match &outcome.best {
        Some(best) => match store.export_best_config(&paths, mode, &best.genome) {
            Ok(path) => Some(path),
            Err(err) => fatal(json, &err.to_string()),
        },
        None => None,
    };

    if json {
        let output = OptimizeOutput {
            scope,
            space_size: space.size(),
            population_size: params.population_size,
            generations_run: outcome.generations.len(),
            total_evaluations: outcome.total_evaluations,
            unique_configs: outcome.unique_configs,
            cancelled: outcome.cancelled,
            best: outcome.best.as_ref(),
            progress: outcome
                .generations
                .iter()
                .filter_map(|g| g.best_ever.as_ref().map(|b| b.fitness))
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
        if outcome.best.is_none() {
            std::process::exit(2);
        }
        return;
    }

    println!();
    if outcome.cancelled {
        println!("{}", "Search cancelled - reporting best so far.".yellow());
    } else {
        println!("{}", "Optimization complete!".green());
    }
    println!();

    match &outcome.best {
        Some(best) => {
            println!("{}", "BEST CONFIGURATION FOUND".green());
            println!("──────────────────────────────────────────────────────────────");
            println!("  Total time:       {}", format_picos(best.fitness));
            println!("  Bandwidth:        {}", format_gbps(best.bandwidth));
            println!("  Memory spec:      {}", best.genome.memspec);
            println!("  Address mapping:  {}", best.genome.addressmapping);
            println!("  MC config:        {}", best.genome.mcconfig);
            if scope != SearchScope::Hardware {
                println!("  Clock:            {} MHz", best.genome.clk_mhz);
                println!("  Requests:         {}", best.genome.num_requests);
                println!("  Read/write ratio: {:.2}", best.genome.rw_ratio);
                println!("  Address pattern:  {}", best.genome.address_distribution);
            }
            println!();
            println!(
                "Evaluations: {} total, {} unique configurations",
                outcome.total_evaluations, outcome.unique_configs
            );
            println!("Results saved to: {}", summary_path.display());
            if let Some(path) = best_config_path {
                println!("Best config (simulator-ready): {}", path.display());
            }
        }
        None => {
            println!("{}", "No valid configuration found.".red());
            println!("Every evaluation failed - check the simulator installation");
            println!("and RUST_LOG=warn output for per-evaluation failure details.");
            println!("Results saved to: {}", summary_path.display());
            std::process::exit(2);
        }
    }
}

fn print_generation(record: &GenerationRecord, total: usize) {
    let best = record
        .best
        .as_ref()
        .map_or_else(|| "-".to_string(), |b| format_picos(b.fitness));
    let best_ever = record
        .best_ever
        .as_ref()
        .map_or_else(|| "-".to_string(), |b| format_picos(b.fitness));

    let line = format!(
        "generation {:>2}/{}: {:>2} ok | best {} | best ever {}",
        record.generation, total, record.successes, best, best_ever
    );
    if record.successes == 0 {
        println!("{}", line.red());
    } else {
        println!("{}", line);
    }
}

fn run_compare(timeout: u64, dramsys_root: Option<PathBuf>, results_dir: PathBuf, json: bool) {
    let paths = dramsys_root.map_or_else(SimPaths::default, SimPaths::for_root);
    let sim = DramSys::new(
        paths,
        TraceMode::Generator,
        std::time::Duration::from_secs(timeout),
    );
    let presets = ConfigComparison::presets();

    if !json {
        println!("{}", "╔══════════════════════════════════════════════════════════════╗".cyan());
        println!("{}", "║            DRAM Configuration Comparison                     ║".cyan());
        println!("{}", "╚══════════════════════════════════════════════════════════════╝".cyan());
        println!();
        println!("Evaluating {} fixed configurations:", presets.len());
        for preset in &presets {
            println!("  • {}", preset.name);
        }
        println!();
        println!("{}", "Running simulations...".yellow());
        println!();
    }

    let comparison = ConfigComparison::run(&presets, &sim);

    let out_path = results_dir.join("config_comparison.json");
    if let Err(err) = std::fs::create_dir_all(&results_dir)
        .and_then(|_| {
            std::fs::write(
                &out_path,
                serde_json::to_string_pretty(&comparison).unwrap_or_default(),
            )
        })
    {
        fatal(json, &format!("failed to write {}: {}", out_path.display(), err));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&comparison).unwrap());
    } else {
        println!("{}", comparison.report());
        println!("Detailed results saved to: {}", out_path.display());
    }
}

/// JSON output for search-space info
#[derive(serde::Serialize)]
struct SpaceInfo {
    scope: SearchScope,
    active_parameters: Vec<&'static str>,
    space_size: usize,
    memspecs: usize,
    addressmappings: usize,
    mcconfigs: usize,
    clk_options: usize,
    request_counts: usize,
    rw_ratios: usize,
    address_distributions: usize,
}

fn show_info(scope: SearchScope, json: bool) {
    let space = SearchSpace::new(scope);

    if json {
        let info = SpaceInfo {
            scope,
            active_parameters: space.active_parameters(),
            space_size: space.size(),
            memspecs: space.hardware.memspecs.len(),
            addressmappings: space.hardware.addressmappings.len(),
            mcconfigs: space.hardware.mcconfigs.len(),
            clk_options: space.workload.clk_mhz.len(),
            request_counts: space.workload.num_requests.len(),
            rw_ratios: space.workload.rw_ratio.len(),
            address_distributions: space.workload.address_distribution.len(),
        };
        println!("{}", serde_json::to_string_pretty(&info).unwrap());
        return;
    }

    println!("{}", "╔══════════════════════════════════════════════════════════════╗".cyan());
    println!("{}", "║            Search Space Information                          ║".cyan());
    println!("{}", "╚══════════════════════════════════════════════════════════════╝".cyan());
    println!();
    println!("Scope: {}", scope);
    println!("Active parameters: {}", space.active_parameters().join(", "));
    println!();

    if space.scope.hardware_active() {
        println!("{}", "Hardware candidates:".yellow());
        println!("  • Memory specs: {}", space.hardware.memspecs.len());
        for memspec in &space.hardware.memspecs {
            println!("      {}", memspec);
        }
        println!("  • Address mappings: {}", space.hardware.addressmappings.len());
        println!("  • Controller policies: {}", space.hardware.mcconfigs.len());
        println!();
    }
    if space.scope.workload_active() {
        println!("{}", "Workload candidates:".yellow());
        println!("  • Clock options: {:?} MHz", space.workload.clk_mhz);
        println!("  • Request counts: {:?}", space.workload.num_requests);
        println!("  • Read/write ratios: {:?}", space.workload.rw_ratio);
        println!(
            "  • Address distributions: {}",
            space
                .workload
                .address_distribution
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!();
    }
    println!("Total search space: {} configurations", space.size());
}
