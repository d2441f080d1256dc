//! Genetic Engine Module
//!
//! The generational search loop: population initialization, fitness
//! evaluation through an [`Evaluator`], tournament selection, uniform
//! crossover, per-parameter mutation, elitism, and best-ever tracking.
//! One engine serves every run profile; the active [`SearchSpace`] decides
//! which parameters evolve.

use log::{info, warn};
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::config::GaParams;
use crate::results::PersistenceError;
use crate::simulator::{EvalOutcome, Evaluator};
use crate::space::{Genome, SearchSpace, SpaceError};

/// One candidate configuration plus its evaluation outcome.
///
/// `fitness` is the simulated completion time in picoseconds and is only
/// trusted when `success` is true; unevaluated and failed individuals both
/// carry the infinite sentinel, which ranks them below every successful
/// one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub genome: Genome,
    pub fitness: f64,
    pub bandwidth: f64,
    pub success: bool,
    /// Whether an evaluation already ran; elite carry-overs keep their
    /// completed result and are never re-run.
    #[serde(skip)]
    pub evaluated: bool,
}

impl Individual {
    pub fn unevaluated(genome: Genome) -> Self {
        Individual {
            genome,
            fitness: f64::INFINITY,
            bandwidth: 0.0,
            success: false,
            evaluated: false,
        }
    }

    pub fn apply(&mut self, outcome: EvalOutcome) {
        self.evaluated = true;
        self.success = outcome.is_success();
        self.fitness = outcome.total_time_ps.map_or(f64::INFINITY, |t| t as f64);
        self.bandwidth = outcome.bandwidth_gbps.unwrap_or(0.0);
    }
}

/// Snapshot taken after each generation's selection phase.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRecord {
    /// 1-based generation index
    pub generation: usize,
    /// Successful evaluations in this generation
    pub successes: usize,
    /// Best individual evaluated this generation, if any succeeded
    pub best: Option<Individual>,
    /// Best individual seen so far across the run
    pub best_ever: Option<Individual>,
}

/// A successful evaluation, tagged with the generation it ran in.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluatedIndividual {
    pub generation: usize,
    #[serde(flatten)]
    pub individual: Individual,
}

/// Final report of a run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Best-ever individual, or `None` if no evaluation ever succeeded
    pub best: Option<Individual>,
    pub generations: Vec<GenerationRecord>,
    /// Every successful evaluation across the run, in order
    pub history: Vec<EvaluatedIndividual>,
    pub total_evaluations: usize,
    pub unique_configs: usize,
    pub cancelled: bool,
}

/// Cooperative cancellation: the engine stops launching evaluations once
/// the flag is set and reports best-so-far.
#[derive(Debug, Clone, Copy)]
pub struct CancelToken(&'static AtomicBool);

static NEVER_CANCELLED: AtomicBool = AtomicBool::new(false);

impl CancelToken {
    pub fn new(flag: &'static AtomicBool) -> Self {
        CancelToken(flag)
    }

    /// A token that never fires.
    pub fn none() -> Self {
        CancelToken(&NEVER_CANCELLED)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks every parameter tuple handed to the evaluator this run.
///
/// Duplicate avoidance is best-effort: sampling retries a bounded number
/// of times, so a nearly exhausted space degrades to tolerated repeats
/// instead of spinning.
#[derive(Debug, Default)]
pub struct SeenConfigs {
    keys: HashSet<String>,
}

impl SeenConfigs {
    pub fn is_new(&self, genome: &Genome) -> bool {
        !self.keys.contains(&genome.key())
    }

    pub fn record(&mut self, genome: &Genome) -> bool {
        self.keys.insert(genome.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// The generational optimizer.
pub struct GeneticEngine<'a, E: Evaluator> {
    space: &'a SearchSpace,
    params: GaParams,
    evaluator: &'a E,
    seen: SeenConfigs,
    cancel: CancelToken,
}

impl<'a, E: Evaluator> GeneticEngine<'a, E> {
    pub fn new(space: &'a SearchSpace, params: GaParams, evaluator: &'a E, cancel: CancelToken) -> Self {
        GeneticEngine {
            space,
            params,
            evaluator,
            seen: SeenConfigs::default(),
            cancel,
        }
    }

    /// Run the full search.
    pub fn run(&mut self) -> Result<RunOutcome, RunError> {
        self.run_with_observer(|_| Ok(()))
    }

    /// Run the full search, handing each generation's record to `observer`
    /// as soon as its selection phase completes (for persistence and
    /// progress reporting). An observer error aborts the run.
    pub fn run_with_observer<F>(&mut self, mut observer: F) -> Result<RunOutcome, RunError>
    where
        F: FnMut(&GenerationRecord) -> Result<(), PersistenceError>,
    {
        self.space.validate()?;

        let mut rng = thread_rng();
        let mut population = self.initial_population(&mut rng);
        let mut best_ever: Option<Individual> = None;
        let mut generations: Vec<GenerationRecord> = Vec::new();
        let mut history: Vec<EvaluatedIndividual> = Vec::new();
        let mut total_evaluations = 0;

        for gen in 0..self.params.generations {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, stopping after generation {}", gen);
                break;
            }

            // Evaluating: every individual bred into this generation either
            // completes or is marked failed before selection starts.
            let evaluated = self.evaluate_population(&mut population, gen);
            total_evaluations += evaluated.len();

            let mut successes = 0;
            for &i in &evaluated {
                if population[i].success {
                    successes += 1;
                    history.push(EvaluatedIndividual {
                        generation: gen + 1,
                        individual: population[i].clone(),
                    });
                }
            }

            // Selecting: failed individuals stay in history but do not breed.
            let mut valid: Vec<Individual> =
                population.iter().filter(|i| i.success).cloned().collect();
            valid.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));

            let best = valid.first().cloned();
            if let Some(b) = &best {
                let improved = best_ever.as_ref().map_or(true, |be| b.fitness < be.fitness);
                if improved {
                    best_ever = Some(b.clone());
                }
            } else {
                warn!("generation {} produced no valid configurations", gen + 1);
            }

            let record = GenerationRecord {
                generation: gen + 1,
                successes,
                best,
                best_ever: best_ever.clone(),
            };
            observer(&record)?;
            generations.push(record);

            // Reproducing (skipped after the final generation).
            if gen + 1 < self.params.generations && !self.cancel.is_cancelled() {
                population = if valid.is_empty() {
                    // Nothing to breed from; restart from fresh samples.
                    self.initial_population(&mut rng)
                } else {
                    self.next_population(&valid, &mut rng)
                };
            }
        }

        Ok(RunOutcome {
            best: best_ever,
            generations,
            history,
            total_evaluations,
            unique_configs: self.seen.len(),
            cancelled: self.cancel.is_cancelled(),
        })
    }

    /// Evaluate every not-yet-evaluated individual, sequentially or on a
    /// bounded worker pool. Returns the indices that completed evaluation.
    fn evaluate_population(&self, population: &mut [Individual], gen: usize) -> Vec<usize> {
        let pending: Vec<(usize, Genome, String)> = population
            .iter()
            .enumerate()
            .filter(|(_, ind)| !ind.evaluated)
            .map(|(i, ind)| (i, ind.genome.clone(), format!("g{}i{}", gen, i)))
            .collect();

        let outcomes: Vec<(usize, Option<EvalOutcome>)> = if self.params.jobs > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.jobs)
                .build()
            {
                Ok(pool) => pool.install(|| {
                    pending
                        .par_iter()
                        .map(|(i, genome, id)| (*i, self.eval_one(genome, id)))
                        .collect()
                }),
                Err(err) => {
                    warn!("worker pool unavailable ({}), evaluating sequentially", err);
                    pending
                        .iter()
                        .map(|(i, genome, id)| (*i, self.eval_one(genome, id)))
                        .collect()
                }
            }
        } else {
            pending
                .iter()
                .map(|(i, genome, id)| (*i, self.eval_one(genome, id)))
                .collect()
        };

        let mut evaluated = Vec::new();
        for (i, outcome) in outcomes {
            let Some(outcome) = outcome else {
                continue; // cancelled before launch, stays unevaluated
            };
            population[i].apply(outcome);
            if population[i].success {
                info!(
                    "g{} #{}: time={} ps bw={:.2} GB/s [{}]",
                    gen,
                    i,
                    population[i].fitness as u64,
                    population[i].bandwidth,
                    population[i].genome.summary()
                );
            }
            evaluated.push(i);
        }
        evaluated
    }

    fn eval_one(&self, genome: &Genome, eval_id: &str) -> Option<EvalOutcome> {
        if self.cancel.is_cancelled() {
            return None;
        }
        Some(self.evaluator.evaluate(genome, eval_id))
    }

    fn initial_population(&mut self, rng: &mut impl Rng) -> Vec<Individual> {
        let mut population = Vec::with_capacity(self.params.population_size);
        for _ in 0..self.params.population_size {
            population.push(Individual::unevaluated(self.sample_new(rng)));
        }
        population
    }

    /// Sample a genome, avoiding already-seen tuples when dedup is on.
    fn sample_new(&mut self, rng: &mut impl Rng) -> Genome {
        let mut genome = self.sample(rng);
        if self.params.dedup {
            let mut attempts = 0;
            while !self.seen.is_new(&genome) && attempts < 64 {
                genome = self.sample(rng);
                attempts += 1;
            }
        }
        self.seen.record(&genome);
        genome
    }

    /// Uniform random sample over the active parameters; frozen parameters
    /// keep the space's baseline values.
    fn sample(&self, rng: &mut impl Rng) -> Genome {
        let mut genome = self.space.baseline.clone();
        if self.space.scope.hardware_active() {
            let hw = &self.space.hardware;
            genome.memspec = hw.memspecs.choose(rng).unwrap().clone();
            genome.addressmapping = hw.addressmappings.choose(rng).unwrap().clone();
            genome.mcconfig = hw.mcconfigs.choose(rng).unwrap().clone();
        }
        if self.space.scope.workload_active() {
            let wl = &self.space.workload;
            genome.clk_mhz = *wl.clk_mhz.choose(rng).unwrap();
            genome.num_requests = *wl.num_requests.choose(rng).unwrap();
            genome.rw_ratio = *wl.rw_ratio.choose(rng).unwrap();
            genome.address_distribution = *wl.address_distribution.choose(rng).unwrap();
        }
        genome
    }

    /// Uniform crossover: each active parameter inherited from either
    /// parent with equal probability.
    fn crossover(&self, p1: &Genome, p2: &Genome, rng: &mut impl Rng) -> Genome {
        let mut child = self.space.baseline.clone();
        if self.space.scope.hardware_active() {
            child.memspec = pick(&p1.memspec, &p2.memspec, rng).clone();
            child.addressmapping = pick(&p1.addressmapping, &p2.addressmapping, rng).clone();
            child.mcconfig = pick(&p1.mcconfig, &p2.mcconfig, rng).clone();
        }
        if self.space.scope.workload_active() {
            child.clk_mhz = *pick(&p1.clk_mhz, &p2.clk_mhz, rng);
            child.num_requests = *pick(&p1.num_requests, &p2.num_requests, rng);
            child.rw_ratio = *pick(&p1.rw_ratio, &p2.rw_ratio, rng);
            child.address_distribution =
                *pick(&p1.address_distribution, &p2.address_distribution, rng);
        }
        child
    }

    /// Each active parameter is independently re-randomized from its
    /// candidate set with probability `mutation_rate`.
    fn mutate(&self, genome: &mut Genome, rng: &mut impl Rng) {
        let rate = self.params.mutation_rate;
        if self.space.scope.hardware_active() {
            let hw = &self.space.hardware;
            if rng.gen_bool(rate) {
                genome.memspec = hw.memspecs.choose(rng).unwrap().clone();
            }
            if rng.gen_bool(rate) {
                genome.addressmapping = hw.addressmappings.choose(rng).unwrap().clone();
            }
            if rng.gen_bool(rate) {
                genome.mcconfig = hw.mcconfigs.choose(rng).unwrap().clone();
            }
        }
        if self.space.scope.workload_active() {
            let wl = &self.space.workload;
            if rng.gen_bool(rate) {
                genome.clk_mhz = *wl.clk_mhz.choose(rng).unwrap();
            }
            if rng.gen_bool(rate) {
                genome.num_requests = *wl.num_requests.choose(rng).unwrap();
            }
            if rng.gen_bool(rate) {
                genome.rw_ratio = *wl.rw_ratio.choose(rng).unwrap();
            }
            if rng.gen_bool(rate) {
                genome.address_distribution = *wl.address_distribution.choose(rng).unwrap();
            }
        }
    }

    /// Best of a small random sample of the valid population.
    fn tournament<'v>(&self, valid: &'v [Individual], rng: &mut impl Rng) -> &'v Individual {
        let k = self.params.tournament_size.clamp(1, valid.len());
        valid
            .choose_multiple(rng, k)
            .min_by(|a, b| a.fitness.total_cmp(&b.fitness))
            .unwrap()
    }

    /// Build the next generation: elite prefix carried verbatim, the rest
    /// bred by tournament selection, crossover, and mutation.
    ///
    /// `valid` must be sorted ascending by fitness.
    fn next_population(&mut self, valid: &[Individual], rng: &mut impl Rng) -> Vec<Individual> {
        let mut next: Vec<Individual> = valid
            .iter()
            .take(self.params.elite_count.min(self.params.population_size))
            .cloned()
            .collect();

        while next.len() < self.params.population_size {
            let p1 = self.tournament(valid, rng).genome.clone();
            let p2 = self.tournament(valid, rng).genome.clone();
            let mut child = self.crossover(&p1, &p2, rng);
            self.mutate(&mut child, rng);

            if self.params.dedup && !self.seen.is_new(&child) {
                // Extra mutation usually escapes an already-tried tuple;
                // fall back to a fresh sample when it does not.
                let mut attempts = 0;
                while !self.seen.is_new(&child) && attempts < 16 {
                    self.mutate(&mut child, rng);
                    attempts += 1;
                }
                if !self.seen.is_new(&child) {
                    child = self.sample(rng);
                }
            }
            self.seen.record(&child);
            next.push(Individual::unevaluated(child));
        }
        next
    }
}

fn pick<'g, T>(a: &'g T, b: &'g T, rng: &mut impl Rng) -> &'g T {
    if rng.gen_bool(0.5) {
        a
    } else {
        b
    }
}
