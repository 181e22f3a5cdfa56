//! Generative model abstraction (SPEC_FULL.md §4.2, §9 "virtual dispatch over
//! `GenerativeModel`"): a trait implemented by the two concrete variants, plus
//! the shared conditional count-vector engine and privacy-budget machinery both
//! variants are built on.

pub mod marginals;
pub mod seedbased;

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::info;

use crate::error::{Result, SgfError};
use crate::mathutils::fnv1_hash;
use crate::metadata::Metadata;
use crate::record::Record;
use crate::rng::Prng;
use crate::store::RecordStore;

/// Minimal seam both models need; see §9 design note. A tagged enum at the
/// synthesizer boundary rather than a trait object, since the set of variants is
/// closed.
pub trait GenerativeModel {
    fn propose(&self, prng: &mut Prng, seed: Option<&Record>) -> Record;
    fn pdf(&self, seed: Option<&Record>, fake: &Record) -> f64;
    fn is_seedless(&self) -> bool;
    fn initialize(&mut self) {}
    fn shutdown(&self) {}
}

/// Tagged dispatch over the two concrete models.
pub enum Model {
    SeedBased(seedbased::SeedBasedModel),
    Marginals(marginals::MarginalsModel),
}

impl GenerativeModel for Model {
    fn propose(&self, prng: &mut Prng, seed: Option<&Record>) -> Record {
        match self {
            Model::SeedBased(m) => m.propose(prng, seed),
            Model::Marginals(m) => m.propose(prng, seed),
        }
    }

    fn pdf(&self, seed: Option<&Record>, fake: &Record) -> f64 {
        match self {
            Model::SeedBased(m) => m.pdf(seed, fake),
            Model::Marginals(m) => m.pdf(seed, fake),
        }
    }

    fn is_seedless(&self) -> bool {
        match self {
            Model::SeedBased(m) => m.is_seedless(),
            Model::Marginals(m) => m.is_seedless(),
        }
    }

    fn initialize(&mut self) {
        match self {
            Model::SeedBased(m) => m.initialize(),
            Model::Marginals(m) => m.initialize(),
        }
    }

    fn shutdown(&self) {
        match self {
            Model::SeedBased(m) => m.shutdown(),
            Model::Marginals(m) => m.shutdown(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseDist {
    None,
    Laplace,
    Geometric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    Sequential,
    Advanced,
}

/// Privacy-budget configuration shared by both model variants (SPEC_FULL.md
/// §4.2.3). `max_advanced_iters` is the configurable cap on the iterative solver
/// (Open Questions, SPEC_FULL.md §9): exhaustion is a `ConfigError`, not a panic.
#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    pub total_eps: f64,
    pub lambda: f64,
    pub noise_dist: NoiseDist,
    pub composition: Composition,
    pub seeded_noise: bool,
    pub max_advanced_iters: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            total_eps: 1.0,
            lambda: 60.0,
            noise_dist: NoiseDist::Laplace,
            composition: Composition::Sequential,
            seeded_noise: true,
            max_advanced_iters: 100_000,
        }
    }
}

/// `calculate_budget`: derives the per-query effective epsilon for `max_queries`
/// independent count-vector queries against `total_eps`. Sequential divides
/// evenly; advanced solves the strong-composition bound iteratively and is used
/// only if it beats sequential.
pub fn calculate_budget(cfg: &BudgetConfig, max_queries: u32) -> Result<f64> {
    let k = max_queries as f64;
    let sequential = cfg.total_eps / k;
    if cfg.composition == Composition::Sequential || k <= 0.0 {
        return Ok(sequential);
    }
    let invlndelta = cfg.lambda / std::f64::consts::LOG2_E;
    let mut candidate = sequential;
    let step = 0.001;
    let mut iters = 0u32;
    loop {
        let target_eps = candidate * (2.0 * k * invlndelta).sqrt() + k * candidate * candidate;
        if target_eps <= cfg.total_eps {
            break;
        }
        candidate -= step;
        iters += 1;
        if candidate <= 0.0 || iters >= cfg.max_advanced_iters {
            return Err(SgfError::config(
                "advanced composition solver did not converge within the iteration cap",
            ));
        }
    }
    // "Automatically use the best composition strategy": prefer whichever
    // candidate yields the larger (less noisy) effective epsilon.
    Ok(candidate.max(sequential))
}

/// A single `(attribute, group-members)` constraint used to build a conditional
/// count-vector key.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub attr: usize,
    pub group_members: Vec<u16>,
}

/// Builds the canonical, sorted-by-attribute-index string key for a constraint
/// set (§9: "preserve the canonical ordering requirement"). Used both as the
/// count-vector cache key and, hashed, as the seeded-noise reseed key.
fn canonical_key(attr: usize, constraints: &[Constraint]) -> String {
    let mut sorted: Vec<&Constraint> = constraints.iter().collect();
    sorted.sort_by_key(|c| c.attr);
    let mut key = format!("j={attr}");
    for c in sorted {
        let mut members = c.group_members.clone();
        members.sort_unstable();
        let members_str = members.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
        key.push_str(&format!("|{}:[{}]", c.attr, members_str));
    }
    key
}

/// Shared conditional count-vector cache and computation (SPEC_FULL.md §4.2.4),
/// used by both model variants. `alpha` is the Dirichlet hyperparameter (config
/// key `dir_hyperp`).
pub struct CountEngine<'a> {
    metadata: &'a Metadata,
    stats: &'a RecordStore,
    alpha: f64,
    budget: BudgetConfig,
    effective_eps: f64,
    cache: RefCell<HashMap<String, Vec<f64>>>,
}

impl<'a> CountEngine<'a> {
    pub fn new(metadata: &'a Metadata, stats: &'a RecordStore, alpha: f64, budget: BudgetConfig, max_queries: u32) -> Result<Self> {
        let effective_eps = calculate_budget(&budget, max_queries)?;
        Ok(CountEngine { metadata, stats, alpha, budget, effective_eps, cache: RefCell::new(HashMap::new()) })
    }

    /// Returns the conditional count vector for `(attr, constraints)`, computing
    /// and caching it on first use.
    pub fn count(&self, prng: &mut Prng, attr: usize, constraints: &[Constraint]) -> Vec<f64> {
        let key = canonical_key(attr, constraints);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }
        let num_vals = self.metadata.attr(attr).domain_size();
        let fill = self.alpha / num_vals as f64;
        let mut counts = vec![fill; num_vals];
        for row in 0..self.stats.stats.rows() {
            let record_row = self.stats.stats.row(row);
            let matches = constraints
                .iter()
                .all(|c| c.group_members.contains(&record_row[c.attr]));
            if matches {
                let v = record_row[attr] as usize;
                if v < num_vals {
                    counts[v] += 1.0;
                }
            }
        }
        self.add_noise(prng, &key, &mut counts, fill);
        self.cache.borrow_mut().insert(key, counts.clone());
        counts
    }

    /// The "seeded noise" protocol: reseed from the canonical key's hash, draw
    /// one noise value per slot, then restore the process seed. Slots are
    /// clamped back up to `fill` if noise pushed them below the Dirichlet prior.
    fn add_noise(&self, prng: &mut Prng, key: &str, counts: &mut [f64], fill: f64) {
        if self.budget.noise_dist == NoiseDist::None {
            return;
        }
        if self.budget.seeded_noise {
            prng.reseed(fnv1_hash(key.as_bytes()));
        }
        for c in counts.iter_mut() {
            let noise = match self.budget.noise_dist {
                NoiseDist::None => 0.0,
                NoiseDist::Laplace => prng.laplace(0.0, 1.0 / self.effective_eps),
                // Assumes sensitivity delta = 1 (SPEC_FULL.md §9 Open Questions).
                NoiseDist::Geometric => prng.geometric_dp((-self.effective_eps).exp()) as f64,
            };
            *c += noise;
            if *c < fill {
                *c = fill;
            }
        }
        if self.budget.seeded_noise {
            prng.reset_to_process_seed();
        }
    }

    pub fn effective_eps(&self) -> f64 {
        self.effective_eps
    }

    /// Per SPEC_FULL.md §7: a budget more than 0.1 below the configured total is
    /// merely worth a warning (the model may simply have fewer queries than
    /// budgeted for); only spending *above* the total is an invariant violation.
    pub fn check_budget(&self, max_queries: u32) -> Result<()> {
        let spent = self.effective_eps * max_queries as f64;
        if spent > self.budget.total_eps + 1e-9 {
            return Err(SgfError::invariant(format!(
                "budget overspend: {spent} > total {}",
                self.budget.total_eps
            )));
        }
        if self.budget.total_eps - spent >= 0.1 {
            tracing::warn!(spent, total = self.budget.total_eps, "recorded privacy budget is significantly under the configured total");
        }
        Ok(())
    }

    pub fn shutdown_log(&self, label: &str) {
        let entries = self.cache.borrow().len();
        let bytes: usize = self
            .cache
            .borrow()
            .values()
            .map(|v| v.len() * std::mem::size_of::<f64>())
            .sum();
        info!(model = label, entries, approx_bytes = bytes, "count-vector cache at shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_budget_divides_evenly() {
        let cfg = BudgetConfig { composition: Composition::Sequential, total_eps: 1.0, ..BudgetConfig::default() };
        let eps = calculate_budget(&cfg, 4).unwrap();
        assert!((eps - 0.25).abs() < 1e-12);
    }

    #[test]
    fn advanced_composition_never_worse_than_sequential() {
        let cfg = BudgetConfig { composition: Composition::Advanced, total_eps: 1.0, lambda: 60.0, ..BudgetConfig::default() };
        let eps = calculate_budget(&cfg, 10).unwrap();
        let seq = 1.0 / 10.0;
        assert!(eps >= seq - 1e-9);
    }

    #[test]
    fn canonical_key_is_order_independent() {
        let a = vec![
            Constraint { attr: 2, group_members: vec![0, 1] },
            Constraint { attr: 0, group_members: vec![3] },
        ];
        let b = vec![
            Constraint { attr: 0, group_members: vec![3] },
            Constraint { attr: 2, group_members: vec![0, 1] },
        ];
        assert_eq!(canonical_key(5, &a), canonical_key(5, &b));
    }
}
