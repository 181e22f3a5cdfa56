//! Seed-based generative model (SPEC_FULL.md §4.2.1): Bayesian-network-style
//! imputation over a per-attribute best feature set, conditioned on the fake
//! record built so far.

use crate::metadata::Metadata;
use crate::record::Record;
use crate::rng::Prng;
use crate::store::RecordStore;

use super::{BudgetConfig, Constraint, CountEngine, GenerativeModel};

pub struct SeedBasedModel<'a> {
    metadata: &'a Metadata,
    /// Suffix of `metadata.order()` of length `omega`: attributes re-sampled by
    /// `propose`. The complementary prefix is copied verbatim from the seed.
    order_to_use: Vec<usize>,
    omega: usize,
    engine: CountEngine<'a>,
}

impl<'a> SeedBasedModel<'a> {
    pub fn new(metadata: &'a Metadata, stats: &'a RecordStore, omega: usize, alpha: f64, budget: BudgetConfig) -> crate::error::Result<Self> {
        let order_to_use = metadata.order_suffix(omega).to_vec();
        let engine = CountEngine::new(metadata, stats, alpha, budget, metadata.attr_count() as u32)?;
        Ok(SeedBasedModel { metadata, order_to_use, omega, engine })
    }

    /// Builds the canonical constraint set for attribute `j`'s BFS, reading
    /// every feature's current value from `fake` (valid for both the
    /// already-resampled and still-seed-copied features, since by the time `j`
    /// is visited the fake already holds seed values on the copy prefix).
    fn constraints_for(&self, fake: &Record, j: usize) -> Vec<Constraint> {
        let mut constraints: Vec<Constraint> = self
            .metadata
            .bfs(j)
            .iter()
            .map(|&a| {
                let v = fake.get(a);
                let grouping = self.metadata.grouping(a);
                let group = grouping.group_of(v);
                Constraint { attr: a, group_members: grouping.members_of_group(group) }
            })
            .collect();
        constraints.sort_by_key(|c| c.attr);
        constraints
    }
}

impl<'a> GenerativeModel for SeedBasedModel<'a> {
    fn propose(&self, prng: &mut Prng, seed: Option<&Record>) -> Record {
        // `omega == attr_count` is the seedless configuration (`is_seedless()`):
        // every attribute is resampled, so there is no copy prefix and `seed`
        // may legitimately be absent.
        assert!(seed.is_some() || self.is_seedless(), "seed-based model requires a seed record");
        let attrs = seed.map(Record::attrs).unwrap_or_else(|| self.metadata.attr_count());
        let mut fake = Record::new(seed.map(|s| s.idx).unwrap_or(0), attrs);
        fake.seed_idx = seed.map(|s| s.idx);
        if let Some(seed) = seed {
            let resampled: std::collections::HashSet<usize> = self.order_to_use.iter().copied().collect();
            for j in 0..seed.attrs() {
                if !resampled.contains(&j) {
                    fake.set(j, seed.get(j));
                }
            }
        }
        for &j in &self.order_to_use {
            let constraints = self.constraints_for(&fake, j);
            let vc = self.engine.count(prng, j, &constraints);
            let v = prng.dirichlet_multinomial_sample(&vc);
            fake.set(j, v as u16);
        }
        fake
    }

    fn pdf(&self, seed: Option<&Record>, fake: &Record) -> f64 {
        assert!(seed.is_some() || self.is_seedless(), "seed-based model requires a seed record");
        if let Some(seed) = seed {
            let resampled: std::collections::HashSet<usize> = self.order_to_use.iter().copied().collect();
            for j in 0..seed.attrs() {
                if !resampled.contains(&j) && seed.get(j) != fake.get(j) {
                    return f64::NEG_INFINITY;
                }
            }
        }
        let mut acc = 0.0;
        for &j in &self.order_to_use {
            let constraints = self.constraints_for(fake, j);
            // `pdf` never draws noise itself; the count vector is already cached
            // from whichever call (propose or an earlier pdf) computed it first.
            // A scratch PRNG is only ever touched if this is the very first
            // lookup of this key, in which case determinism still holds because
            // the seeded-noise protocol keys noise on the canonical string, not
            // on call order.
            let mut scratch = Prng::new(1);
            let vc = self.engine.count(&mut scratch, j, &constraints);
            let idx = fake.get(j) as usize;
            let p = crate::mathutils::dirichlet_multinomial_expected_pmf(&vc, idx);
            acc += p.ln();
        }
        acc
    }

    fn is_seedless(&self) -> bool {
        self.omega == self.metadata.attr_count()
    }

    fn shutdown(&self) {
        if let Err(e) = self.engine.check_budget(self.metadata.attr_count() as u32) {
            e.into_panic();
        }
        self.engine.shutdown_log("seedbased");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BudgetConfig, NoiseDist};

    fn toy_metadata() -> Metadata {
        // 3 attributes, domain 2 each, no BFS dependencies, order = [0,1,2].
        let dir = std::env::temp_dir().join(format!("sgf-seedbased-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ds_attrs.csv"), "a,v1,v2\nb,v1,v2\nc,v1,v2\n").unwrap();
        std::fs::write(dir.join("ds_dag.csv"), "1.0\n1.0\n1.0\n").unwrap();
        std::fs::write(dir.join("ds_order.csv"), "1\n2\n3\n").unwrap();
        std::fs::write(dir.join("ds_grps.csv"), "1,2\n1,2\n1,2\n").unwrap();
        Metadata::load(&dir.join("ds"), 3).unwrap()
    }

    fn toy_store() -> RecordStore {
        let mut m = crate::record::RecordMatrix::new(3);
        for _ in 0..50 {
            m.push_row(&[0, 0, 0]);
        }
        for _ in 0..50 {
            m.push_row(&[1, 1, 1]);
        }
        RecordStore::in_memory(m.clone(), m)
    }

    #[test]
    fn pdf_of_propose_is_finite_and_nonpositive() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        let model = SeedBasedModel::new(&md, &store, 2, 1.0, budget).unwrap();
        let mut prng = Prng::new(7);
        let seed = Record::from_values(0, vec![0, 0, 0]);
        for _ in 0..20 {
            let fake = model.propose(&mut prng, Some(&seed));
            let p = model.pdf(Some(&seed), &fake);
            assert!(p.is_finite());
            assert!(p <= 0.0);
        }
    }

    #[test]
    fn seed_copy_law_holds_for_non_resampled_attributes() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        // omega = 2: order_to_use = last 2 entries = [1, 2] (0-based); attribute
        // 0 is copied from the seed, never resampled.
        let model = SeedBasedModel::new(&md, &store, 2, 1.0, budget).unwrap();
        let seed = Record::from_values(0, vec![0, 0, 0]);
        let mut fake = Record::from_values(0, vec![1, 0, 0]);
        fake.values[0] = 1; // disagree with seed on the non-resampled attribute 0
        assert_eq!(model.pdf(Some(&seed), &fake), f64::NEG_INFINITY);
    }

    #[test]
    fn omega_equal_to_attr_count_is_seedless_and_accepts_no_seed() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        let model = SeedBasedModel::new(&md, &store, 3, 1.0, budget).unwrap();
        assert!(model.is_seedless());
        let mut prng = Prng::new(4);
        let fake = model.propose(&mut prng, None);
        let p = model.pdf(None, &fake);
        assert!(p.is_finite());
        assert!(p <= 0.0);
    }
}
