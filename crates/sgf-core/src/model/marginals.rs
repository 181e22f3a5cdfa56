//! Marginals (seedless) generative model (SPEC_FULL.md §4.2.2): one independent
//! Dirichlet-multinomial per attribute, no conditioning on other attributes.

use crate::metadata::Metadata;
use crate::record::Record;
use crate::rng::Prng;
use crate::store::RecordStore;

use super::{BudgetConfig, Constraint, CountEngine, GenerativeModel};

pub struct MarginalsModel<'a> {
    metadata: &'a Metadata,
    engine: CountEngine<'a>,
    uniform: bool,
}

impl<'a> MarginalsModel<'a> {
    pub fn new(metadata: &'a Metadata, stats: &'a RecordStore, alpha: f64, budget: BudgetConfig, uniform: bool) -> crate::error::Result<Self> {
        let engine = CountEngine::new(metadata, stats, alpha, budget, metadata.attr_count() as u32)?;
        Ok(MarginalsModel { metadata, engine, uniform })
    }
}

impl<'a> GenerativeModel for MarginalsModel<'a> {
    fn propose(&self, prng: &mut Prng, _seed: Option<&Record>) -> Record {
        let a = self.metadata.attr_count();
        let mut fake = Record::new(0, a);
        for j in 0..a {
            let vc = self.engine.count(prng, j, &[] as &[Constraint]);
            let v = if self.uniform {
                prng.uniform_int(0, vc.len() as i64 - 1) as usize
            } else {
                prng.dirichlet_multinomial_sample(&vc)
            };
            fake.set(j, v as u16);
        }
        fake
    }

    fn pdf(&self, _seed: Option<&Record>, fake: &Record) -> f64 {
        let mut scratch = Prng::new(1);
        let mut acc = 0.0;
        for j in 0..self.metadata.attr_count() {
            let vc = self.engine.count(&mut scratch, j, &[] as &[Constraint]);
            let idx = fake.get(j) as usize;
            let p = if self.uniform {
                1.0 / vc.len() as f64
            } else {
                crate::mathutils::dirichlet_multinomial_expected_pmf(&vc, idx)
            };
            acc += p.ln();
        }
        acc
    }

    fn is_seedless(&self) -> bool {
        true
    }

    fn shutdown(&self) {
        if let Err(e) = self.engine.check_budget(self.metadata.attr_count() as u32) {
            e.into_panic();
        }
        self.engine.shutdown_log("marginals");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BudgetConfig, NoiseDist};

    fn toy_metadata() -> Metadata {
        let dir = std::env::temp_dir().join(format!("sgf-marginals-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ds_attrs.csv"), "a,v1,v2\nb,v1,v2\n").unwrap();
        std::fs::write(dir.join("ds_dag.csv"), "1.0\n1.0\n").unwrap();
        std::fs::write(dir.join("ds_order.csv"), "1\n2\n").unwrap();
        std::fs::write(dir.join("ds_grps.csv"), "1,2\n1,2\n").unwrap();
        Metadata::load(&dir.join("ds"), 2).unwrap()
    }

    fn toy_store() -> RecordStore {
        let mut m = crate::record::RecordMatrix::new(2);
        for _ in 0..80 {
            m.push_row(&[0, 0]);
        }
        for _ in 0..20 {
            m.push_row(&[1, 1]);
        }
        RecordStore::in_memory(m.clone(), m)
    }

    #[test]
    fn is_seedless_is_always_true() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        let model = MarginalsModel::new(&md, &store, 1.0, budget, false).unwrap();
        assert!(model.is_seedless());
    }

    #[test]
    fn propose_matches_training_marginal_roughly() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        let model = MarginalsModel::new(&md, &store, 1.0, budget, false).unwrap();
        let mut prng = Prng::new(1);
        let mut zeros = 0;
        let n = 2000;
        for _ in 0..n {
            let fake = model.propose(&mut prng, None);
            if fake.get(0) == 0 {
                zeros += 1;
            }
        }
        let frac = zeros as f64 / n as f64;
        assert!((frac - 0.8).abs() < 0.1, "frac={frac}");
    }
}
