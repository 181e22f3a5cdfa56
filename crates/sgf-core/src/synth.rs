//! Synthesizer: seed selection, candidate generation, equivalence-class
//! assignment, plausible-seed counting, runtime/count bounding (SPEC_FULL.md
//! §4.3).

use std::cell::RefCell;
use std::time::{Duration, Instant};

use tracing::info;

use crate::mathutils::prob_class;
use crate::model::{GenerativeModel, Model};
use crate::record::Record;
use crate::rng::Prng;
use crate::rtm::Rtm;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy)]
pub struct SynthParams {
    pub gamma: f64,
    pub fakes_per_seed: u32,
    pub count: u64,
    pub runtime: Duration,
    /// `0` means unlimited (SPEC_FULL.md §9 Open Questions).
    pub max_check_ps: u64,
    /// `0` means unlimited.
    pub max_ps: u64,
    pub random_ps_order: bool,
}

/// Per-fake synthesis properties attached at emission (SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct SynthProps {
    pub gamma: f64,
    pub ec_idx: i32,
    pub density: f64,
    pub ps_count: u64,
}

pub struct Synthesizer<'a> {
    model: &'a Model,
    training: &'a RecordStore,
    params: SynthParams,
    rtm: RefCell<Rtm>,
}

impl<'a> Synthesizer<'a> {
    pub fn new(model: &'a Model, training: &'a RecordStore, params: SynthParams) -> Self {
        Synthesizer { model, training, params, rtm: RefCell::new(Rtm::new()) }
    }

    /// Runs the main synthesis loop, calling `emit` for every `(seed, fake,
    /// props)` triple produced, until `count` is reached or `runtime` elapses.
    /// Per-fake wall time and plausible-seed scan depth are recorded into this
    /// synthesizer's [`Rtm`]; call [`Synthesizer::dump_rtm`] once `run` returns
    /// to log the summarized series.
    pub fn run<F: FnMut(Option<&Record>, &Record, &SynthProps)>(&self, prng: &mut Prng, mut emit: F) {
        let start = Instant::now();
        let mut produced: u64 = 0;
        let n_train = self.training.records.rows();
        while produced < self.params.count {
            if start.elapsed() > self.params.runtime {
                info!(produced, "synthesis runtime bound reached, stopping cleanly");
                break;
            }
            let seed_record = if self.model.is_seedless() {
                None
            } else {
                let idx = prng.uniform_int(0, n_train as i64 - 1) as usize;
                Some(Record::from_values(idx as u32, self.training.records.row(idx).to_vec()))
            };

            for _ in 0..self.params.fakes_per_seed {
                let fake_start = Instant::now();
                let fake = self.model.propose(prng, seed_record.as_ref());
                let (density, ec_idx, ps_count) = if self.model.is_seedless() {
                    // Seedless shortcut (SPEC_FULL.md §4.3): density is reported
                    // as 0 on the log scale and the whole training set counts as
                    // plausible seeds, without walking it.
                    (0.0_f64, prob_class(0.0, self.params.gamma), n_train as u64)
                } else {
                    let density = self.model.pdf(seed_record.as_ref(), &fake);
                    let ec = prob_class(density, self.params.gamma);
                    let (found, scanned) = self.count_plausible_seeds(prng, &fake, ec);
                    self.rtm.borrow_mut().add("synth.ps_scanned", scanned as f64);
                    (density, ec, found)
                };
                self.rtm.borrow_mut().add("synth.fake_us", fake_start.elapsed().as_micros() as f64);
                let props = SynthProps { gamma: self.params.gamma, ec_idx, density, ps_count };
                emit(seed_record.as_ref(), &fake, &props);
                produced += 1;
                if produced >= self.params.count {
                    break;
                }
            }
        }
    }

    /// Logs the accumulated per-fake timing/scan-depth series. Call once after
    /// `run` returns, before process exit.
    pub fn dump_rtm(&self) {
        self.rtm.borrow().dump_to_log();
    }

    /// Scans (optionally permuted) training-record indices, evaluating `pdf`
    /// against each as a candidate seed, counting those whose equivalence class
    /// matches the fake's own. Stops at `max_ps` found or `max_check_ps` scanned.
    fn count_plausible_seeds(&self, prng: &mut Prng, fake: &Record, target_class: i32) -> (u64, u64) {
        let n = self.training.records.rows();
        let scan_cap = if self.params.max_check_ps == 0 {
            n
        } else {
            n.min(self.params.max_check_ps as usize)
        };
        let mut indices: Vec<usize> = (0..n).collect();
        if self.params.random_ps_order {
            prng.random_permutation(&mut indices);
        }
        let mut found = 0u64;
        let mut scanned = 0u64;
        for &idx in indices.iter().take(scan_cap) {
            let candidate = Record::from_values(idx as u32, self.training.records.row(idx).to_vec());
            let p = self.model.pdf(Some(&candidate), fake);
            scanned += 1;
            if prob_class(p, self.params.gamma) == target_class {
                found += 1;
                if self.params.max_ps != 0 && found >= self.params.max_ps {
                    break;
                }
            }
        }
        (found, scanned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::model::{BudgetConfig, NoiseDist};
    use crate::model::seedbased::SeedBasedModel;
    use crate::record::RecordMatrix;

    fn toy_metadata() -> Metadata {
        let dir = std::env::temp_dir().join(format!("sgf-synth-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ds_attrs.csv"), "a,v1,v2\nb,v1,v2\nc,v1,v2\n").unwrap();
        std::fs::write(dir.join("ds_dag.csv"), "1.0\n1.0\n1.0\n").unwrap();
        std::fs::write(dir.join("ds_order.csv"), "1\n2\n3\n").unwrap();
        std::fs::write(dir.join("ds_grps.csv"), "1,2\n1,2\n1,2\n").unwrap();
        Metadata::load(&dir.join("ds"), 3).unwrap()
    }

    fn toy_store() -> RecordStore {
        let mut m = RecordMatrix::new(3);
        for _ in 0..50 {
            m.push_row(&[0, 0, 0]);
        }
        for _ in 0..50 {
            m.push_row(&[1, 1, 1]);
        }
        RecordStore::in_memory(m.clone(), m)
    }

    #[test]
    fn seed_is_always_a_plausible_seed_for_its_own_fake() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        let model = Model::SeedBased(SeedBasedModel::new(&md, &store, 3, 1.0, budget).unwrap());
        let params = SynthParams {
            gamma: 4.0,
            fakes_per_seed: 1,
            count: 5,
            runtime: Duration::from_secs(5),
            max_check_ps: 0,
            max_ps: 0,
            random_ps_order: false,
        };
        let synth = Synthesizer::new(&model, &store, params);
        let mut prng = Prng::new(1);
        let mut any_checked = false;
        synth.run(&mut prng, |seed, fake, props| {
            any_checked = true;
            assert!(props.density.is_finite());
            assert!(props.ps_count >= 1, "the seed itself must count as a plausible seed");
            let _ = (seed, fake);
        });
        assert!(any_checked);
        synth.dump_rtm();
    }

    #[test]
    fn respects_count_bound() {
        let md = toy_metadata();
        let store = toy_store();
        let budget = BudgetConfig { noise_dist: NoiseDist::None, ..BudgetConfig::default() };
        let model = Model::SeedBased(SeedBasedModel::new(&md, &store, 3, 1.0, budget).unwrap());
        let params = SynthParams {
            gamma: 4.0,
            fakes_per_seed: 3,
            count: 7,
            runtime: Duration::from_secs(5),
            max_check_ps: 0,
            max_ps: 0,
            random_ps_order: false,
        };
        let synth = Synthesizer::new(&model, &store, params);
        let mut prng = Prng::new(2);
        let mut n = 0;
        synth.run(&mut prng, |_, _, _| n += 1);
        assert_eq!(n, 7);
    }
}
