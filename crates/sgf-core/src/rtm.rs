//! Runtime measurements: named timing/counter series accumulated during a run
//! and summarized to the log at shutdown (SPEC_FULL.md §4.6). Reimplements the
//! reference's `RTM` singleton as an explicit, owned registry (§9 design note).

use std::collections::HashMap;

use tracing::info;

use crate::mathutils::summarize;

#[derive(Default)]
pub struct Rtm {
    measurements: HashMap<String, Vec<f64>>,
}

impl Rtm {
    pub fn new() -> Self {
        Rtm::default()
    }

    pub fn add(&mut self, name: &str, value: f64) {
        self.measurements.entry(name.to_string()).or_default().push(value);
    }

    /// Logs one summary line per named series, in insertion-independent
    /// (alphabetical) order for reproducible log output.
    pub fn dump_to_log(&self) {
        let mut names: Vec<&String> = self.measurements.keys().collect();
        names.sort();
        for name in names {
            let values = &self.measurements[name];
            let s = summarize(values);
            info!(
                name = name.as_str(),
                n = s.n as u64,
                mean = s.mean,
                std = s.std,
                min = s.min,
                max = s.max,
                sum = s.sum,
                "rtm"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_summarizes() {
        let mut rtm = Rtm::new();
        rtm.add("synth.fake_us", 1.0);
        rtm.add("synth.fake_us", 3.0);
        assert_eq!(rtm.measurements["synth.fake_us"].len(), 2);
        rtm.dump_to_log();
    }
}
