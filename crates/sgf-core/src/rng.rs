//! Cryptographically strong PRNG context plus the math kernel built on top of it.
//!
//! `ChaCha20Rng` stands in for the reference ISAAC generator: both are stream
//! ciphers repurposed as CSPRNGs, both are trivially reseedable from a 64-bit or
//! 256-bit key, and `rand_chacha`/`rand_core` are already part of the surrounding
//! ecosystem's dependency stack.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

/// `Dirichlet`/`Gamma` sampling clamps to this floor rather than underflowing to
/// zero, mirroring the reference's `SQRT_DBL_MIN` guard.
pub const SQRT_MIN_POSITIVE: f64 = 1.4916681462400413e-154;

/// Explicit PRNG context (§9 design note: no process-wide singleton). Carries the
/// logical process seed alongside the live generator so the "seeded noise"
/// protocol (reseed-for-one-query, then restore) can reset deterministically.
pub struct Prng {
    rng: ChaCha20Rng,
    process_seed: u64,
}

impl Prng {
    /// `seed == 0` mixes a seed from OS entropy, matching the reference's
    /// `defSeedPRNG()` fallback for `rngseed = 0`.
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { rand::thread_rng().gen::<u64>().max(1) } else { seed };
        Prng { rng: ChaCha20Rng::seed_from_u64(seed), process_seed: seed }
    }

    pub fn process_seed(&self) -> u64 {
        self.process_seed
    }

    /// Re-keys the generator for the duration of a single query. Callers must
    /// pair this with [`Prng::reset_to_process_seed`] once the query's noise has
    /// been drawn; single-threaded execution makes this safe (§5).
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    pub fn reset_to_process_seed(&mut self) {
        self.rng = ChaCha20Rng::seed_from_u64(self.process_seed);
    }

    /// Open interval (0, 1); endpoints are rejected and redrawn.
    pub fn uniform(&mut self) -> f64 {
        loop {
            let u: f64 = self.rng.gen();
            if u > 0.0 && u < 1.0 {
                return u;
            }
        }
    }

    /// Inclusive integer range `[lo, hi]`.
    pub fn uniform_int(&mut self, lo: i64, hi: i64) -> i64 {
        assert!(hi >= lo, "uniform_int: empty range");
        self.rng.gen_range(lo..=hi)
    }

    /// Inverse-CDF sampling via `u - 0.5`.
    pub fn laplace(&mut self, mu: f64, b: f64) -> f64 {
        let u = self.uniform() - 0.5;
        mu - b * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }

    /// Two-sided geometric mechanism: `Pr[|X| = t] = ((1-alpha)/(1+alpha)) * alpha^t`,
    /// sign uniform when `t > 0`. Assumes sensitivity `delta = 1` (SPEC_FULL.md §9).
    pub fn geometric_dp(&mut self, alpha: f64) -> i64 {
        debug_assert!((0.0..1.0).contains(&alpha));
        let u = self.uniform();
        // CDF inversion for the two-sided geometric: split the unit interval into
        // a central mass at t=0 and symmetric geometric tails.
        let p0 = (1.0 - alpha) / (1.0 + alpha);
        if u < p0 {
            return 0;
        }
        let rest = u - p0;
        let half = (1.0 - p0) / 2.0;
        let (sign, v) = if rest < half { (1i64, rest) } else { (-1i64, rest - half) };
        let frac = v / half;
        let t = 1 + (frac.ln() / alpha.ln()).floor().max(0.0) as i64;
        sign * t
    }

    /// Box-Muller via rejection-sampled unit-disc points.
    pub fn gaussian(&mut self, mu: f64, sigma: f64) -> f64 {
        loop {
            let x = 2.0 * self.uniform() - 1.0;
            let y = 2.0 * self.uniform() - 1.0;
            let s = x * x + y * y;
            if s > 0.0 && s < 1.0 {
                let f = (-2.0 * s.ln() / s).sqrt();
                return mu + sigma * x * f;
            }
        }
    }

    /// Marsaglia-Tsang for `a >= 1`; boosting identity `G(a) = G(a+1) * U^{1/a}`
    /// for `a < 1`.
    pub fn gamma(&mut self, a: f64, b: f64) -> f64 {
        if a < 1.0 {
            let g = self.gamma(a + 1.0, 1.0);
            let u = self.uniform();
            return (g * u.powf(1.0 / a)).max(SQRT_MIN_POSITIVE) * b;
        }
        let d = a - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let (x, v) = loop {
                let x = self.gaussian(0.0, 1.0);
                let v = 1.0 + c * x;
                if v > 0.0 {
                    break (x, v * v * v);
                }
            };
            let u = self.uniform();
            if u < 1.0 - 0.0331 * x.powi(4) {
                return d * v * b;
            }
            if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
                return d * v * b;
            }
        }
    }

    /// Normalizes `K` independent `gamma(alpha_i, 1)` draws; falls back to the
    /// log-scale variant (subtract per-sample max before exponentiating) when the
    /// linear-scale sum underflows.
    pub fn dirichlet(&mut self, alpha: &[f64]) -> Vec<f64> {
        let mut g: Vec<f64> = alpha.iter().map(|&a| self.gamma(a, 1.0)).collect();
        let sum: f64 = g.iter().sum();
        if sum < SQRT_MIN_POSITIVE || g.iter().any(|&v| v == 0.0 && sum > 0.0) {
            return self.dirichlet_log_scale(alpha);
        }
        for v in g.iter_mut() {
            *v /= sum;
        }
        g
    }

    fn dirichlet_log_scale(&mut self, alpha: &[f64]) -> Vec<f64> {
        let logu: Vec<f64> = alpha
            .iter()
            .map(|&a| self.uniform().ln() / a)
            .collect();
        let max = logu.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut g: Vec<f64> = logu
            .iter()
            .zip(alpha)
            .map(|(&lu, &a)| ((lu - max).exp()).max(SQRT_MIN_POSITIVE) * self.gamma(a + 1.0, 1.0))
            .collect();
        let sum: f64 = g.iter().sum();
        let sum = if sum > 0.0 { sum } else { 1.0 };
        for v in g.iter_mut() {
            *v /= sum;
        }
        g
    }

    /// Linear-scan CDF sampling. Robust to floating rounding: returns `K-1` if the
    /// uniform draw exceeds the accumulated sum.
    pub fn sample_from_vector(&mut self, p: &[f64]) -> usize {
        assert!(!p.is_empty(), "sample_from_vector: empty distribution");
        let total: f64 = p.iter().sum();
        let u = self.uniform() * total;
        let mut acc = 0.0;
        for (i, &v) in p.iter().enumerate() {
            acc += v;
            if u <= acc {
                return i;
            }
        }
        p.len() - 1
    }

    /// In-place Fisher-Yates.
    pub fn random_permutation<T>(&mut self, v: &mut [T]) {
        if v.len() < 2 {
            return;
        }
        for i in 0..v.len() - 1 {
            let j = self.uniform_int(i as i64, (v.len() - 1) as i64) as usize;
            v.swap(i, j);
        }
    }

    /// Samples a single `Categorical(theta)` draw from a fresh Dirichlet(alpha)
    /// draw. This is `propose`'s per-attribute primitive; it must never be
    /// confused with the *expected-value* PMF used by `pdf` (see
    /// [`crate::mathutils::dirichlet_multinomial_expected_pmf`]).
    pub fn dirichlet_multinomial_sample(&mut self, alpha: &[f64]) -> usize {
        let theta = self.dirichlet(alpha);
        self.sample_from_vector(&theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stays_open_interval() {
        let mut rng = Prng::new(1);
        for _ in 0..10_000 {
            let u = rng.uniform();
            assert!(u > 0.0 && u < 1.0);
        }
    }

    #[test]
    fn reseed_then_reset_is_deterministic() {
        let mut a = Prng::new(42);
        let mut b = Prng::new(42);
        a.reseed(7);
        b.reseed(7);
        assert_eq!(a.uniform(), b.uniform());
        a.reset_to_process_seed();
        b.reset_to_process_seed();
        assert_eq!(a.uniform(), b.uniform());
    }

    #[test]
    fn dirichlet_sums_to_one() {
        let mut rng = Prng::new(3);
        let theta = rng.dirichlet(&[1.0, 1.0, 1.0, 1.0]);
        let sum: f64 = theta.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sample_from_vector_respects_bounds() {
        let mut rng = Prng::new(9);
        for _ in 0..1000 {
            let idx = rng.sample_from_vector(&[1.0, 2.0, 3.0]);
            assert!(idx < 3);
        }
    }

    #[test]
    fn random_permutation_is_a_permutation() {
        let mut rng = Prng::new(5);
        let mut v: Vec<u32> = (0..20).collect();
        let original = v.clone();
        rng.random_permutation(&mut v);
        let mut sorted = v.clone();
        sorted.sort();
        assert_eq!(sorted, original);
    }

    #[test]
    fn gamma_is_positive() {
        let mut rng = Prng::new(11);
        for _ in 0..1000 {
            assert!(rng.gamma(0.3, 1.0) > 0.0);
            assert!(rng.gamma(2.5, 1.0) > 0.0);
        }
    }
}
