//! `sgfgen <config-file>`: runs the synthesizer, writing
//! `<workdir>/gen/<pid>.out` (SPEC_FULL.md §6).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use sgf_cli::common::{bootstrap, run_and_exit_on_error};
use sgf_core::config::Mechanism;
use sgf_core::metadata::Metadata;
use sgf_core::model::marginals::MarginalsModel;
use sgf_core::model::seedbased::SeedBasedModel;
use sgf_core::model::{BudgetConfig, GenerativeModel, Model};
use sgf_core::output::write_gen_line;
use sgf_core::rng::Prng;
use sgf_core::store::RecordStore;
use sgf_core::synth::{SynthParams, Synthesizer};
use tracing::info;

#[derive(Parser)]
#[command(about = "Generate synthetic candidates from a trained model")]
struct Args {
    config_file: PathBuf,
}

fn main() {
    let args = Args::parse();
    run_and_exit_on_error(|| {
        let cfg = bootstrap(&args.config_file)?;
        let metadata = Metadata::load(&cfg.dataprefix, cfg.attrs as usize)?;
        if !RecordStore::on_disk(&cfg.workdir, &cfg.dataprefix) {
            bail!("record store has not been initialized; run sgfinit first");
        }
        let store = RecordStore::initialize(&cfg.workdir, &cfg.dataprefix, cfg.attrs as usize)?;

        let budget = BudgetConfig {
            total_eps: cfg.budget,
            lambda: cfg.lambda,
            noise_dist: cfg.ndist,
            composition: cfg.ncomp,
            seeded_noise: cfg.seeded_noise,
            max_advanced_iters: 100_000,
        };

        let model = match cfg.mechanism {
            Mechanism::SeedBased => Model::SeedBased(SeedBasedModel::new(
                &metadata,
                &store,
                cfg.omega as usize,
                cfg.dir_hyperp,
                budget,
            )?),
            Mechanism::Marginals => {
                Model::Marginals(MarginalsModel::new(&metadata, &store, cfg.dir_hyperp, budget, false)?)
            }
        };

        let params = SynthParams {
            gamma: cfg.gamma,
            fakes_per_seed: 1,
            count: cfg.count,
            runtime: Duration::from_secs(cfg.runtime_secs),
            max_check_ps: cfg.max_check_ps,
            max_ps: cfg.max_ps,
            random_ps_order: cfg.random_ps,
        };

        let gen_dir = cfg.workdir.join("gen");
        std::fs::create_dir_all(&gen_dir).context("creating gen output directory")?;
        let out_path = gen_dir.join(format!("{}.out", std::process::id()));
        let mut out = std::fs::File::create(&out_path).context("creating generator output file")?;

        let mut prng = Prng::new(cfg.rngseed);
        let synth = Synthesizer::new(&model, &store, params);
        let mut produced = 0u64;
        synth.run(&mut prng, |seed, fake, props| {
            if let Err(e) = write_gen_line(&mut out, seed, fake, props) {
                tracing::warn!(error = %e, "failed to write a generator output line");
            } else {
                produced += 1;
            }
        });
        synth.dump_rtm();
        model.shutdown();
        info!(produced, path = %out_path.display(), "synthesis complete");
        Ok(())
    });
}
