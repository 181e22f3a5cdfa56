//! `sgfinit <config-file>`: parses the input CSVs and writes the binary record
//! cache (SPEC_FULL.md §6). Exit 0 on success, 1 otherwise.

use std::path::PathBuf;

use clap::Parser;
use sgf_cli::common::{bootstrap, run_and_exit_on_error};
use sgf_core::metadata::Metadata;
use sgf_core::store::RecordStore;
use tracing::info;

#[derive(Parser)]
#[command(about = "Load CSV input and write the binary record cache")]
struct Args {
    config_file: PathBuf,
}

fn main() {
    let args = Args::parse();
    run_and_exit_on_error(|| {
        let cfg = bootstrap(&args.config_file)?;
        let _metadata = Metadata::load(&cfg.dataprefix, cfg.attrs as usize)?;
        let store = RecordStore::initialize(&cfg.workdir, &cfg.dataprefix, cfg.attrs as usize)?;
        info!(records = store.records.rows(), stats = store.stats.rows(), "record store initialized");
        Ok(())
    });
}
