// ========================================================================================
//
//                        The strategic orchestrator: m3f predict
//
// ========================================================================================
//
// This binary owns the application lifecycle: argument parsing, worker pool setup,
// loading the dyad batch and the posterior samples, one call into the prediction
// engine, and writing the results. It performs no numeric work of its own.

use clap::Parser;
use m3f::io::{load_dyads, load_samples, write_predictions};
use m3f::threads::ThreadConfig;
use m3f::{Contributions, Predictor};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                              Command-line interface definition
// ========================================================================================

#[derive(Parser, Debug)]
#[command(
    name = "m3f",
    version,
    about = "Posterior-mean predictions for mixed-membership matrix factorization."
)]
struct Args {
    /// Tab-separated dyads with `row` and `col` columns (1-based), plus optional
    /// `z_row` / `z_col` columns holding one fixed topic draw.
    #[arg(value_name = "DYADS")]
    dyads: PathBuf,

    /// TOML file holding the posterior samples as `[[sample]]` tables.
    #[arg(long, value_name = "SAMPLES")]
    samples: PathBuf,

    /// Leave out the factorization term and the global bias.
    #[arg(long)]
    no_factorization: bool,

    /// Leave out the offsets driven by row topics.
    #[arg(long)]
    no_row_offsets: bool,

    /// Leave out the offsets driven by column topics.
    #[arg(long)]
    no_col_offsets: bool,

    /// Upper bound on worker threads. Falls back to M3F_MAX_THREADS, then to all cores.
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Where to write predictions. Defaults to stdout.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

impl Args {
    fn contributions(&self) -> Contributions {
        Contributions {
            factorization: !self.no_factorization,
            row_offsets: !self.no_row_offsets,
            col_offsets: !self.no_col_offsets,
        }
    }

    fn thread_config(&self) -> ThreadConfig {
        match self.threads {
            Some(n) => ThreadConfig::with_max_threads(n),
            None => ThreadConfig::from_env(),
        }
    }
}

// ========================================================================================
//                              The main orchestration logic
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let start_time = Instant::now();

    // --- Phase 1: Resource allocation ---
    let predictor = Predictor::new(&args.thread_config())?;
    log::info!("Using {} worker thread(s)", predictor.num_threads());

    // --- Phase 2: Host data ---
    let samples = load_samples(&args.samples)?;
    let (dyads, topics) = load_dyads(&args.dyads)?;

    // --- Phase 3: Prediction ---
    let preds = predictor.predict(&dyads, &samples, &topics, args.contributions())?;

    // --- Phase 4: Output ---
    match &args.out {
        Some(path) => {
            write_predictions(BufWriter::new(File::create(path)?), &dyads, preds.view())?;
            log::info!("Wrote {} prediction(s) to {}", preds.len(), path.display());
        }
        None => write_predictions(io::stdout().lock(), &dyads, preds.view())?,
    }

    log::info!("Completed in {:.2?}", start_time.elapsed());
    Ok(())
}
