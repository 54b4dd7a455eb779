use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use joinbench::cli::{self, Cli};
use joinbench::config::Config;
use joinbench::errors::EngineError;
use joinbench::{index_builder, workload};

fn main() -> ExitCode {
    let config = Config::load().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Some(threads) = config.worker_threads {
        if let Err(err) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
            error!(%err, "failed to configure worker thread pool, continuing with rayon's default");
        }
    }

    let cli = Cli::parse();

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &Config) -> Result<(), EngineError> {
    let modes = cli::parse_modes(&cli.modes)?;

    info!(path = %cli.init_file.display(), "loading relations");
    let mut relations = workload::load_relations(&cli.init_file)?;
    index_builder::precompute_all(&mut relations);

    info!(path = %cli.workload_file.display(), modes = ?modes, "running workload");
    let output_path = Path::new("output.res");
    let metrics = workload::run_workload(&cli.workload_file, output_path, &relations, &modes, config.morsel_size)?;

    info!(
        queries = metrics.queries,
        prepare_ms = metrics.prepare.as_secs_f64() * 1000.0,
        compile_ms = metrics.compile.as_secs_f64() * 1000.0,
        execute_ms = metrics.execute.as_secs_f64() * 1000.0,
        total_ms = metrics.total().as_secs_f64() * 1000.0,
        "workload complete"
    );
    Ok(())
}
