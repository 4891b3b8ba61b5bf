use anyhow::{Context, Result};
use carriage_core::model::write_run_preamble;
use carriage_core::{JsonlSink, Model, Parameters};
use clap::Parser;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

/// Run the multi-strain colonization model.
#[derive(Parser, Debug)]
#[command(name = "carriage", version, about)]
struct Cli {
    /// JSON parameter file; parameters are read from standard input when
    /// omitted.
    params_file: Option<PathBuf>,

    /// Set up the output file and write the effective parameters, then exit
    /// without simulating.
    #[arg(long)]
    dry: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let text = match &cli.params_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading parameters from stdin")?;
            buffer
        }
    };
    let params = Parameters::from_json(&text).context("parsing parameters")?;
    let config = params.build().context("invalid parameters")?;

    let mut sink = JsonlSink::create(&config.db_filename, config.overwrite_db)?;
    if cli.dry {
        write_run_preamble(&config, &mut sink)?;
        return Ok(());
    }

    let mut model = Model::new(config, sink)?;
    model.run().context("simulation failed")?;
    log::info!("run complete");
    Ok(())
}
