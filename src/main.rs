use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use planet_acquire::config::AcquisitionConfig;
use planet_acquire::pipeline::{self, BatchOutcome};
use std::fs;
use std::path::{Path, PathBuf};

/// Search, order and download satellite scenes in batches
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Level of logging output
    #[arg(short, long, global = true, default_value_t = log::Level::Info)]
    verbosity: log::Level,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a template acquisition file
    Template {
        /// Where to write the template
        path: PathBuf,
    },
    /// Search and plan batches without placing orders
    Search {
        /// Acquisition file
        config: PathBuf,
        /// Write the sorted unique scene ids to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Place or reuse orders, wait for them and download the results
    Run {
        /// Acquisition file
        config: PathBuf,
    },
}

fn load(path: &Path) -> Result<AcquisitionConfig> {
    let config = AcquisitionConfig::read(path)
        .with_context(|| format!("Failed to read acquisition file {path:?}"))?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    simple_logger::init_with_level(args.verbosity).context("Failed to setup logger")?;

    match args.command {
        Command::Template { path } => {
            AcquisitionConfig::write_template(&path)
                .with_context(|| format!("Failed to write template {path:?}"))?;
            log::info!("Wrote template to {}", path.display());
        }
        Command::Search { config, output } => {
            let config = load(&config)?;
            let session = config.session()?;
            let plan = pipeline::plan(&session, &config).await?;
            for batch in &plan.batches {
                log::info!("{} ({} scenes)", batch.name, batch.item_ids.len());
            }
            if let Some(output) = output {
                let ids: Vec<&String> = plan.batches.iter().flat_map(|b| &b.item_ids).collect();
                fs::write(&output, serde_json::to_string_pretty(&ids)?)
                    .with_context(|| format!("Failed to write {output:?}"))?;
            }
        }
        Command::Run { config } => {
            let config = load(&config)?;
            let session = config.session()?;
            let report = pipeline::run(&session, &config).await?;

            for batch in &report.batches {
                match &batch.outcome {
                    BatchOutcome::Finished { state, downloads } => log::info!(
                        "{}: {state}, {} downloaded, {} skipped, {} failed",
                        batch.batch,
                        downloads.downloaded.len(),
                        downloads.skipped.len(),
                        downloads.failed.len()
                    ),
                    BatchOutcome::Incomplete(e) | BatchOutcome::Failed(e) => {
                        log::warn!("{}: {e}", batch.batch);
                    }
                }
            }
            let problems = report.problems();
            if !problems.is_empty() {
                bail!(
                    "{} problem(s) left in {}; rerun to resume",
                    problems.len(),
                    report.output_dir.display()
                );
            }
        }
    }

    Ok(())
}
