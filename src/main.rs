use anyhow::Result;
use clap::Parser;
use tabled::{settings::Style, Table};

use crate::cladekit::{run_batch, run_itol, run_presence};
use crate::genbank::run_genbank;
use crate::heatmap::run_heatmap;
use crate::lineage::run_lineage;
use crate::pfam::run_pfam;
use crate::terminal::{App, Commands};
use crate::utils::init_logger;

mod cladekit;
mod error;
mod genbank;
mod heatmap;
mod itol;
mod lineage;
mod partition;
mod pfam;
mod presence;
mod taxonomy;
mod terminal;
mod tree;
mod utils;

/// Cladekit application
///
/// Run the application from arguments provided
/// by the command line interface
#[cfg(not(tarpaulin_include))]
fn main() -> Result<()> {
    let cli = App::parse();
    init_logger(cli.verbose);

    match &cli.command {
        Commands::Itol(args) => {
            run_itol(&args.to_config())?;
        }
        Commands::Batch(args) => {
            run_batch(&args.to_config())?;
        }
        Commands::Lineage(args) => {
            let summary = run_lineage(&args.to_config())?;
            log::info!(
                "Resolved {} identifiers from {} assemblies ({} unresolved taxids)",
                summary.identifiers,
                summary.assemblies,
                summary.unresolved
            );
        }
        Commands::Presence(args) => {
            run_presence(&args.to_config())?;
        }
        Commands::Heatmap(args) => {
            run_heatmap(&args.to_config())?;
        }
        Commands::Pfam(args) => {
            let summaries = run_pfam(&args.to_config())?;
            if args.table {
                let mut table = Table::new(&summaries);
                table.with(Style::modern());
                eprintln!("{}", table);
            }
        }
        Commands::Genbank(args) => {
            let summaries = run_genbank(&args.to_config())?;
            log::info!("Extracted {} regions", summaries.len());
            if args.table {
                let mut table = Table::new(&summaries);
                table.with(Style::modern());
                eprintln!("{}", table);
            }
        }
    }

    Ok(())
}
