use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::cladekit::{BatchConfig, ItolConfig, PresenceConfig};
use crate::genbank::GenbankConfig;
use crate::heatmap::HeatmapConfig;
use crate::lineage::LineageConfig;
use crate::pfam::PfamConfig;
use crate::taxonomy::Rank;
use crate::tree::RootMethod;

/// Cladekit: taxonomic clade colouring and data preparation for phylogenomic trees
#[derive(Debug, Parser)]
#[command(author, version, about)]
#[command(styles=get_styles())]
#[command(arg_required_else_help(true))]
#[clap(name = "cladekit", version)]
pub struct App {
    #[clap(subcommand)]
    pub command: Commands,
    /// Enable debug logging
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// iTOL range and label datasets coloured by taxonomic group
    Itol(ItolArgs),
    /// iTOL datasets for every tree file in a directory
    Batch(BatchArgs),
    /// Taxonomic lineages for sequence identifiers from an NCBI taxdump
    Lineage(LineageArgs),
    /// Gene presence/absence matrix from per-gene sequence files
    Presence(PresenceArgs),
    /// Heatmap of a presence/absence matrix
    Heatmap(HeatmapArgs),
    /// Filter protein sequences by their InterProScan PFAM domains
    Pfam(PfamArgs),
    /// Extract short GenBank regions around gene pairs
    Genbank(GenbankArgs),
}

#[derive(Debug, Args)]
pub struct ItolArgs {
    /// Phylogenetic tree (Newick)
    #[arg(value_parser = validate_file)]
    pub tree: PathBuf,
    /// Taxonomy table with 'full_id' and rank columns (.tsv)
    #[arg(value_parser = validate_file)]
    pub taxonomy: PathBuf,
    /// Output range dataset [default: <tree stem>_itol_colors.txt]
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
    /// Taxonomic rank used for grouping
    #[arg(long, short = 'l', default_value = "phylum")]
    pub level: Rank,
    /// Write the label dataset next to the range dataset
    #[arg(long)]
    pub labels: bool,
    /// Rooting applied to the tree before partitioning
    #[arg(long, default_value = "midpoint", help_heading = "Rooting options")]
    pub root_method: RootMethod,
    /// Outgroup leaf for outgroup rooting
    #[arg(long, required_if_eq("root_method", "outgroup"), help_heading = "Rooting options")]
    pub outgroup: Option<String>,
    /// Save the rooted tree next to the range dataset
    #[arg(long, help_heading = "Rooting options")]
    pub save_rooted: bool,
    /// Print formatted cluster table to console
    #[arg(long, short = 'T')]
    pub table: bool,
}

impl ItolArgs {
    pub fn to_config(&self) -> ItolConfig {
        let output = self.output.clone().unwrap_or_else(|| ItolConfig::default_output(&self.tree));
        let rooted_dir = self.save_rooted.then(|| match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        });
        ItolConfig {
            tree: self.tree.clone(),
            taxonomy: self.taxonomy.clone(),
            labels: self.labels.then(|| ItolConfig::labels_path(&output)),
            output,
            rank: self.level,
            root_method: self.root_method,
            outgroup: self.outgroup.clone(),
            rooted_dir,
            table: self.table,
        }
    }
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Directory of tree files (*.treefile)
    #[arg(long, value_parser = validate_dir)]
    pub trees: PathBuf,
    /// Taxonomy table with 'full_id' and rank columns (.tsv)
    #[arg(long, value_parser = validate_file)]
    pub taxonomy: PathBuf,
    /// Output directory for datasets and rooted trees
    #[arg(long)]
    pub outdir: PathBuf,
    /// Taxonomic rank used for grouping
    #[arg(long, short = 'l', default_value = "phylum")]
    pub level: Rank,
    /// Rooting applied to each tree before partitioning
    #[arg(long, default_value = "midpoint", help_heading = "Rooting options")]
    pub root_method: RootMethod,
    /// Outgroup leaf for outgroup rooting
    #[arg(long, required_if_eq("root_method", "outgroup"), help_heading = "Rooting options")]
    pub outgroup: Option<String>,
    /// Trees processed in parallel
    #[arg(long, short = 't', default_value = "4")]
    pub threads: usize,
    /// Print formatted summary table to console
    #[arg(long, short = 'T')]
    pub table: bool,
}

impl BatchArgs {
    pub fn to_config(&self) -> BatchConfig {
        BatchConfig {
            trees: self.trees.clone(),
            taxonomy: self.taxonomy.clone(),
            outdir: self.outdir.clone(),
            rank: self.level,
            root_method: self.root_method,
            outgroup: self.outgroup.clone(),
            threads: self.threads,
            table: self.table,
        }
    }
}

#[derive(Debug, Args)]
pub struct LineageArgs {
    /// Assembly accessions with taxids ('assembly_accession' and 'taxid' columns, .tsv)
    #[arg(long, value_parser = validate_file)]
    pub taxids: PathBuf,
    /// Sequence identifiers (assembly-unique), one per line
    #[arg(long, value_parser = validate_file)]
    pub ids: PathBuf,
    /// NCBI taxonomy dump directory with 'nodes.dmp' and 'names.dmp'
    #[arg(long, env = "CLADEKIT_TAXDUMP", value_parser = validate_dir)]
    pub taxdump: PathBuf,
    /// Output taxonomy table (.tsv)
    #[arg(long, short = 'o')]
    pub output: PathBuf,
    /// Output table of unresolved taxids [default: <output stem>_errors.tsv]
    #[arg(long)]
    pub errors: Option<PathBuf>,
}

impl LineageArgs {
    pub fn to_config(&self) -> LineageConfig {
        LineageConfig {
            taxids: self.taxids.clone(),
            ids: self.ids.clone(),
            taxdump: self.taxdump.clone(),
            output: self.output.clone(),
            errors: self.errors.clone().unwrap_or_else(|| LineageConfig::default_errors(&self.output)),
        }
    }
}

#[derive(Debug, Args)]
pub struct PresenceArgs {
    /// Directory of per-gene sequence files (.fasta, .faa)
    #[arg(long, value_parser = validate_dir)]
    pub fasta_dir: PathBuf,
    /// Gene column order, one gene per line
    #[arg(long, value_parser = validate_file)]
    pub gene_order: PathBuf,
    /// Output presence/absence matrix (.csv)
    #[arg(long, short = 'o')]
    pub output: PathBuf,
    /// Species row order for the heatmap, one species per line
    #[arg(long, requires = "heatmap", value_parser = validate_file, help_heading = "Heatmap options")]
    pub species_order: Option<PathBuf>,
    /// Render the matrix as heatmap (.svg)
    #[arg(long, requires = "species_order", help_heading = "Heatmap options")]
    pub heatmap: Option<PathBuf>,
    /// Heatmap width in pixels
    #[arg(long, default_value = "1000", help_heading = "Heatmap options")]
    pub width: u32,
    /// Heatmap height in pixels
    #[arg(long, default_value = "1500", help_heading = "Heatmap options")]
    pub height: u32,
}

impl PresenceArgs {
    pub fn to_config(&self) -> PresenceConfig {
        PresenceConfig {
            fasta_dir: self.fasta_dir.clone(),
            gene_order: self.gene_order.clone(),
            output: self.output.clone(),
            heatmap: self.species_order.clone().zip(self.heatmap.clone()),
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Args)]
pub struct HeatmapArgs {
    /// Presence/absence matrix (.csv)
    #[arg(long, short = 'i', value_parser = validate_file)]
    pub input: PathBuf,
    /// Species row order, one species per line
    #[arg(long, value_parser = validate_file)]
    pub species_order: PathBuf,
    /// Output heatmap (.svg)
    #[arg(long, short = 'o')]
    pub output: PathBuf,
    /// Width in pixels
    #[arg(long, default_value = "1000")]
    pub width: u32,
    /// Height in pixels
    #[arg(long, default_value = "1500")]
    pub height: u32,
}

impl HeatmapArgs {
    pub fn to_config(&self) -> HeatmapConfig {
        HeatmapConfig {
            input: self.input.clone(),
            species_order: self.species_order.clone(),
            output: self.output.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Args)]
pub struct PfamArgs {
    /// Directory with the domain table, '<protein>.json' and '<protein>.faa' files
    #[arg(long, value_parser = validate_dir)]
    pub dir: PathBuf,
    /// Domain table file name in the directory ('protein,domain,...' rows)
    #[arg(long)]
    pub csv: String,
    /// Print formatted summary table to console
    #[arg(long, short = 'T')]
    pub table: bool,
}

impl PfamArgs {
    pub fn to_config(&self) -> PfamConfig {
        PfamConfig { directory: self.dir.clone(), table: self.csv.clone() }
    }
}

#[derive(Debug, Args)]
pub struct GenbankArgs {
    /// Gene pairs with accessions ('gene1<TAB>gene2<TAB>accession' rows without header)
    #[arg(long, value_parser = validate_file)]
    pub pairs: PathBuf,
    /// Directory with '<accession>.gbff' files
    #[arg(long, value_parser = validate_dir)]
    pub gbff_dir: PathBuf,
    /// Output directory for '<accession>_short_<gene1>_<gene2>.gbk' files
    #[arg(long)]
    pub outdir: PathBuf,
    /// CDS features kept on each side of the gene pair
    #[arg(long, default_value = "2")]
    pub flank: usize,
    /// Print formatted summary table to console
    #[arg(long, short = 'T')]
    pub table: bool,
}

impl GenbankArgs {
    pub fn to_config(&self) -> GenbankConfig {
        GenbankConfig {
            pairs: self.pairs.clone(),
            gbff_dir: self.gbff_dir.clone(),
            outdir: self.outdir.clone(),
            flank: self.flank,
        }
    }
}

/// Validator function to check if each file exists and is valid
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(file);

    if !path.exists() {
        return Err(format!("File not found: {}", file));
    }

    if !path.is_file() {
        return Err(format!("Not a valid file: {}", file));
    }

    Ok(path)
}

fn validate_dir(dir: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(dir);

    if !path.is_dir() {
        return Err(format!("Directory not found: {}", dir));
    }

    Ok(path)
}

pub fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .literal(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
}
