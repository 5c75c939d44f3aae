use std::fs::{create_dir_all, read_dir};
use std::path::{Path, PathBuf};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::error::CladekitError;
use crate::heatmap::render_heatmap;
use crate::itol::{ItolDataset, Palette};
use crate::partition::partition_groups;
use crate::presence::PresenceMatrix;
use crate::taxonomy::{group_by_rank, Rank, TaxonomyMatcher, TaxonomyTable};
use crate::tree::{save_rooted_tree, RootMethod, Tree};
use crate::utils::{gene_name, get_file_component, read_lines, FileComponent};

const TREE_EXTENSION: &str = "treefile";
const GENE_MARKERS: &[&str] = &["_verification_", "_filtered_"];

/*
=======================
iTOL datasets for a tree
=======================
*/

#[derive(Debug, Clone)]
pub struct ItolConfig {
    pub tree: PathBuf,
    pub taxonomy: PathBuf,
    pub output: PathBuf,
    pub labels: Option<PathBuf>,
    pub rank: Rank,
    pub root_method: RootMethod,
    pub outgroup: Option<String>,
    /// Directory for the rooted tree, not written when absent
    pub rooted_dir: Option<PathBuf>,
    pub table: bool,
}
impl ItolConfig {
    /// Default range file next to the tree: `<stem>_itol_colors.txt`
    pub fn default_output(tree: &Path) -> PathBuf {
        let stem = tree.file_stem().and_then(|s| s.to_str()).unwrap_or("tree");
        tree.with_file_name(format!("{stem}_itol_colors.txt"))
    }
    /// Label file matching a range file
    pub fn labels_path(output: &Path) -> PathBuf {
        let name = output.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        match name.strip_suffix("_colors.txt") {
            Some(prefix) => output.with_file_name(format!("{prefix}_labels.txt")),
            None => {
                let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("itol");
                output.with_file_name(format!("{stem}_labels.txt"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct ItolSummary {
    #[tabled(rename = "Tree")]
    pub tree: String,
    #[tabled(rename = "Leaves")]
    pub leaves: usize,
    #[tabled(rename = "Matched")]
    pub matched: usize,
    #[tabled(rename = "Unmatched")]
    pub unmatched: usize,
    #[tabled(rename = "Groups")]
    pub groups: usize,
    #[tabled(rename = "Clusters")]
    pub clusters: usize,
    #[tabled(rename = "Sequences")]
    pub sequences: usize,
    #[tabled(rename = "Rooting")]
    pub rooting: String,
}

/// Load the taxonomy table and write the datasets for one tree
pub fn run_itol(config: &ItolConfig) -> Result<ItolSummary, CladekitError> {
    let table = TaxonomyTable::from_tsv(&config.taxonomy)?;
    log::info!("Loaded {} taxonomy records from {}", table.len(), config.taxonomy.display());

    let matcher = TaxonomyMatcher::new(&table)?;
    itol_tree(config, &matcher)
}

/// Write the range file (and optionally the label file) for one tree
pub fn itol_tree(config: &ItolConfig, matcher: &TaxonomyMatcher) -> Result<ItolSummary, CladekitError> {
    let tree_name = get_file_component(&config.tree, FileComponent::FileName)?;

    let loaded = Tree::from_file(&config.tree)?;
    let (tree, rooting) = loaded.rooted(config.root_method, config.outgroup.as_deref());
    log::info!("{tree_name}: {rooting}");

    if let Some(dir) = &config.rooted_dir {
        if config.root_method != RootMethod::None {
            let path = save_rooted_tree(&tree, &config.tree, config.root_method, dir)?;
            log::info!("Rooted tree saved to {}", path.display());
        }
    }

    let leaves = tree.leaf_names();
    log::info!("{tree_name}: {} leaves in tree", tree.leaf_count());

    let matches = matcher.match_leaves(leaves.iter().copied());
    log::info!("{tree_name}: {} leaves matched to taxonomy records", matches.matched.len());
    if !matches.unmatched.is_empty() {
        log::warn!("{tree_name}: {} leaves without taxonomy record", matches.unmatched.len());
        log::debug!("Unmatched leaves: {}", matches.unmatched.join(", "));
    }

    let groups = group_by_rank(matches.matched.iter().map(|(leaf, record)| (leaf.as_str(), *record)), config.rank);
    log::info!("{tree_name}: {} groups at {} rank", groups.len(), config.rank);
    for (label, members) in &groups {
        log::debug!("{label}: {} sequences", members.len());
    }

    let clusters = partition_groups(&tree, &groups)?;
    log::info!(
        "{tree_name}: {} named clusters with {} sequences",
        clusters.len(),
        clusters.sequence_count()
    );

    let palette = Palette::default();
    let dataset = ItolDataset::new(&clusters, &palette, &tree_name, Some(rooting.to_string()));

    let sequences = dataset.write_range_file(&config.output)?;
    log::info!("Range dataset with {sequences} sequences written to {}", config.output.display());

    if let Some(labels) = &config.labels {
        let written = dataset.write_label_file(labels)?;
        log::info!("Label dataset with {written} labels written to {}", labels.display());
    }

    let legend = dataset.legend();
    for entry in &legend {
        if entry.includes.is_empty() {
            log::info!("{} ({}): {} clusters", entry.label, entry.color, entry.clusters);
        } else {
            log::info!("{} ({}): {} clusters from {}", entry.label, entry.color, entry.clusters, entry.includes.join(", "));
        }
    }

    if config.table {
        let mut table = Table::new(dataset.cluster_rows());
        table.with(Style::modern());
        eprintln!("{}", table);

        let mut table = Table::new(&legend);
        table.with(Style::modern());
        eprintln!("{}", table);
    }

    Ok(ItolSummary {
        tree: tree_name,
        leaves: tree.leaf_count(),
        matched: matches.matched.len(),
        unmatched: matches.unmatched.len(),
        groups: groups.len(),
        clusters: clusters.len(),
        sequences,
        rooting: rooting.to_string(),
    })
}

/*
=======================
Batch processing
=======================
*/

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub trees: PathBuf,
    pub taxonomy: PathBuf,
    pub outdir: PathBuf,
    pub rank: Rank,
    pub root_method: RootMethod,
    pub outgroup: Option<String>,
    pub threads: usize,
    pub table: bool,
}

/// Tree files in a directory, sorted by name
pub fn tree_files(dir: &Path) -> Result<Vec<PathBuf>, CladekitError> {
    let mut files: Vec<PathBuf> = read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(TREE_EXTENSION))
        .collect();
    files.sort();
    Ok(files)
}

impl BatchConfig {
    fn tree_config(&self, tree: &Path) -> Result<ItolConfig, CladekitError> {
        let gene = gene_name(tree, GENE_MARKERS)?;
        Ok(ItolConfig {
            tree: tree.to_path_buf(),
            taxonomy: self.taxonomy.clone(),
            output: self.outdir.join(format!("{gene}_itol_colors.txt")),
            labels: Some(self.outdir.join(format!("{gene}_itol_labels.txt"))),
            rank: self.rank,
            root_method: self.root_method,
            outgroup: self.outgroup.clone(),
            rooted_dir: Some(self.outdir.clone()),
            table: false,
        })
    }
}

/// Process every tree file of a directory in parallel
///
/// Failing trees are logged and skipped. Fails when no tree files exist
/// or none of them could be processed.
pub fn run_batch(config: &BatchConfig) -> Result<Vec<ItolSummary>, CladekitError> {
    let files = tree_files(&config.trees)?;
    if files.is_empty() {
        return Err(CladekitError::NoTreeFiles(config.trees.clone()));
    }
    log::info!("Found {} tree files in {}", files.len(), config.trees.display());

    create_dir_all(&config.outdir)?;

    let table = TaxonomyTable::from_tsv(&config.taxonomy)?;
    log::info!("Loaded {} taxonomy records from {}", table.len(), config.taxonomy.display());
    let matcher = TaxonomyMatcher::new(&table)?;

    let results: Vec<(PathBuf, Result<ItolSummary, CladekitError>)> = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?
        .install(|| {
            files
                .par_iter()
                .map(|file| {
                    let result = config.tree_config(file).and_then(|tree_config| itol_tree(&tree_config, &matcher));
                    (file.clone(), result)
                })
                .collect()
        });

    let mut summaries = Vec::new();
    let mut failed = 0;
    for (file, result) in results {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                log::error!("Failed to process {}: {err}", file.display());
                failed += 1;
            }
        }
    }

    log::info!("Processed {} of {} trees ({failed} failed)", summaries.len(), files.len());
    if summaries.is_empty() {
        return Err(CladekitError::BatchFailed(files.len()));
    }

    if config.table {
        let mut table = Table::new(&summaries);
        table.with(Style::modern());
        eprintln!("{}", table);
    }

    Ok(summaries)
}

/*
=======================
Presence matrix
=======================
*/

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub fasta_dir: PathBuf,
    pub gene_order: PathBuf,
    pub output: PathBuf,
    /// Species order and heatmap path to render the matrix directly
    pub heatmap: Option<(PathBuf, PathBuf)>,
    pub width: u32,
    pub height: u32,
}

pub fn run_presence(config: &PresenceConfig) -> Result<PresenceMatrix, CladekitError> {
    let genes = read_lines(&config.gene_order)?;
    log::info!("Gene order with {} genes: {}", genes.len(), genes.join(", "));

    let matrix = PresenceMatrix::from_fasta_dir(&config.fasta_dir, &genes)?;
    matrix.write_csv(&config.output)?;
    log::info!(
        "Presence matrix with {} species and {} genes written to {}",
        matrix.species.len(),
        matrix.genes.len(),
        config.output.display()
    );

    if let Some((species_order, heatmap)) = &config.heatmap {
        let ordered = matrix.reindex(&read_lines(species_order)?);
        render_heatmap(&ordered, heatmap, config.width, config.height)?;
        log::info!("Heatmap saved as '{}'", heatmap.display());
    }
    Ok(matrix)
}
