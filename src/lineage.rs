use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CladekitError;
use crate::taxonomy::{Rank, TaxonomyRecord};
use crate::utils::read_lines;

/// Null token written for every rank of an unresolved taxid
const MISSING: &str = "NA";

#[derive(Debug, Clone, PartialEq)]
struct TaxNode {
    parent: u64,
    rank: String,
}

/// Minimal NCBI taxonomy: parent links, ranks and scientific names
#[derive(Debug, Clone, Default)]
pub struct TaxDump {
    nodes: HashMap<u64, TaxNode>,
    names: HashMap<u64, String>,
}

impl TaxDump {
    /// Read `nodes.dmp` and `names.dmp` from a taxdump directory
    pub fn from_dir(dir: &Path) -> Result<Self, CladekitError> {
        let nodes = dir.join("nodes.dmp");
        let names = dir.join("names.dmp");
        for path in [&nodes, &names] {
            if !path.is_file() {
                return Err(CladekitError::TaxdumpFileMissing(path.to_path_buf()));
            }
        }
        Self::from_readers(BufReader::new(File::open(nodes)?), BufReader::new(File::open(names)?))
    }
    pub fn from_readers<N: BufRead, M: BufRead>(nodes: N, names: M) -> Result<Self, CladekitError> {
        let mut dump = Self::default();

        for line in nodes.lines() {
            let line = line?;
            let fields = dmp_fields(&line);
            if fields.len() < 3 {
                continue;
            }
            let (Ok(taxid), Ok(parent)) = (fields[0].parse::<u64>(), fields[1].parse::<u64>()) else {
                log::warn!("Skipping malformed taxonomy node line: {line}");
                continue;
            };
            dump.nodes.insert(taxid, TaxNode { parent, rank: fields[2].to_string() });
        }

        for line in names.lines() {
            let line = line?;
            let fields = dmp_fields(&line);
            if fields.len() < 4 || fields[3] != "scientific name" {
                continue;
            }
            if let Ok(taxid) = fields[0].parse::<u64>() {
                dump.names.insert(taxid, fields[1].to_string());
            }
        }

        log::debug!("Loaded {} taxonomy nodes and {} scientific names", dump.nodes.len(), dump.names.len());
        Ok(dump)
    }
    /// Ranked lineage of a taxid, `None` for a taxid not in the dump
    ///
    /// Ranks without a node on the path to the root stay empty.
    pub fn lineage(&self, taxid: u64) -> Option<TaxonomyRecord> {
        let mut node = self.nodes.get(&taxid)?;
        let mut record = TaxonomyRecord::default();
        let mut current = taxid;
        let mut seen = HashSet::new();

        while seen.insert(current) {
            if let Some(rank) = ncbi_rank(&node.rank) {
                if record.rank(rank).is_none() {
                    record.set_rank(rank, self.names.get(&current).cloned());
                }
            }
            if node.parent == current {
                break;
            }
            current = node.parent;
            match self.nodes.get(&current) {
                Some(parent) => node = parent,
                None => break,
            }
        }
        Some(record)
    }
}

// Columns are separated by `\t|\t` and lines end in `\t|`
fn dmp_fields(line: &str) -> Vec<&str> {
    line.split("\t|\t").map(|f| f.trim_end_matches("\t|").trim()).collect()
}

fn ncbi_rank(rank: &str) -> Option<Rank> {
    match rank {
        "superkingdom" | "domain" => Some(Rank::Superkingdom),
        "phylum" => Some(Rank::Phylum),
        "class" => Some(Rank::Class),
        "order" => Some(Rank::Order),
        "family" => Some(Rank::Family),
        "genus" => Some(Rank::Genus),
        "species" => Some(Rank::Species),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AssemblyTaxid {
    assembly_accession: String,
    taxid: String,
}

/// Assembly whose taxid could not be resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedTaxid {
    pub assembly_accession: String,
    pub taxid: String,
}

#[derive(Debug, Clone)]
pub struct LineageConfig {
    pub taxids: PathBuf,
    pub ids: PathBuf,
    pub taxdump: PathBuf,
    pub output: PathBuf,
    pub errors: PathBuf,
}
impl LineageConfig {
    /// Error table next to the output: `<output stem>_errors.tsv`
    pub fn default_errors(output: &Path) -> PathBuf {
        let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("taxonomy");
        output.with_file_name(format!("{stem}_errors.tsv"))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageSummary {
    pub identifiers: usize,
    pub assemblies: usize,
    pub unresolved: usize,
    pub without_assembly: usize,
}

/// Resolve lineages for every assembly of the taxid table
///
/// Unresolvable taxids get `NA` at every rank and are reported separately.
pub fn resolve_assemblies(
    dump: &TaxDump,
    taxids: &Path,
) -> Result<(HashMap<String, TaxonomyRecord>, Vec<UnresolvedTaxid>), CladekitError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(taxids)?;

    let mut lineages = HashMap::new();
    let mut errors = Vec::new();

    for rec in reader.deserialize() {
        let row: AssemblyTaxid = rec?;
        let taxid = row.taxid.trim();

        let record = match taxid.parse::<u64>().ok().and_then(|id| dump.lineage(id)) {
            Some(record) => record,
            None => {
                log::error!("Error retrieving taxonomy for taxid {} ({})", taxid, row.assembly_accession);
                errors.push(UnresolvedTaxid {
                    assembly_accession: row.assembly_accession.clone(),
                    taxid: taxid.to_string(),
                });
                let mut record = TaxonomyRecord::default();
                for rank in Rank::ALL {
                    record.set_rank(rank, Some(MISSING.to_string()));
                }
                record
            }
        };
        // First row of an assembly wins
        lineages.entry(row.assembly_accession).or_insert(record);
    }
    Ok((lineages, errors))
}

/// Join `assembly-unique` identifiers to their assembly lineages, keeping identifier order
pub fn join_identifiers(ids: &[String], lineages: &HashMap<String, TaxonomyRecord>) -> (Vec<TaxonomyRecord>, usize) {
    let mut records = Vec::new();
    let mut without_assembly = 0;

    for id in ids {
        let Some((assembly, _)) = id.split_once('-') else {
            log::warn!("Skipping identifier without assembly accession: {id}");
            continue;
        };
        let mut record = match lineages.get(assembly) {
            Some(lineage) => lineage.clone(),
            None => {
                without_assembly += 1;
                TaxonomyRecord::default()
            }
        };
        record.full_id = id.clone();
        records.push(record);
    }
    (records, without_assembly)
}

pub fn run_lineage(config: &LineageConfig) -> Result<LineageSummary, CladekitError> {
    let dump = TaxDump::from_dir(&config.taxdump)?;
    let (lineages, errors) = resolve_assemblies(&dump, &config.taxids)?;
    let ids = read_lines(&config.ids)?;
    let (records, without_assembly) = join_identifiers(&ids, &lineages);

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(&config.output)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(&config.errors)?;
    writer.write_record(["assembly_accession", "taxid"])?;
    for error in &errors {
        writer.serialize(error)?;
    }
    writer.flush()?;

    log::info!("Output written to {}", config.output.display());
    log::info!("Errors written to {}", config.errors.display());
    if without_assembly > 0 {
        log::warn!("{without_assembly} identifiers have no assembly in the taxid table");
    }

    Ok(LineageSummary {
        identifiers: records.len(),
        assemblies: lineages.len(),
        unresolved: errors.len(),
        without_assembly,
    })
}
