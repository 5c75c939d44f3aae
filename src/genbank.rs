use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::ops::Range;
use std::path::{Path, PathBuf};

use gb_io::reader::SeqReader;
use gb_io::seq::{Feature, Location, Seq, Topology};
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use thiserror::Error;

use crate::error::CladekitError;

const CDS: &str = "CDS";
const GENE_KEYS: [&str; 3] = ["locus_tag", "protein_id", "gene"];

/*
========================================
   Custom error definitions
========================================
*/

#[derive(Error, Debug)]
pub enum GenbankError {
    /// Represents a GenBank record that could not be parsed
    #[error("failed to parse GenBank file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    /// Indicates a feature location without usable bounds
    #[error("feature location has no bounds: {0}")]
    Bounds(String),
    /// Indicates a region outside of the record sequence
    #[error("region {start}..{end} exceeds sequence length {len}")]
    RegionOutOfRange { start: i64, end: i64, len: usize },
}

/// Row of the gene pair table: `gene1<TAB>gene2<TAB>accession`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenePair {
    pub gene1: String,
    pub gene2: String,
    pub accession: String,
}

#[derive(Debug, Clone)]
pub struct GenbankConfig {
    pub pairs: PathBuf,
    pub gbff_dir: PathBuf,
    pub outdir: PathBuf,
    pub flank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct RegionSummary {
    #[tabled(rename = "Accession")]
    pub accession: String,
    #[tabled(rename = "Genes")]
    pub genes: String,
    #[tabled(rename = "CDS")]
    pub features: usize,
    #[tabled(rename = "Start")]
    pub start: i64,
    #[tabled(rename = "End")]
    pub end: i64,
}

/// A region cut from a record with its CDS features relocated
#[derive(Debug, Clone)]
pub struct Region {
    pub seq: Seq,
    pub start: i64,
    pub end: i64,
}

fn first_qualifier<'f>(feature: &'f Feature, key: &str) -> Option<&'f str> {
    feature
        .qualifiers
        .iter()
        .find(|(k, _)| &**k == key)
        .and_then(|(_, value)| value.as_deref())
}

/// CDS features of a record in record order
pub fn cds_features(seq: &Seq) -> Vec<&Feature> {
    seq.features.iter().filter(|f| &*f.kind == CDS).collect()
}

/// Indices of the features whose locus tag, protein identifier or gene name is one of `genes`
pub fn matched_indices(features: &[&Feature], genes: &[&str]) -> Vec<usize> {
    features
        .iter()
        .enumerate()
        .filter(|(_, feature)| {
            GENE_KEYS
                .iter()
                .filter_map(|key| first_qualifier(feature, key))
                .any(|value| genes.contains(&value))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Feature index window spanning both indices plus `flank` features on each side,
/// clamped to the record
pub fn flank_window(a: usize, b: usize, flank: usize, len: usize) -> Range<usize> {
    let start = a.min(b).saturating_sub(flank);
    let end = (a.max(b) + flank + 1).min(len);
    start..end
}

fn relocate(location: &Location, start: i64, end: i64, shift: i64) -> Location {
    let range = Location::simple_range(start - shift, end - shift);
    match location {
        Location::Complement(_) => Location::Complement(Box::new(range)),
        _ => range,
    }
}

/// Cut the record between the two genes, keeping `flank` CDS on each side
///
/// Returns `None` when fewer than two CDS features match the gene pair.
pub fn extract_region(record: &Seq, gene1: &str, gene2: &str, flank: usize) -> Result<Option<Region>, GenbankError> {
    let features = cds_features(record);
    let matched = matched_indices(&features, &[gene1, gene2]);

    let (Some(&first), Some(&last)) = (matched.first(), matched.last()) else {
        return Ok(None);
    };
    if matched.len() < 2 {
        return Ok(None);
    }

    let window = &features[flank_window(first, last, flank, features.len())];

    let mut bounds = Vec::with_capacity(window.len());
    for feature in window {
        let (start, end) = feature
            .location
            .find_bounds()
            .map_err(|_| GenbankError::Bounds(format!("{:?}", feature.location)))?;
        bounds.push((start, end));
    }
    let start = bounds.iter().map(|(s, _)| *s).min().unwrap_or(0);
    let end = bounds.iter().map(|(_, e)| *e).max().unwrap_or(0);

    if start < 0 || end as usize > record.seq.len() || start >= end {
        return Err(GenbankError::RegionOutOfRange { start, end, len: record.seq.len() });
    }

    let relocated = window
        .iter()
        .zip(&bounds)
        .map(|(feature, &(s, e))| Feature {
            kind: feature.kind.clone(),
            location: relocate(&feature.location, s, e, start),
            qualifiers: feature.qualifiers.clone(),
        })
        .collect();

    let mut seq = record.clone();
    seq.seq = record.seq[start as usize..end as usize].to_vec();
    seq.len = Some(seq.seq.len());
    seq.topology = Topology::Linear;
    seq.features = relocated;

    Ok(Some(Region { seq, start, end }))
}

fn read_pairs(path: &Path) -> Result<Vec<GenePair>, CladekitError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;

    let mut pairs = Vec::new();
    for rec in reader.deserialize() {
        pairs.push(rec?);
    }
    Ok(pairs)
}

fn read_records(path: &Path) -> Result<Vec<Seq>, CladekitError> {
    let mut records = Vec::new();
    for record in SeqReader::new(File::open(path)?) {
        let record = record.map_err(|err| GenbankError::Parse { path: path.to_path_buf(), message: err.to_string() })?;
        records.push(record);
    }
    Ok(records)
}

/// Write the short region of every gene pair as `{acc}_short_{gene1}_{gene2}.gbk`
///
/// Missing GenBank files and gene pairs not found in any record are skipped
/// with a warning.
pub fn run_genbank(config: &GenbankConfig) -> Result<Vec<RegionSummary>, CladekitError> {
    let pairs = read_pairs(&config.pairs)?;
    create_dir_all(&config.outdir)?;

    let mut summaries = Vec::new();
    for pair in &pairs {
        let path = config.gbff_dir.join(format!("{}.gbff", pair.accession));
        if !path.is_file() {
            log::warn!("GenBank file not found: {}", path.display());
            continue;
        }

        let mut found = false;
        for record in read_records(&path)? {
            let Some(region) = extract_region(&record, &pair.gene1, &pair.gene2, config.flank)? else {
                continue;
            };

            let output = config
                .outdir
                .join(format!("{}_short_{}_{}.gbk", pair.accession, pair.gene1, pair.gene2));
            gb_io::writer::write(BufWriter::new(File::create(&output)?), &region.seq)?;
            log::info!("Wrote {} ({}..{})", output.display(), region.start, region.end);

            summaries.push(RegionSummary {
                accession: pair.accession.clone(),
                genes: format!("{},{}", pair.gene1, pair.gene2),
                features: region.seq.features.len(),
                start: region.start,
                end: region.end,
            });
            found = true;
            break;
        }
        if !found {
            log::warn!("Could not find both genes {}, {} in {}", pair.gene1, pair.gene2, pair.accession);
        }
    }
    Ok(summaries)
}

#[cfg(test)]
#[cfg(not(tarpaulin_include))]
mod tests {

    use super::*;

    fn cds(start: i64, end: i64, locus_tag: &str, gene: Option<&str>) -> Feature {
        let mut qualifiers = vec![("locus_tag".into(), Some(locus_tag.to_string()))];
        if let Some(gene) = gene {
            qualifiers.push(("gene".into(), Some(gene.to_string())));
        }
        Feature { kind: CDS.into(), location: Location::simple_range(start, end), qualifiers }
    }

    // Six CDS of 10 bp separated by 5 bp, with a source feature in front
    fn record() -> Seq {
        let mut seq = Seq::empty();
        seq.name = Some("TEST".to_string());
        seq.seq = b"acgt".repeat(25);
        seq.len = Some(seq.seq.len());
        seq.features.push(Feature { kind: "source".into(), location: Location::simple_range(0, 100), qualifiers: vec![] });
        for i in 0..6 {
            let gene = match i {
                1 => Some("gyrB"),
                2 => Some("recA"),
                _ => None,
            };
            seq.features.push(cds(i * 15, i * 15 + 10, &format!("T{i}"), gene));
        }
        seq
    }

    #[test]
    fn flank_window_clamps_at_record_ends() {
        assert_eq!(flank_window(3, 5, 2, 10), 1..8);
        assert_eq!(flank_window(5, 3, 2, 10), 1..8);
        assert_eq!(flank_window(1, 2, 2, 10), 0..5);
        assert_eq!(flank_window(7, 9, 2, 10), 5..10);
        assert_eq!(flank_window(0, 1, 2, 3), 0..3);
    }

    #[test]
    fn matched_indices_use_any_gene_key() {
        let record = record();
        let features = cds_features(&record);
        assert_eq!(features.len(), 6);
        assert_eq!(matched_indices(&features, &["T0", "recA"]), vec![0, 2]);
        assert_eq!(matched_indices(&features, &["absent"]), Vec::<usize>::new());
    }

    #[test]
    fn extract_region_relocates_features() {
        let region = extract_region(&record(), "gyrB", "recA", 2).unwrap().unwrap();

        // CDS 0..5 are kept, the first starts at 0 and the fifth ends at 70
        assert_eq!((region.start, region.end), (0, 70));
        assert_eq!(region.seq.seq.len(), 70);
        assert_eq!(region.seq.features.len(), 5);
        assert_eq!(region.seq.features[4].location.find_bounds().unwrap(), (60, 70));

        let region = extract_region(&record(), "T4", "T5", 1).unwrap().unwrap();
        assert_eq!((region.start, region.end), (45, 85));
        assert_eq!(region.seq.features[0].location.find_bounds().unwrap(), (0, 10));
        assert_eq!(region.seq.features.len(), 3);
    }

    #[test]
    fn extract_region_requires_both_genes() {
        assert!(extract_region(&record(), "recA", "missing", 2).unwrap().is_none());
    }

    #[test]
    fn run_genbank_skips_missing_files_and_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let config = GenbankConfig {
            pairs: PathBuf::from("tests/cases/genbank/pairs.tsv"),
            gbff_dir: PathBuf::from("tests/cases/genbank"),
            outdir: dir.path().to_path_buf(),
            flank: 2,
        };
        let summaries = run_genbank(&config).unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].accession, "NZ_TEST01");
        assert_eq!(summaries[0].features, 7);
        assert_eq!((summaries[0].start, summaries[0].end), (0, 170));
        assert!(dir.path().join("NZ_TEST01_short_TST_0003_recA.gbk").is_file());
    }
}
