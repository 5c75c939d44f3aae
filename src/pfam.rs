use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use needletail::parser::write_fasta;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::error::CladekitError;
use crate::utils::{get_niffler_fastx_writer, get_seq_id, parse_fastx_file_with_check};

const PFAM_LIBRARY: &str = "PFAM";

/*
=================================
InterProScan JSON (subset)
=================================
*/

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterProScan {
    #[serde(default)]
    pub results: Vec<InterProResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterProResult {
    #[serde(default)]
    pub xref: Vec<CrossReference>,
    #[serde(default)]
    pub matches: Vec<SignatureMatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossReference {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignatureMatch {
    #[serde(default)]
    pub signature: Signature,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Signature {
    pub accession: Option<String>,
    #[serde(rename = "signatureLibraryRelease", default)]
    pub library_release: LibraryRelease,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryRelease {
    pub library: Option<String>,
}

impl InterProScan {
    pub fn from_file(path: &Path) -> Result<Self, CladekitError> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }
}

impl InterProResult {
    /// Sequence identifier of the first cross reference
    pub fn sequence_id(&self) -> Option<&str> {
        self.xref.first().and_then(|x| x.id.as_deref()).filter(|id| !id.is_empty())
    }
    pub fn pfam_domains(&self) -> BTreeSet<String> {
        self.matches
            .iter()
            .filter(|m| m.signature.library_release.library.as_deref() == Some(PFAM_LIBRARY))
            .filter_map(|m| m.signature.accession.clone())
            .collect()
    }
}

/*
=================================
Filtering
=================================
*/

/// Expected PFAM domain set per protein, in table order
pub type DomainTable = IndexMap<String, BTreeSet<String>>;

/// Read `protein,domain,domain,...` rows without header
pub fn read_domain_table(path: &Path) -> Result<DomainTable, CladekitError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut table = DomainTable::new();
    for record in reader.records() {
        let record = record?;
        let Some(protein) = record.get(0).map(|p| p.trim()).filter(|p| !p.is_empty()) else {
            continue;
        };
        let domains: BTreeSet<String> = record
            .iter()
            .skip(1)
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect();
        if domains.is_empty() {
            log::warn!("No PFAM domains found for {protein} in the domain table");
            continue;
        }
        table.insert(protein.to_string(), domains);
    }
    Ok(table)
}

/// Sequence identifiers whose PFAM domain set equals the expected set exactly
pub fn matching_sequences(scan: &InterProScan, expected: &BTreeSet<String>) -> BTreeSet<String> {
    let mut selected = BTreeSet::new();
    for result in &scan.results {
        let Some(id) = result.sequence_id() else {
            log::warn!("Skipping result without a sequence identifier");
            continue;
        };
        let domains = result.pfam_domains();
        log::debug!("Domains found for {id}: {domains:?}");
        if &domains == expected {
            selected.insert(id.to_string());
        } else {
            log::debug!("Domains for {id} do not match: expected {expected:?}, found {domains:?}");
        }
    }
    selected
}

#[derive(Debug, Clone)]
pub struct PfamConfig {
    pub directory: PathBuf,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct PfamSummary {
    #[tabled(rename = "Protein")]
    pub protein: String,
    #[tabled(rename = "Matching")]
    pub matching: usize,
    #[tabled(rename = "Written")]
    pub written: usize,
    #[tabled(rename = "Sequences")]
    pub sequences: usize,
}

/// Copy the records of a FASTA file whose identifier is selected
///
/// Returns the number of records read and written.
pub fn filter_fasta(input: &Path, output: &PathBuf, selected: &BTreeSet<String>) -> Result<(usize, usize), CladekitError> {
    let mut writer = get_niffler_fastx_writer(output)?;
    let Some(mut reader) = parse_fastx_file_with_check(input)? else {
        return Ok((0, 0));
    };

    let (mut total, mut written) = (0, 0);
    while let Some(rec) = reader.next() {
        let record = rec?;
        let id = get_seq_id(record.id())?;
        total += 1;
        if selected.contains(&id) {
            write_fasta(record.id(), &record.seq(), &mut writer, record.line_ending())?;
            written += 1;
        } else {
            log::debug!("Skipping {id}, domains do not match");
        }
    }
    Ok((total, written))
}

/// Filter every protein of the domain table in `directory`
///
/// Proteins with a missing or unreadable InterProScan result or FASTA file
/// are skipped.
pub fn run_pfam(config: &PfamConfig) -> Result<Vec<PfamSummary>, CladekitError> {
    let table = read_domain_table(&config.directory.join(&config.table))?;
    let mut summaries = Vec::new();

    for (protein, expected) in &table {
        let json = config.directory.join(format!("{protein}.json"));
        let fasta = config.directory.join(format!("{protein}.faa"));
        let output = config.directory.join(format!("{protein}_filtered.faa"));

        if !json.is_file() {
            log::warn!("InterProScan file not found for {protein}, skipping");
            continue;
        }
        if !fasta.is_file() {
            log::warn!("FASTA file not found for {protein}, skipping");
            continue;
        }
        let scan = match InterProScan::from_file(&json) {
            Ok(scan) => scan,
            Err(err) => {
                log::warn!("Failed to read InterProScan file for {protein}: {err}");
                continue;
            }
        };

        let selected = matching_sequences(&scan, expected);
        log::info!("{} sequences found for protein {protein}", selected.len());

        let (sequences, written) = match filter_fasta(&fasta, &output, &selected) {
            Ok(counts) => counts,
            Err(err) => {
                log::warn!("Failed to filter FASTA file for {protein}: {err}");
                continue;
            }
        };
        log::info!("Filtered sequences written for {protein} to {}", output.display());

        summaries.push(PfamSummary { protein: protein.clone(), matching: selected.len(), written, sequences });
    }
    Ok(summaries)
}
