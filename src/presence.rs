use std::fs::read_dir;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use crate::error::CladekitError;
use crate::utils::{get_file_component, get_seq_id, parse_fastx_file_with_check, FileComponent};

/// Species epithets whose identifiers carry two prefix tokens instead of one
const TWO_TOKEN_PREFIX: &[&str] = &["rubra"];

const FASTA_EXTENSIONS: &[&str] = &["fasta", "faa"];

/// Species identifier of a record identifier
///
/// The identifier is split on `_`: when the fifth token is a known epithet
/// the species is everything from the third token, otherwise everything
/// after the first token.
pub fn species_id(record_id: &str) -> Option<String> {
    let parts: Vec<&str> = record_id.split('_').collect();
    if parts.len() > 4 && TWO_TOKEN_PREFIX.contains(&parts[4]) {
        Some(parts[2..].join("_"))
    } else if parts.len() > 1 {
        Some(parts[1..].join("_"))
    } else {
        None
    }
}

/// Gene presence (1) or absence (0) per species
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMatrix {
    pub genes: Vec<String>,
    pub species: Vec<String>,
    values: Vec<Vec<u32>>,
}

impl PresenceMatrix {
    /// Matrix with the given gene columns from species in first-seen order
    pub fn from_presence(presence: &IndexMap<String, IndexSet<String>>, genes: &[String]) -> Self {
        let species: Vec<String> = presence.keys().cloned().collect();
        let values = presence
            .values()
            .map(|present| genes.iter().map(|g| u32::from(present.contains(g))).collect())
            .collect();
        Self { genes: genes.to_vec(), species, values }
    }
    /// Scan `.fasta` and `.faa` files (one gene each, named by file stem)
    pub fn from_fasta_dir(dir: &Path, genes: &[String]) -> Result<Self, CladekitError> {
        let mut files: Vec<PathBuf> = read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map_or(false, |ext| FASTA_EXTENSIONS.contains(&ext))
            })
            .collect();
        files.sort();

        let mut presence: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for file in &files {
            let gene = get_file_component(file, FileComponent::FileStem)?;
            log::info!("Processing gene: {gene}");

            let Some(mut reader) = parse_fastx_file_with_check(file)? else {
                log::warn!("Empty sequence file: {}", file.display());
                continue;
            };
            while let Some(record) = reader.next() {
                let record = record?;
                let id = get_seq_id(record.id())?;
                match species_id(&id) {
                    Some(species) => {
                        log::debug!("Identified species: {species} for gene: {gene}");
                        presence.entry(species).or_default().insert(gene.clone());
                    }
                    None => log::warn!("Unexpected format in record identifier: {id}"),
                }
            }
        }

        let unlisted = presence
            .values()
            .flatten()
            .filter(|gene| !genes.contains(gene))
            .unique()
            .join(", ");
        if !unlisted.is_empty() {
            log::warn!("Genes not in the gene order are left out: {unlisted}");
        }
        Ok(Self::from_presence(&presence, genes))
    }
    pub fn value(&self, species: &str, gene: &str) -> Option<u32> {
        let row = self.species.iter().position(|s| s == species)?;
        let col = self.genes.iter().position(|g| g == gene)?;
        Some(self.values[row][col])
    }
    pub fn rows(&self) -> impl Iterator<Item = (&String, &Vec<u32>)> {
        self.species.iter().zip(&self.values)
    }
    pub fn max_value(&self) -> u32 {
        self.values.iter().flatten().copied().max().unwrap_or(0)
    }
    /// Rows in the given species order; unknown species get all-zero rows
    pub fn reindex(&self, species_order: &[String]) -> Self {
        let values = species_order
            .iter()
            .map(|species| match self.species.iter().position(|s| s == species) {
                Some(row) => self.values[row].clone(),
                None => vec![0; self.genes.len()],
            })
            .collect();
        Self { genes: self.genes.clone(), species: species_order.to_vec(), values }
    }
    /// CSV with an empty first header cell and species row labels
    pub fn write_csv(&self, path: &Path) -> Result<(), CladekitError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;

        let mut header = vec![String::new()];
        header.extend(self.genes.iter().cloned());
        writer.write_record(&header)?;

        for (species, row) in self.rows() {
            let mut record = vec![species.clone()];
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
    pub fn read_csv(path: &Path) -> Result<Self, CladekitError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
        let mut records = reader.records();

        let header = match records.next() {
            Some(header) => header?,
            None => return Err(CladekitError::MatrixHeaderMissing(path.to_path_buf())),
        };
        let genes: Vec<String> = header.iter().skip(1).map(|g| g.to_string()).collect();

        let mut species = Vec::new();
        let mut values = Vec::new();
        for record in records {
            let record = record?;
            let name = record.get(0).unwrap_or_default().to_string();
            let mut row = Vec::with_capacity(genes.len());
            for cell in record.iter().skip(1) {
                let cell = cell.trim();
                // Empty cells count as absent
                let value = if cell.is_empty() {
                    0
                } else {
                    cell.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && *v >= 0.0)
                        .map(|v| v as u32)
                        .ok_or_else(|| CladekitError::MatrixValue {
                            path: path.to_path_buf(),
                            species: name.clone(),
                            value: cell.to_string(),
                        })?
                };
                row.push(value);
            }
            species.push(name);
            values.push(row);
        }
        Ok(Self { genes, species, values })
    }
}
