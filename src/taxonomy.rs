use std::fmt;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CladekitError;

/// Sentinel for unresolved ranks in taxonomy tables
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Superkingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}
impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Superkingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];
}
impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rank = match self {
            Rank::Superkingdom => "superkingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        };
        write!(f, "{rank}")
    }
}

/// Taxonomic lineage of a sequence identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    pub full_id: String,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub superkingdom: Option<String>,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub phylum: Option<String>,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub class: Option<String>,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub order: Option<String>,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub family: Option<String>,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub genus: Option<String>,
    #[serde(default, deserialize_with = "deserialize_taxon")]
    pub species: Option<String>,
}
impl TaxonomyRecord {
    pub fn rank(&self, rank: Rank) -> Option<&str> {
        match rank {
            Rank::Superkingdom => self.superkingdom.as_deref(),
            Rank::Phylum => self.phylum.as_deref(),
            Rank::Class => self.class.as_deref(),
            Rank::Order => self.order.as_deref(),
            Rank::Family => self.family.as_deref(),
            Rank::Genus => self.genus.as_deref(),
            Rank::Species => self.species.as_deref(),
        }
    }
    pub fn set_rank(&mut self, rank: Rank, value: Option<String>) {
        let field = match rank {
            Rank::Superkingdom => &mut self.superkingdom,
            Rank::Phylum => &mut self.phylum,
            Rank::Class => &mut self.class,
            Rank::Order => &mut self.order,
            Rank::Family => &mut self.family,
            Rank::Genus => &mut self.genus,
            Rank::Species => &mut self.species,
        };
        *field = value;
    }
}

// Empty cells and the `NA` null token are read as missing ranks
fn deserialize_taxon<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "NA"))
}

/// Taxonomy table keyed by sequence identifier in file order
#[derive(Debug, Clone, Default)]
pub struct TaxonomyTable {
    records: IndexMap<String, TaxonomyRecord>,
}
impl TaxonomyTable {
    pub fn from_tsv(path: &Path) -> Result<Self, CladekitError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let mut records = IndexMap::new();
        for rec in reader.deserialize() {
            let record: TaxonomyRecord = rec?;
            records.insert(record.full_id.clone(), record);
        }
        Ok(Self { records })
    }
    pub fn from_records(records: Vec<TaxonomyRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.full_id.clone(), r)).collect(),
        }
    }
    pub fn get(&self, id: &str) -> Option<&TaxonomyRecord> {
        self.records.get(id)
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/*
=================
Leaf matching
=================
*/

#[derive(Debug, Clone)]
struct MatchKey {
    stripped: String,
    accession: Option<String>,
}

/// Matches tree leaf names against taxonomy identifiers
///
/// Exact identifiers are preferred. Otherwise the first table entry (in file
/// order) is taken whose identifier contains or is contained in the leaf
/// name, equals it after removing a `GCF_<n>.<n>-` assembly prefix, or
/// shares its `WP_<n>.<n>` protein accession.
pub struct TaxonomyMatcher<'a> {
    table: &'a TaxonomyTable,
    assembly_prefix: Regex,
    protein_accession: Regex,
    keys: Vec<MatchKey>,
}

#[derive(Debug, Clone, Default)]
pub struct LeafMatches<'a> {
    /// Matched leaves in tree order
    pub matched: Vec<(String, &'a TaxonomyRecord)>,
    pub unmatched: Vec<String>,
}

impl<'a> TaxonomyMatcher<'a> {
    pub fn new(table: &'a TaxonomyTable) -> Result<Self, CladekitError> {
        let assembly_prefix = Regex::new(r"^GCF_\d+\.\d+-")?;
        let protein_accession = Regex::new(r"WP_\d+\.\d+")?;

        let keys = table
            .records
            .keys()
            .map(|id| MatchKey {
                stripped: assembly_prefix.replace(id, "").into_owned(),
                accession: protein_accession.find(id).map(|m| m.as_str().to_string()),
            })
            .collect();

        Ok(Self { table, assembly_prefix, protein_accession, keys })
    }
    pub fn match_leaf(&self, leaf: &str) -> Option<&'a TaxonomyRecord> {
        if let Some(record) = self.table.records.get(leaf) {
            return Some(record);
        }

        let stripped = self.assembly_prefix.replace(leaf, "");
        let accession = self.protein_accession.find(leaf).map(|m| m.as_str());

        for ((id, record), key) in self.table.records.iter().zip(&self.keys) {
            if id.is_empty() {
                continue;
            }
            if leaf.contains(id.as_str()) || id.contains(leaf) {
                return Some(record);
            }
            if key.stripped == stripped {
                return Some(record);
            }
            if let (Some(a), Some(b)) = (accession, key.accession.as_deref()) {
                if a == b {
                    return Some(record);
                }
            }
        }
        None
    }
    /// Empty and purely numeric leaf names (support values) are skipped
    pub fn match_leaves<'l, I>(&self, leaves: I) -> LeafMatches<'a>
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut matches = LeafMatches::default();
        for leaf in leaves {
            if leaf.is_empty() || leaf.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            match self.match_leaf(leaf) {
                Some(record) => matches.matched.push((leaf.to_string(), record)),
                None => matches.unmatched.push(leaf.to_string()),
            }
        }
        matches
    }
}

/*
=================
Grouping
=================
*/

/// Group label mapped to its member identifiers, in first-seen order
pub type TaxonomicGroups = IndexMap<String, IndexSet<String>>;

fn known(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty() && *v != UNKNOWN)
}

/// Group label of a record at the given rank
///
/// At phylum rank Archaea are kept together under "Archaea" instead of
/// being split by phylum. Records without a usable label are not grouped.
pub fn group_label(record: &TaxonomyRecord, rank: Rank) -> Option<&str> {
    match rank {
        Rank::Phylum if record.superkingdom.as_deref() == Some("Archaea") => Some("Archaea"),
        rank => known(record.rank(rank)),
    }
}

pub fn group_by_rank<'r, I>(matched: I, rank: Rank) -> TaxonomicGroups
where
    I: IntoIterator<Item = (&'r str, &'r TaxonomyRecord)>,
{
    let mut groups = TaxonomicGroups::new();
    for (id, record) in matched {
        if let Some(label) = group_label(record, rank) {
            groups.entry(label.to_string()).or_default().insert(id.to_string());
        }
    }
    groups
}

#[cfg(test)]
#[cfg(not(tarpaulin_include))]
mod tests {

    use super::*;
    use std::path::PathBuf;

    fn record(id: &str, superkingdom: &str, phylum: &str) -> TaxonomyRecord {
        TaxonomyRecord {
            full_id: id.to_string(),
            superkingdom: Some(superkingdom.to_string()),
            phylum: Some(phylum.to_string()),
            ..Default::default()
        }
    }

    /*
    ===============
       Grouping
    ===============
    */

    #[test]
    fn phylum_groups_archaea_together() {
        let rec = record("a1", "Archaea", "Euryarchaeota");
        assert_eq!(group_label(&rec, Rank::Phylum), Some("Archaea"));
        assert_eq!(group_label(&rec, Rank::Superkingdom), Some("Archaea"));
    }

    #[test]
    fn phylum_drops_unknown_bacteria() {
        let rec = record("b1", "Bacteria", "Unknown");
        assert_eq!(group_label(&rec, Rank::Phylum), None);

        let mut rec = record("b2", "Bacteria", "");
        assert_eq!(group_label(&rec, Rank::Phylum), None);
        rec.phylum = None;
        assert_eq!(group_label(&rec, Rank::Phylum), None);
    }

    #[test]
    fn phylum_uses_phylum_for_other_superkingdoms() {
        assert_eq!(group_label(&record("b", "Bacteria", "Bacillota"), Rank::Phylum), Some("Bacillota"));
        assert_eq!(group_label(&record("e", "Eukaryota", "Chordata"), Rank::Phylum), Some("Chordata"));
    }

    #[test]
    fn other_ranks_drop_missing_values() {
        let mut rec = record("x", "Bacteria", "Bacillota");
        rec.class = Some("Bacilli".to_string());
        rec.order = Some(UNKNOWN.to_string());
        assert_eq!(group_label(&rec, Rank::Class), Some("Bacilli"));
        assert_eq!(group_label(&rec, Rank::Order), None);
        assert_eq!(group_label(&rec, Rank::Family), None);
    }

    #[test]
    fn group_by_rank_collects_members() {
        let records = vec![
            record("s1", "Bacteria", "Bacillota"),
            record("s2", "Archaea", "Euryarchaeota"),
            record("s3", "Bacteria", "Bacillota"),
            record("s4", "Bacteria", "Unknown"),
            record("s5", "Archaea", "Thermoproteota"),
        ];
        let groups = group_by_rank(records.iter().map(|r| (r.full_id.as_str(), r)), Rank::Phylum);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["Bacillota"].iter().collect::<Vec<_>>(), vec!["s1", "s3"]);
        assert_eq!(groups["Archaea"].iter().collect::<Vec<_>>(), vec!["s2", "s5"]);
        assert!(groups.values().all(|members| !members.contains("s4")));
    }

    /*
    ===============
     Table loading
    ===============
    */

    #[test]
    fn taxonomy_table_from_tsv_ok() {
        let table = TaxonomyTable::from_tsv(&PathBuf::from("tests/cases/taxonomy.tsv")).unwrap();
        assert_eq!(table.len(), 8);

        let rec = table.get("GCF_000005845.2-WP_000001.1").unwrap();
        assert_eq!(rec.superkingdom.as_deref(), Some("Bacteria"));
        assert_eq!(rec.phylum.as_deref(), Some("Pseudomonadota"));
        assert_eq!(rec.class.as_deref(), Some("Gammaproteobacteria"));

        // Empty cells and NA are missing values
        let rec = table.get("GCF_000009045.1-WP_000007.1").unwrap();
        assert_eq!(rec.family, None);
        assert_eq!(rec.genus, None);
    }

    #[test]
    fn taxonomy_table_missing_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.tsv");
        std::fs::write(&path, "full_id\tsuperkingdom\tphylum\nseq1\tBacteria\tBacillota\n").unwrap();

        let table = TaxonomyTable::from_tsv(&path).unwrap();
        let rec = table.get("seq1").unwrap();
        assert_eq!(rec.phylum.as_deref(), Some("Bacillota"));
        assert_eq!(rec.class, None);
        assert_eq!(rec.species, None);
    }

    /*
    ===============
     Leaf matching
    ===============
    */

    fn matcher_table() -> TaxonomyTable {
        TaxonomyTable::from_records(vec![
            record("GCF_000001.1-WP_100.1", "Bacteria", "Bacillota"),
            record("GCF_000002.1-protein7", "Bacteria", "Pseudomonadota"),
            record("GCF_000003.1-WP_300.2", "Archaea", "Euryarchaeota"),
            record("exact_id", "Bacteria", "Chloroflexota"),
        ])
    }

    #[test]
    fn matcher_exact_and_substring() {
        let table = matcher_table();
        let matcher = TaxonomyMatcher::new(&table).unwrap();

        assert_eq!(matcher.match_leaf("exact_id").unwrap().full_id, "exact_id");
        // Leaf contains the taxonomy identifier
        assert_eq!(
            matcher.match_leaf("GCF_000001.1-WP_100.1_trimmed").unwrap().full_id,
            "GCF_000001.1-WP_100.1"
        );
        // Taxonomy identifier contains the leaf
        assert_eq!(matcher.match_leaf("protein7").unwrap().full_id, "GCF_000002.1-protein7");
    }

    #[test]
    fn matcher_assembly_prefix_and_accession() {
        let table = matcher_table();
        let matcher = TaxonomyMatcher::new(&table).unwrap();

        assert_eq!(
            matcher.match_leaf("GCF_999999.9-protein7").unwrap().full_id,
            "GCF_000002.1-protein7"
        );
        assert_eq!(matcher.match_leaf("sample|WP_300.2|x").unwrap().full_id, "GCF_000003.1-WP_300.2");
        assert!(matcher.match_leaf("WP_999.1").is_none());
    }

    #[test]
    fn matcher_skips_numeric_leaves() {
        let table = matcher_table();
        let matcher = TaxonomyMatcher::new(&table).unwrap();

        let matches = matcher.match_leaves(vec!["exact_id", "100", "", "unmatched_leaf"]);
        assert_eq!(matches.matched.len(), 1);
        assert_eq!(matches.matched[0].0, "exact_id");
        assert_eq!(matches.unmatched, vec!["unmatched_leaf".to_string()]);
    }
}
