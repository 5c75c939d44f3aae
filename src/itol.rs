use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tabled::Tabled;

use crate::error::CladekitError;
use crate::partition::NamedClusterMap;
use crate::taxonomy::UNKNOWN;

/// Legend label for groups without a palette colour
pub const OTHER_GROUP: &str = "Other Phylum";

/// Group colours in order of abundance in the reference database
#[derive(Debug, Clone)]
pub struct Palette {
    colors: IndexMap<&'static str, &'static str>,
}
impl Default for Palette {
    fn default() -> Self {
        let colors = [
            ("Pseudomonadota", "#4682b4"),
            ("Bacillota", "#7df9ff"),
            ("Actinomycetota", "#32cd32"),
            ("Bacteroidota", "#ff1493"),
            ("Cyanobacteriota", "#00bfff"),
            ("Euryarchaeota", "#00a86b"),
            ("Planctomycetota", "#ffb90f"),
            ("Thermodesulfobacteriota", "#87ceeb"),
            ("Verrucomicrobiota", "#9370db"),
            ("Campylobacterota", "#6495ed"),
            ("Myxococcota", "#ff8c00"),
            ("Deinococcota", "#dc143c"),
            ("Acidobacteriota", "#ff6347"),
            ("Chlamydiota", "#8a2be2"),
            ("Chloroflexota", "#00ced1"),
            ("Spirochaetota", "#9932cc"),
            ("Thermoproteota", "#20b2aa"),
            ("Aquificota", "#40e0d0"),
            ("Nitrospirota", "#98fb98"),
            ("Fusobacteriota", "#ffd700"),
            ("Nitrososphaerota", "#ff69b4"),
            ("Chlorobiota", "#dda0dd"),
            ("Archaea", "#00a86b"),
            (OTHER_GROUP, "#b0e0e6"),
            (UNKNOWN, "#d3d3d3"),
        ];
        Self { colors: colors.into_iter().collect() }
    }
}
impl Palette {
    /// Colour of a group listed in the palette
    pub fn color(&self, group: &str) -> Option<&'static str> {
        self.colors.get(group).copied()
    }
    /// Colour of a group, using the shared colour for unlisted groups
    pub fn color_or_other(&self, group: &str) -> &'static str {
        self.color(group).unwrap_or_else(|| self.other())
    }
    fn other(&self) -> &'static str {
        self.colors.get(OTHER_GROUP).copied().unwrap_or("#b0e0e6")
    }
    fn is_listed(&self, group: &str) -> bool {
        self.colors.contains_key(group)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct LegendEntry {
    #[tabled(rename = "Legend")]
    pub label: String,
    #[tabled(rename = "Colour")]
    pub color: String,
    #[tabled(rename = "Clusters")]
    pub clusters: usize,
    #[tabled(rename = "Includes")]
    #[tabled(display_with = "display_groups")]
    pub includes: Vec<String>,
}

fn display_groups(groups: &[String]) -> String {
    groups.join(", ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct ClusterRow {
    #[tabled(rename = "Cluster")]
    pub name: String,
    #[tabled(rename = "Group")]
    pub group: String,
    #[tabled(rename = "Sequences")]
    pub size: usize,
    #[tabled(rename = "Representative")]
    pub representative: String,
    #[tabled(rename = "Colour")]
    pub color: String,
}

/// iTOL datasets for the named clusters of one tree
pub struct ItolDataset<'a> {
    clusters: &'a NamedClusterMap,
    palette: &'a Palette,
    tree_name: String,
    rooting: Option<String>,
}

impl<'a> ItolDataset<'a> {
    pub fn new(clusters: &'a NamedClusterMap, palette: &'a Palette, tree_name: &str, rooting: Option<String>) -> Self {
        Self { clusters, palette, tree_name: tree_name.to_string(), rooting }
    }
    /// Legend entries for the groups present, in palette order
    ///
    /// Unlisted groups are folded into a single `Other Phylum` entry.
    pub fn legend(&self) -> Vec<LegendEntry> {
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        let mut other = Vec::new();
        let mut other_clusters = 0;

        for (key, _) in self.clusters.iter() {
            if self.palette.is_listed(&key.group) {
                *counts.entry(key.group.as_str()).or_default() += 1;
            } else {
                other_clusters += 1;
                if !other.contains(&key.group) {
                    other.push(key.group.clone());
                }
            }
        }

        let mut legend: Vec<LegendEntry> = self
            .palette
            .colors
            .iter()
            .filter(|(label, _)| **label != OTHER_GROUP && **label != UNKNOWN)
            .filter_map(|(label, color)| {
                counts.get(label).map(|&clusters| LegendEntry {
                    label: label.to_string(),
                    color: color.to_string(),
                    clusters,
                    includes: Vec::new(),
                })
            })
            .collect();

        if other_clusters > 0 {
            legend.push(LegendEntry {
                label: OTHER_GROUP.to_string(),
                color: self.palette.other().to_string(),
                clusters: other_clusters,
                includes: other,
            });
        }
        legend
    }
    pub fn cluster_rows(&self) -> Vec<ClusterRow> {
        self.clusters
            .iter()
            .map(|(key, cluster)| ClusterRow {
                name: key.to_string(),
                group: key.group.clone(),
                size: cluster.len(),
                representative: cluster.first().cloned().unwrap_or_default(),
                color: self.palette.color_or_other(&key.group).to_string(),
            })
            .collect()
    }
    /// Write the `DATASET_RANGE` colouring, one range per sequence
    ///
    /// Returns the number of sequences written.
    pub fn write_ranges<W: Write>(&self, mut writer: W) -> Result<usize, CladekitError> {
        writeln!(writer, "DATASET_RANGE")?;
        writeln!(writer, "#Automatically generated iTOL file for taxonomic range coloring")?;
        writeln!(writer, "#Tree: {}", self.tree_name)?;
        writeln!(writer, "#Generated by cladekit itol (DATASET_RANGE format)")?;
        writeln!(writer, "#Individual sequence coloring (each sequence colored separately)")?;
        writeln!(writer, "#Legend shows only taxonomic groups present in this tree")?;
        writeln!(writer, "#Rare phyla are grouped as '{OTHER_GROUP}'")?;
        if let Some(rooting) = &self.rooting {
            writeln!(writer, "#Rooting: {rooting}")?;
        }
        writeln!(writer)?;

        writeln!(writer, "SEPARATOR COMMA")?;
        writeln!(writer)?;
        writeln!(writer, "DATASET_LABEL,Taxonomic_Ranges")?;
        writeln!(writer, "COLOR,#ffff00")?;
        writeln!(writer)?;

        writeln!(writer, "RANGE_TYPE,box")?;
        writeln!(writer, "RANGE_COVER,label")?;
        writeln!(writer, "UNROOTED_SMOOTH,simplify")?;
        writeln!(writer, "COVER_LABELS,1")?;
        writeln!(writer, "COVER_DATASETS,0")?;
        writeln!(writer, "FIT_LABELS,0")?;
        writeln!(writer)?;

        let legend = self.legend();
        if !legend.is_empty() {
            let ones = vec!["1"; legend.len()].join(",");
            let colors: Vec<&str> = legend.iter().map(|e| e.color.as_str()).collect();
            let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();

            writeln!(writer, "LEGEND_TITLE,Taxonomy")?;
            writeln!(writer, "LEGEND_POSITION_X,100")?;
            writeln!(writer, "LEGEND_POSITION_Y,100")?;
            writeln!(writer, "LEGEND_HORIZONTAL,0")?;
            writeln!(writer, "LEGEND_SHAPES,{ones}")?;
            writeln!(writer, "LEGEND_COLORS,{}", colors.join(","))?;
            writeln!(writer, "LEGEND_LABELS,{}", labels.join(","))?;
            writeln!(writer, "LEGEND_SHAPE_SCALES,{ones}")?;
        }
        writeln!(writer)?;

        writeln!(writer, "DATA")?;
        let mut sequences = 0;
        for (key, cluster) in self.clusters.iter() {
            let color = self.palette.color_or_other(&key.group);
            for id in cluster {
                writeln!(writer, "{id},{id},{color}")?;
                sequences += 1;
            }
        }
        writeln!(writer)?;
        writeln!(writer, "# End of range data")?;
        writer.flush()?;

        Ok(sequences)
    }
    /// Write the `DATASET_TEXT` labels, one per cluster on its first member
    pub fn write_labels<W: Write>(&self, mut writer: W) -> Result<usize, CladekitError> {
        let banner = "#=================================================================#";

        writeln!(writer, "DATASET_TEXT")?;
        writeln!(writer, "#External text labels for taxonomic groups")?;
        writeln!(writer, "#Shows actual group names only (no cluster/isolated info)")?;
        writeln!(writer, "#Tree: {}", self.tree_name)?;
        writeln!(writer, "#Generated by cladekit itol")?;
        if let Some(rooting) = &self.rooting {
            writeln!(writer, "#Rooting: {rooting}")?;
        }
        writeln!(writer)?;

        writeln!(writer, "{banner}")?;
        writeln!(writer, "#                    MANDATORY SETTINGS                           #")?;
        writeln!(writer, "{banner}")?;
        writeln!(writer, "SEPARATOR TAB\n")?;
        writeln!(writer, "DATASET_LABEL\tTaxonomic Groups")?;
        writeln!(writer, "COLOR\t#000000\n")?;

        writeln!(writer, "{banner}")?;
        writeln!(writer, "#                    OPTIONAL SETTINGS                           #")?;
        writeln!(writer, "{banner}")?;
        writeln!(writer, "MARGIN\t20")?;
        writeln!(writer, "SHOW_INTERNAL\t0")?;
        writeln!(writer, "LABEL_ROTATION\t0")?;
        writeln!(writer, "ALIGN_TO_TREE\t0")?;
        writeln!(writer, "SIZE_FACTOR\t1.3\n")?;

        writeln!(writer, "{banner}")?;
        writeln!(writer, "#       Actual data follows after the \"DATA\" keyword              #")?;
        writeln!(writer, "{banner}")?;
        writeln!(writer, "DATA")?;
        writeln!(writer, "#ID\tlabel\tposition\tcolor\tstyle\tsize_factor\trotation\n")?;

        let mut labels = 0;
        for (key, cluster) in self.clusters.iter() {
            let Some(representative) = cluster.first() else {
                continue;
            };
            // Unlisted groups share a colour and are set in italics
            let style = if self.palette.is_listed(&key.group) { "bold" } else { "italic" };
            let color = self.palette.color_or_other(&key.group);
            writeln!(writer, "{representative}\t{}\t-1\t{color}\t{style}\t1.3\t0", key.group)?;
            labels += 1;
        }
        writer.flush()?;

        Ok(labels)
    }
    pub fn write_range_file(&self, path: &Path) -> Result<usize, CladekitError> {
        self.write_ranges(BufWriter::new(File::create(path)?))
    }
    pub fn write_label_file(&self, path: &Path) -> Result<usize, CladekitError> {
        self.write_labels(BufWriter::new(File::create(path)?))
    }
}
