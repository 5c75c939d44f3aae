use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const TREE: &str = "tests/cases/trees/recA_verification_aligned.treefile";
const TAXONOMY: &str = "tests/cases/taxonomy.tsv";

#[test]
fn input_file_doesnt_exist() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["itol", "file/doesnt/exist.treefile", TAXONOMY]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));

    Ok(())
}

#[test]
fn outgroup_rooting_without_outgroup_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["itol", TREE, TAXONOMY, "--root-method", "outgroup"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--outgroup"));

    Ok(())
}

#[test]
fn itol_unrooted_range_and_label_datasets() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("recA_itol_colors.txt");

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["itol", TREE, TAXONOMY]);
    cmd.arg("-o").arg(&output).args(vec!["--root-method", "none", "--labels"]);
    cmd.assert().success();

    let ranges = std::fs::read_to_string(&output)?;
    assert!(ranges.starts_with("DATASET_RANGE\n"));
    assert!(ranges.contains("#Tree: recA_verification_aligned.treefile\n"));
    assert!(ranges.contains("LEGEND_COLORS,#4682b4,#7df9ff,#00a86b,#b0e0e6\n"));
    assert!(ranges.contains("LEGEND_LABELS,Pseudomonadota,Bacillota,Archaea,Other Phylum\n"));
    assert!(ranges.contains("GCF_999999999.9-WP_000007.1,GCF_999999999.9-WP_000007.1,#7df9ff\n"));
    assert!(ranges.contains("GCF_000007805.1-WP_000005.1,GCF_000007805.1-WP_000005.1,#00a86b\n"));
    assert!(!ranges.contains("unmatched_seq"));
    assert!(!ranges.contains("GCF_000012345.1-WP_000008.1"));
    assert!(ranges.ends_with("# End of range data\n"));

    // Isolated members are labelled with their group name only
    let labels = std::fs::read_to_string(dir.path().join("recA_itol_labels.txt"))?;
    assert!(labels.contains("GCF_000005845.2-WP_000001.1\tPseudomonadota\t-1\t#4682b4\tbold\t1.3\t0\n"));
    assert!(labels.contains("GCF_000008505.1-WP_000004.1\tBacillota\t-1\t#7df9ff\tbold\t1.3\t0\n"));
    assert!(!labels.contains("isolated"));

    Ok(())
}

#[test]
fn itol_midpoint_saves_rooted_tree() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("recA_itol_colors.txt");

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["itol", TREE, TAXONOMY, "--save-rooted", "-l", "phylum"]).arg("-o").arg(&output);
    cmd.assert().success();

    let ranges = std::fs::read_to_string(&output)?;
    assert!(ranges.contains("#Rooting: Midpoint rooting applied\n"));

    let rooted = std::fs::read_to_string(dir.path().join("recA_midpoint.treefile"))?;
    assert!(rooted.trim_end().ends_with(';'));
    assert!(rooted.contains("GCF_000005845.2-WP_000001.1"));

    Ok(())
}

#[test]
fn batch_continues_after_broken_tree() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["batch", "--trees", "tests/cases/trees", "--taxonomy", TAXONOMY, "--threads", "2"])
        .arg("--outdir")
        .arg(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("broken_tree.treefile"));

    assert!(dir.path().join("recA_itol_colors.txt").is_file());
    assert!(dir.path().join("recA_itol_labels.txt").is_file());
    assert!(dir.path().join("gyrB_itol_colors.txt").is_file());
    assert!(dir.path().join("gyrB_midpoint.treefile").is_file());

    Ok(())
}

#[test]
fn batch_without_valid_trees_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["batch", "--trees", "tests/cases/trees_bad", "--taxonomy", TAXONOMY])
        .arg("--outdir")
        .arg(dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("none of the 2 tree files"));

    Ok(())
}

#[test]
fn lineage_resolves_identifiers() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("taxonomy.tsv");

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec![
        "lineage",
        "--taxids",
        "tests/cases/taxids.tsv",
        "--ids",
        "tests/cases/ids.txt",
        "--taxdump",
        "tests/cases/taxdump",
    ])
    .arg("-o")
    .arg(&output);
    cmd.assert().success();

    let table = std::fs::read_to_string(&output)?;
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "full_id\tsuperkingdom\tphylum\tclass\torder\tfamily\tgenus\tspecies");
    assert_eq!(
        lines[1],
        "GCF_000009045.1-WP_000003.1\tBacteria\tBacillota\tBacilli\tBacillales\tBacillaceae\tBacillus\tBacillus subtilis"
    );
    assert_eq!(lines[2], "GCF_000007805.1-WP_000005.1\tArchaea\t\t\t\t\t\t");
    assert_eq!(lines[3], "GCF_000000001.1-WP_000009.1\tNA\tNA\tNA\tNA\tNA\tNA\tNA");
    assert_eq!(lines[4], "GCF_000000123.1-WP_000010.1\t\t\t\t\t\t\t");

    let errors = std::fs::read_to_string(dir.path().join("taxonomy_errors.tsv"))?;
    assert_eq!(errors, "assembly_accession\ttaxid\nGCF_000000001.1\t999999\n");

    Ok(())
}

#[test]
fn presence_matrix_in_gene_order() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("matrix.csv");

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["presence", "--fasta-dir", "tests/cases/presence", "--gene-order", "tests/cases/gene_order.txt"])
        .arg("-o")
        .arg(&output);
    cmd.assert().success();

    let matrix = std::fs::read_to_string(&output)?;
    assert_eq!(
        matrix,
        ",recA,gyrB,rpoB\nEscherichia_coli,1,1,0\nBacillus_subtilis,0,1,0\nSalinibacter_ruber_rubra_M8,1,0,0\n"
    );

    Ok(())
}

#[test]
fn heatmap_writes_svg() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let matrix = dir.path().join("matrix.csv");
    let output = dir.path().join("heatmap.svg");
    std::fs::write(&matrix, ",recA,gyrB\nEscherichia_coli,1,1\nBacillus_subtilis,0,1\n")?;

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.arg("heatmap")
        .arg("-i")
        .arg(&matrix)
        .args(vec!["--species-order", "tests/cases/species_order.txt", "--width", "600", "--height", "400"])
        .arg("-o")
        .arg(&output);
    cmd.assert().success();

    let svg = std::fs::read_to_string(&output)?;
    assert!(svg.contains("<svg"));
    assert!(svg.contains("Thermus_thermophilus"));

    Ok(())
}

#[test]
fn pfam_writes_filtered_sequences() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    for file in ["domains.csv", "recA.json", "recA.faa"] {
        std::fs::copy(format!("tests/cases/pfam/{file}"), dir.path().join(file))?;
    }

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.arg("pfam").arg("--dir").arg(dir.path()).args(vec!["--csv", "domains.csv"]);
    cmd.assert().success();

    let filtered = std::fs::read_to_string(dir.path().join("recA_filtered.faa"))?;
    assert!(filtered.contains(">WP_000001.1 recombinase RecA\n"));
    assert!(!filtered.contains("WP_000003.1"));

    Ok(())
}

#[test]
fn genbank_writes_short_regions() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME"))?;
    cmd.args(vec!["genbank", "--pairs", "tests/cases/genbank/pairs.tsv", "--gbff-dir", "tests/cases/genbank"])
        .arg("--outdir")
        .arg(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("GenBank file not found"))
        .stderr(predicate::str::contains("Could not find both genes TST_0001, missing in NZ_TEST01"));

    let region = std::fs::read_to_string(dir.path().join("NZ_TEST01_short_TST_0003_recA.gbk"))?;
    assert!(region.starts_with("LOCUS"));
    assert!(region.contains("TST_0001"));
    assert!(region.contains("TST_0007"));
    assert!(!region.contains("TST_0008"));
    assert!(region.contains("recA"));
    assert!(region.trim_end().ends_with("//"));

    Ok(())
}
