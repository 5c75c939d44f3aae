use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CladekitError {
    /// Represents all other cases of `csv::Error`.
    #[error(transparent)]
    CsvError(#[from] csv::Error),
    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// Represents all other cases of `niffler::Error`.
    #[error(transparent)]
    NifflerError(#[from] niffler::Error),
    /// Represents all other cases of `needletail::errors::ParseError`.
    #[error(transparent)]
    NeedletailParseError(#[from] needletail::errors::ParseError),
    /// Represents all other cases of `serde_json::Error`.
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    /// Represents all other cases of `regex::Error`.
    #[error(transparent)]
    RegexError(#[from] regex::Error),
    /// Indicates failure to build the thread pool for batch processing
    #[error(transparent)]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// Indicates failure to parse a Newick tree
    #[error("failed to parse Newick tree: {0}")]
    Newick(#[from] crate::tree::NewickError),
    /// Indicates a cluster name collision in the named cluster map
    #[error("failed to name clusters: {0}")]
    Naming(#[from] crate::partition::NamingError),
    /// Indicates failure to extract a GenBank region
    #[error("failed to extract GenBank region: {0}")]
    Genbank(#[from] crate::genbank::GenbankError),
    /// Indicates failure with the heatmap module
    #[error("failed to render heatmap: {0}")]
    Heatmap(#[from] crate::heatmap::HeatmapError),
    #[error("Failed to convert OsString to String")]
    FileNameConversionError,
    /// Indicates a sequence record identifier that is not valid UTF-8
    #[error("sequence identifier is not valid UTF-8: {0}")]
    InvalidSequenceId(String),
    /// Indicates failure to parse a tree file that contains no tree
    #[error("empty tree file: {0}")]
    TreeFileIsEmpty(PathBuf),
    /// Indicates a presence/absence matrix without a header row
    #[error("matrix file has no header: {0}")]
    MatrixHeaderMissing(PathBuf),
    /// Indicates a presence/absence matrix cell that is not an integer
    #[error("invalid matrix value '{value}' for species '{species}' in: {path}")]
    MatrixValue { path: PathBuf, species: String, value: String },
    /// Indicates a taxdump directory missing one of its files
    #[error("taxonomy dump file not found: {0}")]
    TaxdumpFileMissing(PathBuf),
    /// Indicates that no tree files were found for batch processing
    #[error("no tree files (*.treefile) found in: {0}")]
    NoTreeFiles(PathBuf),
    /// Indicates that every tree in a batch failed
    #[error("none of the {0} tree files could be processed")]
    BatchFailed(usize),
}
