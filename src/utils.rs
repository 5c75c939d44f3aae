use crate::error::CladekitError;
use env_logger::{fmt::Color, Builder};
use log::{Level, LevelFilter};
use needletail::{parse_fastx_file, FastxReader};
use niffler::get_reader;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};


pub fn init_logger(verbose: bool) {
    Builder::new()
        .format(|buf, record| {
            let timestamp = buf.timestamp();

            let mut red_style = buf.style();
            red_style.set_color(Color::Red).set_bold(true);
            let mut green_style = buf.style();
            green_style.set_color(Color::Green).set_bold(true);
            let mut white_style = buf.style();
            white_style.set_color(Color::White).set_bold(false);
            let mut orange_style = buf.style();
            orange_style
                .set_color(Color::Rgb(255, 102, 0))
                .set_bold(true);
            let mut apricot_style = buf.style();
            apricot_style
                .set_color(Color::Rgb(255, 195, 0))
                .set_bold(true);

            let msg = match record.level() {
                Level::Warn => (
                    orange_style.value(record.level()),
                    orange_style.value(record.args()),
                ),
                Level::Info => (
                    green_style.value(record.level()),
                    white_style.value(record.args()),
                ),
                Level::Debug => (
                    apricot_style.value(record.level()),
                    apricot_style.value(record.args()),
                ),
                Level::Error => (
                    red_style.value(record.level()),
                    red_style.value(record.args()),
                ),
                _ => (
                    white_style.value(record.level()),
                    white_style.value(record.args()),
                ),
            };

            writeln!(
                buf,
                "{} [{}] - {}",
                white_style.value(timestamp),
                msg.0,
                msg.1
            )
        })
        .filter(None, if verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();
}

pub trait CompressionExt {
    fn from_path<S: AsRef<OsStr> + ?Sized>(p: &S) -> Self;
}

/// Attempts to infer the compression type from the file extension.
/// If the extension is not known, then Uncompressed is returned.
impl CompressionExt for niffler::compression::Format {
    fn from_path<S: AsRef<OsStr> + ?Sized>(p: &S) -> Self {
        let path = Path::new(p);
        match path.extension().map(|s| s.to_str()) {
            Some(Some("gz")) => Self::Gzip,
            Some(Some("bz") | Some("bz2")) => Self::Bzip,
            Some(Some("lzma") | Some("xz")) => Self::Lzma,
            _ => Self::No,
        }
    }
}

/// Enum to specify the type of file component to retrieve
pub enum FileComponent {
    /// The full file name including the extension
    FileName,
    /// The file name without the extension
    FileStem,
}

/// Extracts the specified file component from a path and returns it as a `String`.
///
/// # Examples
///
/// ```ignore
/// let path = PathBuf::from("/some/path/to/tree.treefile");
/// assert_eq!(get_file_component(&path, FileComponent::FileStem)?, "tree");
/// ```
pub fn get_file_component(path: &Path, component: FileComponent) -> Result<String, CladekitError> {
    match component {
        FileComponent::FileName => {
            path.file_name()
                .ok_or(CladekitError::FileNameConversionError)
                .and_then(|os_str| os_str.to_str().map(String::from).ok_or(CladekitError::FileNameConversionError))
        }
        FileComponent::FileStem => {
            path.file_stem()
                .ok_or(CladekitError::FileNameConversionError)
                .and_then(|os_str| os_str.to_str().map(String::from).ok_or(CladekitError::FileNameConversionError))
        }
    }
}

/// Gene name prefix of a tree file name
///
/// The prefix before the first of the `markers` found in the file name is used,
/// otherwise the prefix before the first underscore, otherwise the file stem.
pub fn gene_name(path: &Path, markers: &[&str]) -> Result<String, CladekitError> {
    let file_name = get_file_component(path, FileComponent::FileName)?;

    for marker in markers {
        if let Some((prefix, _)) = file_name.split_once(marker) {
            return Ok(prefix.to_string());
        }
    }
    match file_name.split_once('_') {
        Some((prefix, _)) => Ok(prefix.to_string()),
        None => get_file_component(path, FileComponent::FileStem),
    }
}

/// Reads the trimmed, non-empty lines of a text file
pub fn read_lines(path: &Path) -> Result<Vec<String>, CladekitError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

/// Sequence identifier up to the first whitespace
pub fn get_seq_id(id: &[u8]) -> Result<String, CladekitError> {
    let id = std::str::from_utf8(id).map_err(|_| CladekitError::InvalidSequenceId(String::from_utf8_lossy(id).into_owned()))?;
    Ok(id.split_whitespace().next().unwrap_or("").to_string())
}

// Utility function to get a Niffler compressed/uncompressed writer
pub fn get_niffler_fastx_writer(output: &PathBuf) -> Result<Box<dyn std::io::Write>, CladekitError> {
    let file = File::create(output)?;
    let file_handle = BufWriter::new(file);
    let fmt = niffler::compression::Format::from_path(output);

    let writer = niffler::get_writer(Box::new(file_handle), fmt, niffler::compression::Level::Six)?;

    Ok(writer)
}

pub fn is_file_empty<P: AsRef<Path>>(path: P) -> Result<bool, CladekitError> {
    let file = File::open(&path)?;

    // Use niffler to get a reader for the (possibly compressed) file
    let (mut reader, _format) = match get_reader(Box::new(file)) {
        Ok(reader_format) => reader_format,
        Err(niffler::Error::FileTooShort) => return Ok(true),
        Err(e) => return Err(CladekitError::NifflerError(e)),
    };
    // Try to read the first byte
    let mut buffer = [0; 1];
    match reader.read(&mut buffer) {
        Ok(0) => Ok(true),
        Ok(_) => Ok(false), // Successfully read a byte, file is not empty
        Err(e) => Err(CladekitError::IOError(e))
    }
}

pub fn parse_fastx_file_with_check<P: AsRef<Path>>(path: P) -> Result<Option<Box<dyn FastxReader>>, CladekitError> {
    if is_file_empty(&path)? {
        Ok(None)
    } else {
        Ok(Some(parse_fastx_file(&path)?))
    }
}

#[cfg(test)]
#[cfg(not(tarpaulin_include))]
mod tests {
    use super::*;

    #[test]
    fn gene_name_verification_marker() {
        let path = PathBuf::from("trees/recA_verification_aligned.treefile");
        assert_eq!(gene_name(&path, &["_verification_"]).unwrap(), "recA");
    }

    #[test]
    fn gene_name_first_underscore() {
        let path = PathBuf::from("trees/gyrB_filtered_mafft.treefile");
        assert_eq!(gene_name(&path, &["_verification_"]).unwrap(), "gyrB");
    }

    #[test]
    fn gene_name_stem_fallback() {
        let path = PathBuf::from("rpoB.treefile");
        assert_eq!(gene_name(&path, &["_verification_", "_filtered_"]).unwrap(), "rpoB");
    }

    #[test]
    fn seq_id_is_first_token() {
        assert_eq!(get_seq_id(b"WP_001.1 hypothetical protein").unwrap(), "WP_001.1");
        assert_eq!(get_seq_id(b"seq1").unwrap(), "seq1");
    }

    #[test]
    fn seq_id_rejects_invalid_utf8() {
        match get_seq_id(b"WP_\xff\xfe.1 protein") {
            Err(CladekitError::InvalidSequenceId(id)) => assert!(id.starts_with("WP_")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn compression_format_from_extension() {
        assert_eq!(niffler::compression::Format::from_path("a.faa.gz"), niffler::compression::Format::Gzip);
        assert_eq!(niffler::compression::Format::from_path("a.faa"), niffler::compression::Format::No);
    }
}
