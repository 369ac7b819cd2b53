//! Uploaded file format detection
//!
//! Classifies raw bytes into PDF/CSV/XLSX from content, not filename:
//! magic bytes first, then container/structure probes, with the filename
//! extension as a last resort. PDFs are sub-classified as DIGITAL when a
//! usable text layer exists, else SCANNED (OCR needed downstream).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use payscope_common::types::{FileFormat, PdfKind};

/// Minimum extracted characters (trimmed) for a PDF page to count as
/// having a real text layer.
const PDF_TEXT_MIN_CHARS: usize = 40;

/// Number of leading pages probed for a text layer.
const PDF_PROBE_PAGES: usize = 5;

/// Bytes sampled for CSV delimiter sniffing.
const CSV_SNIFF_BYTES: usize = 8192;

const CSV_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDetection {
    pub file_format: FileFormat,
    pub pdf_kind: Option<PdfKind>,
}

/// Detect the format of an uploaded file.
///
/// `head` holds the first bytes of the file (8 are enough); `path` points
/// at the streamed temp copy for the deeper probes.
pub fn detect_file_format(head: &[u8], filename: &str, path: &Path) -> FormatDetection {
    if head.starts_with(b"%PDF-") {
        return FormatDetection {
            file_format: FileFormat::Pdf,
            pdf_kind: Some(detect_pdf_kind(path)),
        };
    }

    // XLSX is a ZIP container with a fixed internal layout
    if head.starts_with(b"PK\x03\x04") && is_xlsx_zip(path) {
        return FormatDetection {
            file_format: FileFormat::Xlsx,
            pdf_kind: None,
        };
    }

    if looks_like_csv(path) {
        return FormatDetection {
            file_format: FileFormat::Csv,
            pdf_kind: None,
        };
    }

    // Fallback based on extension. Still no schema assumptions.
    let lower = filename.to_lowercase();
    if lower.ends_with(".xlsx") {
        return FormatDetection {
            file_format: FileFormat::Xlsx,
            pdf_kind: None,
        };
    }
    if lower.ends_with(".pdf") {
        return FormatDetection {
            file_format: FileFormat::Pdf,
            pdf_kind: Some(detect_pdf_kind(path)),
        };
    }
    FormatDetection {
        file_format: FileFormat::Csv,
        pdf_kind: None,
    }
}

/// Classify a PDF as DIGITAL or SCANNED by probing the first pages for a
/// text layer; UNKNOWN when extraction itself fails.
pub fn detect_pdf_kind(path: &Path) -> PdfKind {
    let doc = match lopdf::Document::load(path) {
        Ok(doc) => doc,
        Err(_) => return PdfKind::Unknown,
    };

    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return PdfKind::Unknown;
    }

    for page in pages.iter().take(PDF_PROBE_PAGES) {
        if let Ok(text) = doc.extract_text(&[*page]) {
            if text.trim().len() >= PDF_TEXT_MIN_CHARS {
                return PdfKind::Digital;
            }
        }
    }
    PdfKind::Scanned
}

fn is_xlsx_zip(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(a) => a,
        Err(_) => return false,
    };

    let mut has_content_types = false;
    let mut has_xl_entry = false;
    for i in 0..archive.len() {
        if let Ok(entry) = archive.by_index_raw(i) {
            let name = entry.name();
            if name == "[Content_Types].xml" {
                has_content_types = true;
            }
            if name.starts_with("xl/") {
                has_xl_entry = true;
            }
        }
    }
    has_content_types && has_xl_entry
}

/// A file looks like CSV when one delimiter yields at least two records
/// with a consistent field count greater than one.
fn looks_like_csv(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut sample = vec![0u8; CSV_SNIFF_BYTES];
    let n = match file.read(&mut sample) {
        Ok(n) => n,
        Err(_) => return false,
    };
    sample.truncate(n);

    if !CSV_DELIMITERS.iter().any(|d| sample.contains(d)) {
        return false;
    }

    CSV_DELIMITERS
        .iter()
        .any(|&delim| delimiter_parses(&sample, delim))
}

fn delimiter_parses(sample: &[u8], delimiter: u8) -> bool {
    if !sample.contains(&delimiter) {
        return false;
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample);

    let mut field_count = None;
    let mut rows = 0usize;
    for record in reader.records().take(3) {
        let record = match record {
            Ok(r) => r,
            Err(_) => return false,
        };
        if record.len() < 2 {
            return false;
        }
        match field_count {
            None => field_count = Some(record.len()),
            // The last sampled record may be truncated mid-line; only the
            // first two need to agree.
            Some(expected) if rows < 2 && record.len() != expected => return false,
            _ => {},
        }
        rows += 1;
    }
    rows >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_detects_csv_with_commas() {
        let f = temp_with(b"txn_id,amount,currency\nT1,10.00,USD\nT2,20.00,EUR\n");
        let det = detect_file_format(b"txn_id,a", "report.csv", f.path());
        assert_eq!(det.file_format, FileFormat::Csv);
        assert_eq!(det.pdf_kind, None);
    }

    #[test]
    fn test_detects_csv_with_pipes() {
        let f = temp_with(b"txn_id|amount|currency\nT1|10.00|USD\n");
        let det = detect_file_format(b"txn_id|a", "data.txt", f.path());
        assert_eq!(det.file_format, FileFormat::Csv);
    }

    #[test]
    fn test_single_row_is_not_csv() {
        let f = temp_with(b"just,one,row");
        assert!(!looks_like_csv(f.path()));
    }

    #[test]
    fn test_no_delimiter_is_not_csv() {
        let f = temp_with(b"plain text without structure\nmore text\n");
        assert!(!looks_like_csv(f.path()));
    }

    #[test]
    fn test_pdf_magic_wins_over_content() {
        // Not a valid PDF body, so kind degrades to UNKNOWN
        let f = temp_with(b"%PDF-1.7 garbage");
        let det = detect_file_format(b"%PDF-1.7", "scan.pdf", f.path());
        assert_eq!(det.file_format, FileFormat::Pdf);
        assert_eq!(det.pdf_kind, Some(PdfKind::Unknown));
    }

    #[test]
    fn test_extension_fallback_pdf() {
        let f = temp_with(b"binarygarbage\x00\x01\x02");
        let det = detect_file_format(b"binaryga", "statement.pdf", f.path());
        assert_eq!(det.file_format, FileFormat::Pdf);
    }

    #[test]
    fn test_extension_fallback_defaults_to_csv() {
        let f = temp_with(b"binarygarbage\x00\x01\x02");
        let det = detect_file_format(b"binaryga", "mystery.bin", f.path());
        assert_eq!(det.file_format, FileFormat::Csv);
    }

    #[test]
    fn test_zip_without_xlsx_layout_is_not_xlsx() {
        // ZIP magic but no archive structure behind it
        let f = temp_with(b"PK\x03\x04not really a zip");
        let det = detect_file_format(b"PK\x03\x04not ", "archive.zip", f.path());
        assert_ne!(det.file_format, FileFormat::Xlsx);
    }
}
