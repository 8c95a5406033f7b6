//! I/O utilities for reading device exports and writing reports.
//!
//! Every input table flows through [`read_table`], which:
//!
//! - resolves the delimiter from the extension (`.tsv` → tab) unless given,
//! - decodes the bytes with the requested encoding, or walks the fallback
//!   chain (UTF-8, Latin-1, CP1252, ISO-8859-1) until one decodes cleanly,
//! - trims header names and disambiguates blank or repeated ones,
//! - drops rows whose cells are all blank.
//!
//! The `-` path reads stdin / writes stdout.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};

use crate::data::Table;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Tried in order when no input encoding is given.
pub const FALLBACK_ENCODINGS: [&str; 4] = ["utf-8", "latin1", "cp1252", "iso-8859-1"];

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .trim(csv::Trim::None);
    builder.from_reader(reader)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(base))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

/// Decodes with the first fallback encoding that succeeds.
pub fn decode_with_fallback(bytes: &[u8]) -> Result<(String, &'static Encoding)> {
    let mut tried: Vec<&'static Encoding> = Vec::new();
    for label in FALLBACK_ENCODINGS {
        let encoding = resolve_encoding(Some(label))?;
        if tried.contains(&encoding) {
            continue;
        }
        tried.push(encoding);
        match decode_bytes(bytes, encoding) {
            Ok(text) => {
                if encoding != UTF_8 {
                    warn!("Input is not valid UTF-8; decoded as {}", encoding.name());
                }
                return Ok((text, encoding));
            }
            Err(err) => debug!("{err}"),
        }
    }
    Err(anyhow!(
        "Failed to decode input with any of: {}",
        FALLBACK_ENCODINGS.join(", ")
    ))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        std::io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading stdin")?;
    } else {
        File::open(path)
            .with_context(|| format!("Opening input file {path:?}"))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    Ok(bytes)
}

/// Reads a whole delimited file into a [`Table`], returning the encoding
/// that decoded it.
pub fn read_table(
    path: &Path,
    delimiter: Option<u8>,
    encoding: Option<&'static Encoding>,
) -> Result<(Table, &'static Encoding)> {
    let bytes = read_bytes(path)?;
    let (text, used) = match encoding {
        Some(encoding) => (decode_bytes(&bytes, encoding)?, encoding),
        None => decode_with_fallback(&bytes)?,
    };
    let delimiter = resolve_input_delimiter(path, delimiter);
    let table = parse_table(&text, delimiter).with_context(|| format!("Parsing {path:?}"))?;
    debug!(
        "Read {} row(s) x {} column(s) from {path:?} ({})",
        table.len(),
        table.headers.len(),
        used.name()
    );
    Ok((table, used))
}

pub fn parse_table(text: &str, delimiter: u8) -> Result<Table> {
    let mut reader = open_csv_reader(text.as_bytes(), delimiter);
    let headers = disambiguate_headers(reader.headers()?.iter());
    if headers.is_empty() {
        return Err(anyhow!("Input has no header row"));
    }
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table::new(headers, rows))
}

/// Trims headers, names blank ones `column_N` and suffixes repeats `_2`, `_3`.
fn disambiguate_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for (idx, header) in raw.enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            trimmed.to_string()
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while seen.contains(&name) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        seen.push(name);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_bytes_fall_back_past_utf8() {
        let bytes = b"Patient,Notes\nP1,caf\xe9\n";
        let (text, encoding) = decode_with_fallback(bytes).unwrap();
        assert_eq!(encoding.name(), "windows-1252");
        assert!(text.contains("café"));
    }

    #[test]
    fn utf8_is_tried_first() {
        let (text, encoding) = decode_with_fallback("Patient\nP1 ü\n".as_bytes()).unwrap();
        assert_eq!(encoding, UTF_8);
        assert!(text.ends_with("ü\n"));
    }

    #[test]
    fn headers_are_trimmed_and_disambiguated() {
        let table = parse_table(" ID ,Value,,Value\nP1,1,x,2\n,,,\n", b',').unwrap();
        assert_eq!(table.headers, vec!["ID", "Value", "column_3", "Value_2"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn ragged_rows_are_accepted() {
        let table = parse_table("a,b,c\n1,2\n1,2,3,4\n", b',').unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.row(0).map(|r| r.cell(2)), Some(""));
    }

    #[test]
    fn tsv_extension_selects_tab() {
        assert_eq!(resolve_input_delimiter(Path::new("x.TSV"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("x.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("x.tsv"), Some(b';')), b';');
    }
}
