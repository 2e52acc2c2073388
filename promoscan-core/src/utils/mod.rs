use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gzip" => Ok(Compression::Gzip),
            "zstd" | "zstandard" => Ok(Compression::Zstd),
            _ => Err(format!("unsupported compression: {}", s)),
        }
    }
}

pub fn open_file_for_write<P: AsRef<Path>>(
    filename: P,
    compression: Option<Compression>,
    compression_level: Option<u32>,
) -> Result<Box<dyn Write + Send>> {
    let buffer = BufWriter::new(
        File::create(&filename).with_context(|| format!("cannot create file: {}", filename.as_ref().display()))?
    );
    let writer: Box<dyn Write + Send> = match compression {
        None => Box::new(buffer),
        Some(Compression::Gzip) => Box::new(flate2::write::GzEncoder::new(buffer, flate2::Compression::new(compression_level.unwrap_or(6)))),
        Some(Compression::Zstd) => {
            let zstd = zstd::stream::Encoder::new(buffer, compression_level.unwrap_or(3) as i32)?;
            Box::new(zstd.auto_finish())
        },
    };
    Ok(writer)
}

/// Open a file, possibly compressed. Supports gzip and zstd.
pub fn open_file_for_read<P: AsRef<Path>>(file: P) -> Result<Box<dyn BufRead>> {
    let path = file.as_ref();
    let open = || File::open(path).with_context(|| format!("cannot open file: {}", path.display()));
    let reader: Box<dyn Read> = match detect_compression(path)? {
        Some(Compression::Gzip) => Box::new(flate2::read::MultiGzDecoder::new(open()?)),
        Some(Compression::Zstd) => Box::new(zstd::stream::read::Decoder::new(open()?)?),
        None => Box::new(open()?),
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Determine the file compression type. Supports gzip and zstd.
fn detect_compression<P: AsRef<Path>>(file: P) -> Result<Option<Compression>> {
    let path = file.as_ref();
    let fl = File::open(path).with_context(|| format!("cannot open file: {}", path.display()))?;
    if flate2::read::MultiGzDecoder::new(fl).header().is_some() {
        Ok(Some(Compression::Gzip))
    } else if path.extension().map_or(false, |ext| ext == "zst") {
        Ok(Some(Compression::Zstd))
    } else {
        Ok(None)
    }
}

/// Collapse a list of possibly repeated values into their unique values,
/// in first-seen order, joined by `,`.
pub fn collapse_unique<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().filter(|x| !x.is_empty()).unique().join(",")
}

/// Read a list of names, one per line. Blank lines and `#` comments are ignored.
pub fn read_name_list<P: AsRef<Path>>(file: P) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for line in open_file_for_read(&file)?.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            names.push(line.to_string());
        }
    }
    Ok(names)
}

/// Write rows as a tab-separated table with a header line.
pub fn write_tsv<P, T, I>(file: P, rows: I) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let path = file.as_ref();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("cannot create file: {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a tab-separated table written by [`write_tsv`].
pub fn read_tsv<P, T>(file: P) -> Result<Vec<T>>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = file.as_ref();
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(open_file_for_read(path)?)
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("{}: malformed row {}", path.display(), i + 1)))
        .collect()
}
