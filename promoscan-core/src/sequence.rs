//! Reference sequence lookup.
use anyhow::{bail, ensure, Context, Result};
use bio::io::fasta;
use indexmap::IndexMap;
use std::{fs::File, io::Write, path::Path};

use crate::utils::open_file_for_read;

pub trait SequenceSource {
    /// The bases of `chrom:start-end`, 1-based inclusive.
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<u8>>;
}

/// An indexed FASTA file. The index is expected next to the file, with an
/// extra `.fai` extension.
pub struct FastaSource {
    reader: fasta::IndexedReader<File>,
}

impl FastaSource {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fai = fai_path(path);
        let fasta = File::open(path)
            .with_context(|| format!("cannot open genome: {}", path.display()))?;
        let index = File::open(&fai)
            .with_context(|| format!("cannot open FASTA index: {}", fai.display()))?;
        let reader = fasta::IndexedReader::new(fasta, index)
            .with_context(|| format!("invalid FASTA index: {}", fai.display()))?;
        Ok(Self { reader })
    }
}

pub fn fai_path(fasta: &Path) -> std::path::PathBuf {
    let mut fai = fasta.as_os_str().to_owned();
    fai.push(".fai");
    fai.into()
}

impl SequenceSource for FastaSource {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        ensure!(start >= 1 && start <= end, "invalid region {}:{}-{}", chrom, start, end);
        self.reader.fetch(chrom, start - 1, end)
            .with_context(|| format!("failed to fetch {}:{}-{}", chrom, start, end))?;
        let mut seq = Vec::new();
        self.reader.read(&mut seq)?;
        if seq.len() as u64 != end + 1 - start {
            bail!("region {}:{}-{} exceeds the chromosome", chrom, start, end);
        }
        Ok(seq)
    }
}

/// Chromosome sequences held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource(IndexMap<String, Vec<u8>>);

impl InMemorySource {
    pub fn insert<S: Into<String>>(&mut self, chrom: S, seq: Vec<u8>) {
        self.0.insert(chrom.into(), seq);
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<u8>)> for InMemorySource {
    fn from_iter<T: IntoIterator<Item = (S, Vec<u8>)>>(iter: T) -> Self {
        InMemorySource(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl SequenceSource for InMemorySource {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let seq = self.0.get(chrom).with_context(|| format!("unknown chromosome: {}", chrom))?;
        ensure!(
            start >= 1 && start <= end && end as usize <= seq.len(),
            "region {}:{}-{} exceeds the chromosome", chrom, start, end,
        );
        Ok(seq[start as usize - 1..end as usize].to_vec())
    }
}

/// Write named sequences as FASTA.
pub fn write_fasta<'a, W, I>(writer: W, records: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = fasta::Writer::new(writer);
    for (id, seq) in records {
        writer.write(id, None, seq)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every record of a FASTA file, keyed by record id.
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<IndexMap<String, Vec<u8>>> {
    let path = path.as_ref();
    let mut records = IndexMap::new();
    for record in fasta::Reader::from_bufread(open_file_for_read(path)?).records() {
        let record = record.with_context(|| format!("malformed FASTA: {}", path.display()))?;
        records.insert(record.id().to_string(), record.seq().to_vec());
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory() {
        let mut source: InMemorySource = vec![("chr1", b"ACGTACGTAA".to_vec())].into_iter().collect();
        assert_eq!(source.fetch("chr1", 1, 4).unwrap(), b"ACGT");
        assert_eq!(source.fetch("chr1", 9, 10).unwrap(), b"AA");
        assert!(source.fetch("chr1", 9, 11).is_err());
        assert!(source.fetch("chr1", 0, 2).is_err());
        assert!(source.fetch("chr2", 1, 2).is_err());
    }

    #[test]
    fn test_indexed_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genome.fa");
        std::fs::write(&path, ">chr1\nACGTA\nCGTAA\n>chr2\nGGGG\n").unwrap();
        std::fs::write(fai_path(&path), "chr1\t10\t6\t5\t6\nchr2\t4\t24\t4\t5\n").unwrap();

        let mut source = FastaSource::from_path(&path).unwrap();
        assert_eq!(source.fetch("chr1", 4, 7).unwrap(), b"TACG");
        assert_eq!(source.fetch("chr2", 1, 4).unwrap(), b"GGGG");
        assert!(source.fetch("chr2", 3, 6).is_err());
    }

    #[test]
    fn test_fasta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promoters.fa");
        let records = vec![("ENSG1", b"ACGTN".as_slice()), ("ENSG2", b"tttt".as_slice())];
        write_fasta(File::create(&path).unwrap(), records.clone()).unwrap();
        let read = read_fasta(&path).unwrap();
        assert_eq!(
            read.iter().map(|(k, v)| (k.as_str(), v.as_slice())).collect::<Vec<_>>(),
            records,
        );
    }
}
