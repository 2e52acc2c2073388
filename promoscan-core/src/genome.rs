//! Chromosome extents and promoter-centered windows.
//!
//! `ChromSizes` keeps chromosome lengths in the order they were read so that
//! tables written from it are stable across runs. `PromoterWindow` is the
//! interval `[anchor - upstream, anchor + downstream]` that every stage
//! regenerates whenever its anchor changes (first the TSS, later the
//! representative peak coordinate).
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::{io::BufRead, path::Path};

use crate::bed::{BEDLike, GenomicRange};
use crate::utils::open_file_for_read;

pub const DEFAULT_CANONICAL_CHROMS: &str = r"^chr([1-9]|1[0-9]|2[0-2]|X|Y)$";

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ChromSizes(IndexMap<String, u64>);

impl ChromSizes {
    /// Read a `chrom.sizes` file or a FASTA `.fai` index. Only the first two
    /// columns are used.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut sizes = IndexMap::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (chrom, size) = match (fields.next(), fields.next()) {
                (Some(chrom), Some(size)) => (chrom, size),
                _ => bail!("line {}: expecting at least two columns", i + 1),
            };
            let size: u64 = size
                .trim()
                .parse()
                .with_context(|| format!("line {}: invalid chromosome length '{}'", i + 1, size))?;
            sizes.insert(chrom.to_string(), size);
        }
        Ok(ChromSizes(sizes))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(open_file_for_read(&path)?)
            .with_context(|| format!("failed to read chromosome sizes from {}", path.as_ref().display()))
    }

    pub fn total_size(&self) -> u64 {
        self.0.iter().map(|x| x.1).sum()
    }

    pub fn get(&self, chrom: &str) -> Option<u64> {
        self.0.get(chrom).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the chromosome is known and the record lies within `1..=length`.
    pub fn contains<B: BEDLike>(&self, bed: &B) -> bool {
        match self.get(bed.chrom()) {
            Some(size) => bed.start() >= 1 && bed.end() <= size,
            None => false,
        }
    }
}

impl<S> FromIterator<(S, u64)> for ChromSizes
where
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        ChromSizes(iter.into_iter().map(|(s, l)| (s.into(), l)).collect())
    }
}

impl<'a> IntoIterator for &'a ChromSizes {
    type Item = (&'a String, &'a u64);
    type IntoIter = indexmap::map::Iter<'a, String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Chromosome name filter. By default, autosomes and sex chromosomes of the
/// UCSC human naming scheme.
#[derive(Debug, Clone)]
pub struct CanonicalChroms(Regex);

impl CanonicalChroms {
    pub fn new(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid chromosome pattern: {}", pattern))?;
        Ok(Self(re))
    }

    pub fn is_canonical(&self, chrom: &str) -> bool {
        self.0.is_match(chrom)
    }
}

impl Default for CanonicalChroms {
    fn default() -> Self {
        Self(Regex::new(DEFAULT_CANONICAL_CHROMS).unwrap())
    }
}

/// A window around a single-base anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromoterWindow {
    pub upstream: u64,
    pub downstream: u64,
}

impl PromoterWindow {
    pub fn new(upstream: u64, downstream: u64) -> Self {
        Self { upstream, downstream }
    }

    pub fn symmetric(half_width: u64) -> Self {
        Self::new(half_width, half_width)
    }

    pub fn width(&self) -> u64 {
        self.upstream + self.downstream + 1
    }

    /// The window around `anchor`, clamped at position 1.
    pub fn around(&self, chrom: &str, anchor: u64) -> GenomicRange {
        GenomicRange::new(
            chrom,
            anchor.saturating_sub(self.upstream).max(1),
            anchor + self.downstream,
        )
    }

    /// Like [`PromoterWindow::around`], but returns `None` instead of clamping
    /// when the window would leave the chromosome.
    pub fn within(&self, chrom_sizes: &ChromSizes, chrom: &str, anchor: u64) -> Option<GenomicRange> {
        if anchor <= self.upstream {
            return None;
        }
        let region = GenomicRange::new(chrom, anchor - self.upstream, anchor + self.downstream);
        if chrom_sizes.contains(&region) {
            Some(region)
        } else {
            None
        }
    }
}
