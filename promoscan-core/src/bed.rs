//! Genomic intervals and narrowPeak records.
//!
//! Coordinates handed out by this module are 1-based and inclusive, the
//! convention used by annotation tables. BED files are 0-based half-open on
//! disk; records are converted while parsing so that downstream code never
//! has to remember which convention it is looking at.
pub mod io;
pub mod tree;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, num, str::FromStr};

const DELIMITER: char = '\t';
const MISSING_ITEM: &str = ".";

/// A minimal genomic interval: chromosome, 1-based start, inclusive end.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GenomicRange(String, u64, u64);

impl GenomicRange {
    pub fn new<C>(chrom: C, start: u64, end: u64) -> Self
    where
        C: Into<String>,
    {
        Self(chrom.into(), start, end)
    }
}

/// Common interval fields.
pub trait BEDLike {
    /// Return the chromosome name of the record
    fn chrom(&self) -> &str;

    /// Return the 1-based start position of the record
    fn start(&self) -> u64;

    /// Return the end position (inclusive) of the record
    fn end(&self) -> u64;

    /// Return the number of bases covered by the record
    fn len(&self) -> u64 {
        self.end() + 1 - self.start()
    }

    fn to_genomic_range(&self) -> GenomicRange {
        GenomicRange::new(self.chrom(), self.start(), self.end())
    }

    fn overlaps<B: BEDLike>(&self, other: &B) -> bool {
        self.chrom() == other.chrom() && self.start() <= other.end() && other.start() <= self.end()
    }

    /// Convert the record to a string representation: chr:start-end
    fn pretty_show(&self) -> String {
        format!("{}:{}-{}", self.chrom(), self.start(), self.end())
    }
}

impl BEDLike for GenomicRange {
    fn chrom(&self) -> &str { &self.0 }
    fn start(&self) -> u64 { self.1 }
    fn end(&self) -> u64 { self.2 }
}

impl fmt::Display for GenomicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.0, self.1, self.2)
    }
}

impl FromStr for GenomicRange {
    type Err = ParseError;

    /// Parse `chr:start-end`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chrom, range) = s.rsplit_once(':').ok_or(ParseError::MissingStartPosition)?;
        let (start, end) = range.split_once('-').ok_or(ParseError::MissingEndPosition)?;
        let start = start.trim().parse().map_err(ParseError::InvalidStartPosition)?;
        let end = end.trim().parse().map_err(ParseError::InvalidEndPosition)?;
        Ok(GenomicRange::new(chrom, start, end))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
    Unknown,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
            Strand::Unknown => MISSING_ITEM,
        };
        f.write_str(c)
    }
}

impl FromStr for Strand {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            "." | "?" => Ok(Strand::Unknown),
            other => Err(ParseError::InvalidStrand(other.to_string())),
        }
    }
}

impl Serialize for Strand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Strand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An ENCODE narrowPeak record (BED6+4).
///
/// `peak` is the 0-based offset of the point source from the on-disk start,
/// `None` when the file reports `-1`.
#[derive(Clone, Debug, PartialEq)]
pub struct NarrowPeak {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: Option<String>,
    pub score: Option<f64>,
    pub strand: Option<Strand>,
    pub signal_value: f64,
    pub p_value: Option<f64>,
    pub q_value: Option<f64>,
    pub peak: Option<u64>,
}

impl NarrowPeak {
    /// The single best base estimate inside the interval. A zero-length
    /// interval has its summit at `start`.
    pub fn summit(&self) -> u64 {
        match self.peak {
            Some(offset) => self.start + offset,
            None => (self.start + self.end.max(self.start)) / 2,
        }
    }
}

impl BEDLike for NarrowPeak {
    fn chrom(&self) -> &str { &self.chrom }
    fn start(&self) -> u64 { self.start }
    fn end(&self) -> u64 { self.end }
}

impl FromStr for NarrowPeak {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(DELIMITER);
        let chrom = parse_chrom(&mut fields)?.to_string();
        // on-disk start is 0-based
        let start = parse_start(&mut fields)?;
        let end = parse_end(&mut fields)?;
        if end < start {
            return Err(ParseError::InvalidRange(start, end));
        }
        let start = start + 1;
        let name = parse_name(&mut fields)?;
        let score = parse_optional_float(&mut fields, ParseError::MissingScore)?;
        let strand = parse_strand(&mut fields)?;
        let signal_value = parse_optional_float(&mut fields, ParseError::MissingSignalValue)?
            .unwrap_or(0.0);
        let p_value = parse_optional_float(&mut fields, ParseError::MissingPValue)?
            .filter(|x| *x >= 0.0);
        let q_value = parse_optional_float(&mut fields, ParseError::MissingQValue)?
            .filter(|x| *x >= 0.0);
        let peak = fields
            .next()
            .ok_or(ParseError::MissingPeak)
            .and_then(|s| lexical::parse::<i64, _>(s).map_err(ParseError::InvalidPeak))
            .map(|x| u64::try_from(x).ok())?;
        Ok(NarrowPeak { chrom, start, end, name, score, strand, signal_value, p_value, q_value, peak })
    }
}

impl fmt::Display for NarrowPeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |x: Option<f64>| x.map_or("-1".to_string(), |v| v.to_string());
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.start - 1,
            self.end,
            self.name.as_deref().unwrap_or(MISSING_ITEM),
            self.score.map_or("0".to_string(), |v| v.to_string()),
            self.strand.map_or(MISSING_ITEM.to_string(), |s| s.to_string()),
            self.signal_value,
            opt(self.p_value),
            opt(self.q_value),
            self.peak.map_or(-1, |p| p as i64),
        )
    }
}

fn parse_chrom<'a, I>(fields: &mut I) -> Result<&'a str, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingReferenceSequenceName)
}

fn parse_start<'a, I>(fields: &mut I) -> Result<u64, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    fields
        .next()
        .ok_or(ParseError::MissingStartPosition)
        .and_then(|s| s.parse().map_err(ParseError::InvalidStartPosition))
}

fn parse_end<'a, I>(fields: &mut I) -> Result<u64, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    fields
        .next()
        .ok_or(ParseError::MissingEndPosition)
        .and_then(|s| s.parse().map_err(ParseError::InvalidEndPosition))
}

fn parse_name<'a, I>(fields: &mut I) -> Result<Option<String>, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    fields
        .next()
        .ok_or(ParseError::MissingName)
        .map(|s| match s {
            MISSING_ITEM => None,
            _ => Some(s.into()),
        })
}

fn parse_strand<'a, I>(fields: &mut I) -> Result<Option<Strand>, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    fields
        .next()
        .ok_or(ParseError::MissingStrand)
        .and_then(|s| match s {
            MISSING_ITEM => Ok(None),
            _ => s.parse().map(Some),
        })
}

fn parse_optional_float<'a, I>(fields: &mut I, missing: ParseError) -> Result<Option<f64>, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    let s = fields.next().ok_or(missing)?;
    match s {
        MISSING_ITEM => Ok(None),
        _ => lexical::parse(s).map(Some).map_err(ParseError::InvalidFloat),
    }
}

/// An error returned when a raw BED record fails to parse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The reference sequence name is missing.
    MissingReferenceSequenceName,
    /// The start position is missing.
    MissingStartPosition,
    /// The start position is invalid.
    InvalidStartPosition(num::ParseIntError),
    /// The end position is missing.
    MissingEndPosition,
    /// The end position is invalid.
    InvalidEndPosition(num::ParseIntError),
    /// The end position is before the start position.
    InvalidRange(u64, u64),
    MissingName,
    MissingScore,
    MissingStrand,
    InvalidStrand(String),
    MissingSignalValue,
    MissingPValue,
    MissingQValue,
    /// A floating point column is invalid.
    InvalidFloat(lexical::Error),
    MissingPeak,
    InvalidPeak(lexical::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReferenceSequenceName => f.write_str("missing reference sequence name"),
            Self::MissingStartPosition => f.write_str("missing start position"),
            Self::InvalidStartPosition(e) => write!(f, "invalid start position: {}", e),
            Self::MissingEndPosition => f.write_str("missing end position"),
            Self::InvalidEndPosition(e) => write!(f, "invalid end position: {}", e),
            Self::InvalidRange(start, end) => write!(f, "end position {} is before start position {}", end, start),
            Self::MissingName => f.write_str("missing name"),
            Self::MissingScore => f.write_str("missing score"),
            Self::MissingStrand => f.write_str("missing strand"),
            Self::InvalidStrand(s) => write!(f, "invalid strand: {}", s),
            Self::MissingSignalValue => f.write_str("missing signal value"),
            Self::MissingPValue => f.write_str("missing p-value"),
            Self::MissingQValue => f.write_str("missing q-value"),
            Self::InvalidFloat(e) => write!(f, "invalid floating point value: {}", e),
            Self::MissingPeak => f.write_str("missing peak offset"),
            Self::InvalidPeak(e) => write!(f, "invalid peak offset: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}
