//! Transcription start site selection.
//!
//! Picks one transcript start site per gene from a GTF-style transcript
//! annotation (FANTOM CAT layout: gene, transcript and exon rows sharing a
//! `gene_id`, with a transcription-initiation confidence score attached to
//! transcript rows).
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use noodles::gtf;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, io::BufRead, path::Path, str::FromStr};

use crate::bed::Strand;
use crate::genome::CanonicalChroms;
use crate::utils::{collapse_unique, open_file_for_read};

/// Genes with fewer annotation rows than this (gene + transcript + exon) are dropped.
pub const MIN_ROWS_PER_GENE: usize = 3;

/// Attribute keys used to interpret annotation rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationParserOptions {
    pub gene_id_key: String,
    pub gene_name_key: String,
    pub gene_class_key: String,
    pub score_key: String,
    /// Value of the gene class attribute that marks protein-coding genes.
    pub coding_class: String,
    pub min_rows_per_gene: usize,
}

impl Default for AnnotationParserOptions {
    fn default() -> Self {
        Self {
            gene_id_key: "gene_id".to_string(),
            gene_name_key: "gene_name".to_string(),
            gene_class_key: "geneClass".to_string(),
            score_key: "TIEScore".to_string(),
            coding_class: "coding_mRNA".to_string(),
            min_rows_per_gene: MIN_ROWS_PER_GENE,
        }
    }
}

/// One row of the annotation table. Positions are 1-based, inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub chrom: String,
    pub feature: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub attributes: Vec<(String, String)>,
}

impl AnnotationRecord {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// The strand-appropriate end of the interval.
    pub fn tss(&self) -> Option<u64> {
        match self.strand {
            Strand::Forward => Some(self.start),
            Strand::Reverse => Some(self.end),
            Strand::Unknown => None,
        }
    }
}

impl From<&gtf::Record> for AnnotationRecord {
    fn from(record: &gtf::Record) -> Self {
        AnnotationRecord {
            chrom: record.reference_sequence_name().to_string(),
            feature: record.ty().to_string(),
            start: usize::from(record.start()) as u64,
            end: usize::from(record.end()) as u64,
            strand: match record.strand() {
                Some(gtf::record::Strand::Forward) => Strand::Forward,
                Some(gtf::record::Strand::Reverse) => Strand::Reverse,
                None => Strand::Unknown,
            },
            attributes: record
                .attributes()
                .iter()
                .map(|x| (x.key().to_string(), x.value().to_string()))
                .collect(),
        }
    }
}

pub fn read_annotation<R: BufRead>(input: R) -> Result<Vec<AnnotationRecord>> {
    let mut records = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let line = gtf::Line::from_str(&line)
            .with_context(|| format!("failed to parse annotation line {}: {}", i + 1, line))?;
        if let gtf::line::Line::Record(rec) = line {
            records.push(AnnotationRecord::from(&rec));
        }
    }
    Ok(records)
}

pub fn read_annotation_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<AnnotationRecord>> {
    read_annotation(open_file_for_read(&path)?)
        .with_context(|| format!("failed to read annotation from {}", path.as_ref().display()))
}

/// One selected gene and its transcription start site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneRecord {
    pub gene_id: String,
    pub chrom: String,
    pub tss: u64,
    pub strand: Strand,
    pub gene_name: String,
    pub score: Option<f64>,
}

fn parse_score(record: &AnnotationRecord, key: &str) -> Option<f64> {
    record.attribute(key).and_then(|x| x.parse::<f64>().ok()).filter(|x| !x.is_nan())
}

// Missing scores rank below every scored row.
fn cmp_score_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Select one transcription start site per gene.
///
/// Rows are grouped by gene id. Groups with fewer than
/// `options.min_rows_per_gene` rows are dropped. Within a group rows are
/// sorted by confidence score, descending, with a stable sort so that ties go
/// to the row that came first in the input. The winning row must sit on a
/// canonical chromosome, the gene must be of the coding class and the strand
/// must be known; otherwise the gene is dropped. The TSS is the interval start
/// on `+` and the interval end on `-`.
///
/// The result is sorted by gene id.
pub fn select_tss(
    records: &[AnnotationRecord],
    options: &AnnotationParserOptions,
    canonical: &CanonicalChroms,
) -> Vec<GeneRecord> {
    let mut groups: IndexMap<&str, Vec<&AnnotationRecord>> = IndexMap::new();
    let mut n_missing_id = 0;
    for record in records {
        match record.attribute(&options.gene_id_key) {
            Some(id) => groups.entry(id).or_default().push(record),
            None => n_missing_id += 1,
        }
    }
    if n_missing_id > 0 {
        debug!("{} annotation rows without '{}' were ignored", n_missing_id, options.gene_id_key);
    }

    let n_genes = groups.len();
    let mut selected: Vec<GeneRecord> = groups
        .into_iter()
        .filter(|(_, rows)| rows.len() >= options.min_rows_per_gene)
        .filter_map(|(gene_id, mut rows)| {
            let gene_class = rows.iter().find_map(|r| r.attribute(&options.gene_class_key));
            if gene_class != Some(options.coding_class.as_str()) {
                return None;
            }
            let gene_name = collapse_unique(
                rows.iter().filter_map(|r| r.attribute(&options.gene_name_key)),
            );
            rows.sort_by(|a, b| {
                cmp_score_desc(parse_score(a, &options.score_key), parse_score(b, &options.score_key))
            });
            let best = rows[0];
            if !canonical.is_canonical(&best.chrom) {
                return None;
            }
            Some(GeneRecord {
                gene_id: gene_id.to_string(),
                chrom: best.chrom.clone(),
                tss: best.tss()?,
                strand: best.strand,
                gene_name,
                score: parse_score(best, &options.score_key),
            })
        })
        .collect();
    selected.sort_by(|a, b| a.gene_id.cmp(&b.gene_id));
    info!("Selected a TSS for {} out of {} genes", selected.len(), n_genes);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(feature: &str, gene: &str, start: u64, end: u64, strand: char, score: Option<f64>) -> String {
        let score = score.map(|x| format!(" TIEScore \"{}\";", x)).unwrap_or_default();
        format!(
            "chr1\tFANTOM\t{}\t{}\t{}\t.\t{}\t.\tgene_id \"{}\"; gene_name \"{}\"; geneClass \"coding_mRNA\";{}",
            feature, start, end, strand, gene, gene.to_lowercase(), score,
        )
    }

    fn select(lines: &[String]) -> Vec<GeneRecord> {
        let records = read_annotation(lines.join("\n").as_bytes()).unwrap();
        select_tss(&records, &Default::default(), &Default::default())
    }

    #[test]
    fn test_read_annotation() {
        let input = format!(
            "##description: test\n{}\n\n{}\n",
            row("gene", "G1", 100, 900, '+', None),
            row("transcript", "G1", 100, 900, '+', Some(0.9)),
        );
        let records = read_annotation(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].feature, "transcript");
        assert_eq!((records[1].start, records[1].end), (100, 900));
        assert_eq!(records[1].attribute("gene_id"), Some("G1"));
        assert_eq!(records[1].attribute("TIEScore"), Some("0.9"));
        assert_eq!(records[0].attribute("TIEScore"), None);
    }

    #[test]
    fn test_highest_score_wins() {
        let genes = select(&[
            row("gene", "G1", 100, 900, '+', None),
            row("transcript", "G1", 100, 900, '+', Some(0.9)),
            row("transcript", "G1", 150, 900, '+', Some(0.95)),
            row("exon", "G1", 150, 300, '+', None),
        ]);
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].tss, 150);
        assert_eq!(genes[0].score, Some(0.95));
        assert_eq!(genes[0].gene_name, "g1");
    }

    #[test]
    fn test_reverse_strand_uses_end() {
        let genes = select(&[
            row("gene", "G2", 100, 1000, '-', None),
            row("transcript", "G2", 100, 950, '-', Some(0.95)),
            row("transcript", "G2", 100, 1000, '-', Some(0.9)),
        ]);
        assert_eq!(genes[0].tss, 950);
        assert_eq!(genes[0].strand, Strand::Reverse);
    }

    #[test]
    fn test_ties_keep_first_row() {
        let genes = select(&[
            row("transcript", "G3", 200, 900, '+', Some(0.5)),
            row("transcript", "G3", 300, 900, '+', Some(0.5)),
            row("exon", "G3", 300, 400, '+', None),
        ]);
        assert_eq!(genes[0].tss, 200);
    }

    #[test]
    fn test_filters() {
        let mut lines = vec![
            // too few rows
            row("gene", "A", 100, 200, '+', None),
            row("transcript", "A", 100, 200, '+', Some(1.0)),
        ];
        // non-canonical chromosome
        lines.extend((0..3).map(|_| row("transcript", "B", 1, 10, '+', Some(1.0)).replacen("chr1", "chrM", 1)));
        // non-coding
        lines.extend((0..3).map(|_| row("transcript", "C", 1, 10, '+', Some(1.0)).replace("coding_mRNA", "lncRNA")));
        // unknown strand
        lines.extend((0..3).map(|_| row("transcript", "D", 1, 10, '.', Some(1.0))));
        lines.extend((0..3).map(|i| row("transcript", "E", 10 + i, 100, '+', Some(1.0))));
        let genes = select(&lines);
        assert_eq!(genes.iter().map(|x| x.gene_id.as_str()).collect::<Vec<_>>(), vec!["E"]);
        assert_eq!(genes[0].tss, 10);
    }

    #[test]
    fn test_names_are_collapsed() {
        let genes = select(&[
            row("transcript", "G4", 1, 10, '+', Some(1.0)),
            row("transcript", "G4", 1, 10, '+', Some(1.0)).replace("gene_name \"g4\"", "gene_name \"ALT\""),
            row("transcript", "G4", 1, 10, '+', Some(1.0)),
        ]);
        assert_eq!(genes[0].gene_name, "g4,ALT");
    }

    #[test]
    fn test_bad_line() {
        let err = read_annotation("chr1\tx\tgene\tabc\t10\t.\t+\t.\tgene_id \"A\";".as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("annotation line 1"));
    }
}
