//! Peak localization.
//!
//! Accessibility peaks called independently in many samples are pooled per
//! gene and collapsed into a single representative coordinate. The procedure
//! favors positions that many samples agree on over a single strong outlier:
//!
//! 1. overlapping peaks are reduced to their point sources, weighted by the
//!    min-max normalized confidence of their sample batch;
//! 2. the heaviest points that together carry more than 75% of the total
//!    weight are retained;
//! 3. if the retained points are spread over 50 bp or more, a 50 bp moving
//!    average of the weight picks the densest stretch and only points close
//!    to it are kept;
//! 4. the weighted mean of what is left, rounded half to even, is the anchor.
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    io::BufRead,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::bed::{io::Reader, tree::BedTree, BEDLike, NarrowPeak, Strand};
use crate::genome::{ChromSizes, PromoterWindow};
use crate::tss::GeneRecord;
use crate::utils::open_file_for_read;

/// Fraction of the total weight the retained points must exceed.
pub const MAJORITY_FRACTION: f64 = 0.75;

/// Width of the moving average used to find the densest stretch.
pub const SMOOTHING_WIDTH: usize = 50;
/// Distance from the start of the densest stretch to its center. Points
/// closer than this to the center survive refinement.
const SMOOTHING_OFFSET: u64 = 25;

/// Which narrowPeak column carries the raw confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakScoreField {
    Score,
    #[default]
    Signal,
    PValue,
    QValue,
}

impl PeakScoreField {
    pub fn get(&self, peak: &NarrowPeak) -> Option<f64> {
        match self {
            PeakScoreField::Score => peak.score,
            PeakScoreField::Signal => Some(peak.signal_value),
            PeakScoreField::PValue => peak.p_value,
            PeakScoreField::QValue => peak.q_value,
        }
    }
}

impl FromStr for PeakScoreField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "score" => Ok(PeakScoreField::Score),
            "signal" | "signalvalue" => Ok(PeakScoreField::Signal),
            "pvalue" => Ok(PeakScoreField::PValue),
            "qvalue" => Ok(PeakScoreField::QValue),
            _ => Err(format!("unknown peak score field: {}", s)),
        }
    }
}

/// A called peak reduced to what the localizer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakObservation {
    /// Tag of the sample the peak was called in.
    pub tag: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    /// Point-source coordinate: interval start plus the reported peak offset.
    pub summit: u64,
    pub raw: f64,
    /// Raw value min-max scaled within the sample batch.
    pub normalized: f64,
}

impl BEDLike for PeakObservation {
    fn chrom(&self) -> &str { &self.chrom }
    fn start(&self) -> u64 { self.start }
    fn end(&self) -> u64 { self.end }
}

/// A batch of peaks called in one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeakSample {
    pub tag: String,
    pub path: PathBuf,
}

impl PeakSample {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let name = path.file_name().map(|x| x.to_string_lossy().to_string()).unwrap_or_default();
        let tag = name
            .trim_end_matches(".gz")
            .trim_end_matches(".zst")
            .trim_end_matches(".narrowPeak")
            .trim_end_matches(".bed")
            .to_string();
        Self { tag, path }
    }
}

/// Resolve peak samples from a directory of `*.narrowPeak[.gz]` files or a
/// two-column list file (`tag<TAB>path`; relative paths are resolved against
/// the list's directory).
pub fn discover_samples<P: AsRef<Path>>(source: P) -> Result<Vec<PeakSample>> {
    let source = source.as_ref();
    let samples: Vec<PeakSample> = if source.is_dir() {
        let pattern = source.join("*.narrowPeak*");
        let pattern = pattern.to_str().context("peak directory is not valid UTF-8")?;
        glob::glob(pattern)?
            .map(|entry| Ok(PeakSample::from_path(entry?)))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sorted_by(|a, b| a.tag.cmp(&b.tag))
            .collect()
    } else {
        let base = source.parent().unwrap_or(Path::new("."));
        let mut samples = Vec::new();
        for line in open_file_for_read(source)?.lines() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('\t') {
                Some((tag, path)) => samples.push(PeakSample {
                    tag: tag.to_string(),
                    path: base.join(path.trim()),
                }),
                None => samples.push(PeakSample::from_path(base.join(line.trim()))),
            }
        }
        samples
    };
    if samples.is_empty() {
        bail!("no peak files found in {}", source.display());
    }
    Ok(samples)
}

/// Read one sample batch and min-max normalize its raw values. Peaks
/// without a value in `field` are left out of the batch.
pub fn read_peak_batch<R: BufRead>(reader: R, tag: &str, field: PeakScoreField) -> Result<Vec<PeakObservation>> {
    let mut batch = Vec::new();
    let mut n_missing = 0;
    for peak in Reader::new(reader).into_records::<NarrowPeak>() {
        let peak = peak?;
        let raw = match field.get(&peak) {
            Some(x) => x,
            None => {
                n_missing += 1;
                continue;
            }
        };
        batch.push(PeakObservation {
            tag: tag.to_string(),
            summit: peak.summit(),
            chrom: peak.chrom,
            start: peak.start,
            end: peak.end,
            raw,
            normalized: 0.0,
        });
    }
    if n_missing > 0 {
        warn!("Sample {}: {} peaks without a {:?} value were skipped", tag, n_missing, field);
    }
    normalize_batch(&mut batch);
    Ok(batch)
}

/// Min-max scaling within one batch. A batch without spread scales to 1.
pub fn normalize_batch(batch: &mut [PeakObservation]) {
    let (min, max) = match batch.iter().map(|x| x.raw).minmax_by(|a, b| a.total_cmp(b)).into_option() {
        Some(x) => x,
        None => return,
    };
    let range = max - min;
    batch.iter_mut().for_each(|x| {
        x.normalized = if range > 0.0 { (x.raw - min) / range } else { 1.0 };
    });
}

/// Collapse weighted point observations into one representative coordinate.
///
/// `observations` are `(coordinate, weight)` pairs. Returns `None` if and
/// only if `observations` is empty.
pub fn localize(observations: &[(u64, f64)]) -> Option<u64> {
    if observations.is_empty() {
        return None;
    }

    // stable, so equal weights keep input order
    let mut points = observations.to_vec();
    points.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    let mut total: f64 = points.iter().map(|x| x.1).sum();
    if total <= 0.0 {
        points.iter_mut().for_each(|x| x.1 = 1.0);
        total = points.len() as f64;
    }

    let mut cumulative = 0.0;
    let n_majority = points
        .iter()
        .position(|(_, w)| {
            cumulative += w;
            cumulative / total > MAJORITY_FRACTION
        })
        .map_or(points.len(), |i| i + 1);
    points.truncate(n_majority);

    let (lo, hi) = points.iter().map(|x| x.0).minmax().into_option()?;
    if hi - lo >= SMOOTHING_WIDTH as u64 {
        let mut per_base = vec![0.0; (hi - lo + 1) as usize];
        points.iter().for_each(|(p, w)| per_base[(p - lo) as usize] += w);
        let mut best = (0, f64::NEG_INFINITY);
        per_base
            .windows(SMOOTHING_WIDTH)
            .map(|w| w.iter().sum::<f64>() / SMOOTHING_WIDTH as f64)
            .enumerate()
            .for_each(|(i, avg)| if avg > best.1 { best = (i, avg) });
        let window_start = lo + best.0 as u64;
        let center = window_start + SMOOTHING_OFFSET;
        let refined: Vec<_> = points
            .iter()
            .filter(|(p, _)| p.abs_diff(center) < SMOOTHING_OFFSET)
            .copied()
            .collect();
        points = if refined.is_empty() {
            // the densest window is carried by a point on its left edge
            let window_end = window_start + SMOOTHING_WIDTH as u64 - 1;
            points.into_iter().filter(|(p, _)| (window_start..=window_end).contains(p)).collect()
        } else {
            refined
        };
    }

    let weight: f64 = points.iter().map(|x| x.1).sum();
    let mean = if weight > 0.0 {
        points.iter().map(|(p, w)| *p as f64 * w).sum::<f64>() / weight
    } else {
        points.iter().map(|(p, _)| *p as f64).sum::<f64>() / points.len() as f64
    };
    Some(mean.round_ties_even() as u64)
}

/// A gene with its representative coordinate, the anchor of every
/// downstream window. `anchor` is `None` when no peak overlapped the
/// promoter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchoredGene {
    pub gene_id: String,
    pub chrom: String,
    pub tss: u64,
    pub strand: Strand,
    pub gene_name: String,
    pub anchor: Option<u64>,
    pub n_peaks: usize,
}

/// Pools peaks of many sample batches per gene promoter.
pub struct PeakLocalizer<'a> {
    genes: &'a [GeneRecord],
    index: BedTree<usize>,
    observations: Vec<Vec<PeakObservation>>,
}

impl<'a> PeakLocalizer<'a> {
    /// `search` is the promoter window built around each TSS.
    pub fn new(genes: &'a [GeneRecord], search: PromoterWindow) -> Self {
        let index = genes
            .iter()
            .enumerate()
            .map(|(i, g)| (search.around(&g.chrom, g.tss), i))
            .collect();
        Self { genes, index, observations: vec![Vec::new(); genes.len()] }
    }

    /// Add a normalized sample batch.
    pub fn add_batch(&mut self, batch: &[PeakObservation]) {
        for peak in batch {
            for (_, i) in self.index.find(peak) {
                self.observations[*i].push(peak.clone());
            }
        }
    }

    /// Read, normalize and add every sample. Batches are parsed in parallel
    /// and merged in sample order.
    pub fn add_samples(&mut self, samples: &[PeakSample], field: PeakScoreField) -> Result<()> {
        let batches: Vec<Vec<PeakObservation>> = samples
            .par_iter()
            .map(|sample| {
                let reader = open_file_for_read(&sample.path)?;
                read_peak_batch(reader, &sample.tag, field)
                    .with_context(|| format!("failed to read peaks of sample {}", sample.tag))
            })
            .collect::<Result<_>>()?;
        for (sample, batch) in samples.iter().zip(batches) {
            info!("Sample {}: {} peaks", sample.tag, batch.len());
            self.add_batch(&batch);
        }
        Ok(())
    }

    /// Localize every gene. Genes whose `profile` window around the anchor
    /// leaves the chromosome are removed.
    pub fn finish(self, chrom_sizes: &ChromSizes, profile: PromoterWindow) -> Vec<AnchoredGene> {
        let mut n_undefined = 0;
        let mut n_out_of_bounds = 0;
        let anchored: Vec<AnchoredGene> = self
            .genes
            .iter()
            .zip(self.observations)
            .filter_map(|(gene, obs)| {
                let points: Vec<(u64, f64)> = obs.iter().map(|x| (x.summit, x.normalized)).collect();
                let anchor = localize(&points);
                if !obs.is_empty() {
                    debug!(
                        "{}: {} -> {:?}",
                        gene.gene_id,
                        obs.iter().map(|x| format!("{}@{}({:.3})", x.tag, x.summit, x.normalized)).join(" "),
                        anchor,
                    );
                }
                match anchor {
                    None => n_undefined += 1,
                    Some(a) if profile.within(chrom_sizes, &gene.chrom, a).is_none() => {
                        warn!("Dropping {}: window around {}:{} leaves the chromosome", gene.gene_id, gene.chrom, a);
                        n_out_of_bounds += 1;
                        return None;
                    }
                    _ => {}
                }
                Some(AnchoredGene {
                    gene_id: gene.gene_id.clone(),
                    chrom: gene.chrom.clone(),
                    tss: gene.tss,
                    strand: gene.strand,
                    gene_name: gene.gene_name.clone(),
                    anchor,
                    n_peaks: obs.len(),
                })
            })
            .collect();
        info!(
            "Localized {} genes; {} without overlapping peaks, {} out of bounds",
            anchored.len() - n_undefined, n_undefined, n_out_of_bounds,
        );
        anchored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_undefined() {
        assert_eq!(localize(&[]), None);
    }

    #[test]
    fn test_majority_prefix() {
        assert_eq!(localize(&[(100, 0.9), (102, 0.05), (104, 0.05)]), Some(100));
        // order of the input does not matter
        assert_eq!(localize(&[(104, 0.05), (102, 0.05), (100, 0.9)]), Some(100));
    }

    #[test]
    fn test_exact_cutoff_is_not_exceeded() {
        // 0.75 is not > 0.75, so the second point is needed too
        assert_eq!(localize(&[(100, 0.75), (110, 0.25)]), Some(102));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(localize(&[(500, 0.3)]), Some(500));
        assert_eq!(localize(&[(500, 0.3), (500, 0.9), (500, 0.1)]), Some(500));
        assert_eq!(localize(&[(100, 0.0), (110, 0.0)]), Some(105));
        // all equal weights: cumulative 0.25, 0.5, 0.75, 1.0
        assert_eq!(localize(&[(200, 0.5), (210, 0.5), (220, 0.5), (230, 0.5)]), Some(215));
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(localize(&[(100, 0.5), (101, 0.5)]), Some(100));
        assert_eq!(localize(&[(101, 0.5), (102, 0.5)]), Some(102));
    }

    #[test]
    fn test_smoothing_offset() {
        // Retained points 1000, 1010, 1200. The densest 50 bp window starts
        // at 1000, so the center is 1025 and 1000 sits exactly 25 away.
        let obs = [(1000, 0.3), (1010, 0.3), (1200, 0.3), (1500, 0.1)];
        assert_eq!(localize(&obs), Some(1010));
    }

    #[test]
    fn test_smoothing_prefers_agreement() {
        let obs = [
            (5000, 0.5),
            (2000, 0.4), (2010, 0.4), (2020, 0.4), (2030, 0.4),
        ];
        // 5000 survives the majority cut but sits alone; 2000 is exactly
        // 25 bp from the center of the densest window
        assert_eq!(localize(&obs), Some(2015));
    }

    #[test]
    fn test_left_edge_fallback() {
        assert_eq!(localize(&[(0, 0.5), (100, 0.5)]), Some(0));
    }

    #[test]
    fn test_stays_in_hull() {
        let obs: Vec<(u64, f64)> = (0..40u64)
            .map(|i| (1000 + (i * 37) % 300, ((i * 13) % 7) as f64 / 7.0))
            .collect();
        let anchor = localize(&obs).unwrap();
        assert!((1000..1300).contains(&anchor));
    }

    #[test]
    fn test_normalize_batch() {
        let input = "\
chr1\t99\t200\ta\t0\t.\t2\t-1\t-1\t10
chr1\t299\t400\tb\t0\t.\t6\t-1\t-1\t10
chr1\t499\t600\tc\t0\t.\t4\t-1\t-1\t-1
";
        let batch = read_peak_batch(input.as_bytes(), "E001", PeakScoreField::Signal).unwrap();
        assert_eq!(batch.iter().map(|x| x.normalized).collect::<Vec<_>>(), vec![0.0, 1.0, 0.5]);
        assert_eq!(batch.iter().map(|x| x.summit).collect::<Vec<_>>(), vec![110, 310, 550]);

        let flat = read_peak_batch(input.as_bytes(), "E001", PeakScoreField::Score).unwrap();
        assert!(flat.iter().all(|x| x.normalized == 1.0));
        assert!(flat.iter().all(|x| x.tag == "E001"));
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let input = "\
chr1\t99\t200\ta\t0\t.\t2\t5\t-1\t10
chr1\t299\t400\tb\t0\t.\t6\t10\t-1\t10
chr1\t499\t600\tc\t0\t.\t4\t-1\t-1\t-1
";
        let batch = read_peak_batch(input.as_bytes(), "E001", PeakScoreField::PValue).unwrap();
        assert_eq!(batch.iter().map(|x| x.normalized).collect::<Vec<_>>(), vec![0.0, 1.0]);
        assert_eq!(batch.iter().map(|x| x.raw).collect::<Vec<_>>(), vec![5.0, 10.0]);

        let batch = read_peak_batch(input.as_bytes(), "E001", PeakScoreField::QValue).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_zero_length_peak() {
        let genes = vec![GeneRecord {
            gene_id: "A".to_string(),
            chrom: "chr1".to_string(),
            tss: 100,
            strand: Strand::Forward,
            gene_name: "a".to_string(),
            score: None,
        }];
        let input = "\
chr1\t100\t100\tp\t0\t.\t1\t-1\t-1\t-1
chr1\t89\t130\tq\t0\t.\t3\t-1\t-1\t20
";
        let batch = read_peak_batch(input.as_bytes(), "E001", PeakScoreField::Signal).unwrap();
        assert_eq!(batch[0].summit, 101);

        let mut localizer = PeakLocalizer::new(&genes, PromoterWindow::new(50, 50));
        localizer.add_batch(&batch);
        let sizes: ChromSizes = vec![("chr1", 1000)].into_iter().collect();
        let anchored = localizer.finish(&sizes, PromoterWindow::symmetric(10));
        assert_eq!(anchored[0].anchor, Some(110));

        let inverted = "chr1\t200\t100\tp\t0\t.\t1\t-1\t-1\t-1\n";
        assert!(read_peak_batch(inverted.as_bytes(), "E001", PeakScoreField::Signal).is_err());
    }

    #[test]
    fn test_localizer() {
        let gene = |id: &str, tss: u64| GeneRecord {
            gene_id: id.to_string(),
            chrom: "chr1".to_string(),
            tss,
            strand: Strand::Forward,
            gene_name: id.to_lowercase(),
            score: Some(1.0),
        };
        let genes = vec![gene("A", 1000), gene("B", 5000), gene("C", 9800)];
        let sample1 = "\
chr1\t899\t1000\tp1\t0\t.\t10\t-1\t-1\t50
chr1\t9799\t9900\tp3\t0\t.\t1\t-1\t-1\t20
";
        let sample2 = "\
chr1\t909\t1000\tp1\t0\t.\t3\t-1\t-1\t40
chr1\t1899\t2000\tp2\t0\t.\t1\t-1\t-1\t40
";
        let mut localizer = PeakLocalizer::new(&genes, PromoterWindow::new(200, 200));
        localizer.add_batch(&read_peak_batch(sample1.as_bytes(), "E001", PeakScoreField::Signal).unwrap());
        localizer.add_batch(&read_peak_batch(sample2.as_bytes(), "E002", PeakScoreField::Signal).unwrap());

        let sizes: ChromSizes = vec![("chr1", 10000)].into_iter().collect();
        let anchored = localizer.finish(&sizes, PromoterWindow::symmetric(500));
        // C is dropped: 9820 + 500 > 10000
        assert_eq!(anchored.len(), 2);
        assert_eq!(anchored[0].anchor, Some(950));
        assert_eq!(anchored[0].n_peaks, 2);
        assert_eq!(anchored[1].anchor, None);
        assert_eq!(anchored[1].n_peaks, 0);
    }

    #[test]
    fn test_discover_samples() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["E003-DNase.narrowPeak.gz", "E001-DNase.narrowPeak", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let samples = discover_samples(dir.path()).unwrap();
        assert_eq!(
            samples.iter().map(|x| x.tag.as_str()).collect::<Vec<_>>(),
            vec!["E001-DNase", "E003-DNase"],
        );

        let list = dir.path().join("samples.tsv");
        std::fs::write(&list, "liver\tE001-DNase.narrowPeak\n\nE003-DNase.narrowPeak.gz\n").unwrap();
        let samples = discover_samples(&list).unwrap();
        assert_eq!(samples[0].tag, "liver");
        assert_eq!(samples[0].path, dir.path().join("E001-DNase.narrowPeak"));
        assert_eq!(samples[1].tag, "E003-DNase");

        assert!(discover_samples(dir.path().join("missing")).is_err());
    }
}
