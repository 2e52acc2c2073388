//! Positional motif score profiles around gene anchors.
use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};
use polars::prelude::*;
use std::{fs::File, path::{Path, PathBuf}, sync::Arc};

use crate::bed::{BEDLike, Strand};
use crate::genome::PromoterWindow;
use crate::motif::{DNAMotifScanner, MotifMatch, MotifSearch};
use crate::peak::AnchoredGene;
use crate::sequence::SequenceSource;
use crate::task::Task;

pub const GENE_ID_COLUMN: &str = "gene_id";

/// The offsets `-half_width..=half_width` around an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileWindow {
    pub half_width: u64,
}

impl Default for ProfileWindow {
    fn default() -> Self {
        Self { half_width: 500 }
    }
}

impl ProfileWindow {
    pub fn new(half_width: u64) -> Self {
        Self { half_width }
    }

    pub fn len(&self) -> usize {
        2 * self.half_width as usize + 1
    }

    pub fn offsets(&self) -> impl Iterator<Item = i64> {
        let h = self.half_width as i64;
        -h..=h
    }

    pub fn as_promoter(&self) -> PromoterWindow {
        PromoterWindow::symmetric(self.half_width)
    }
}

/// Sum the relative scores of `matches` over every position they cover.
/// Match coordinates are indices into the window, 0 being the leftmost
/// offset; parts of a match outside the window are ignored.
pub fn aggregate(window: &ProfileWindow, matches: &[MotifMatch]) -> Vec<f64> {
    let mut profile = vec![0.0; window.len()];
    for m in matches {
        let end = m.end.min(profile.len() - 1);
        if m.start <= end {
            profile[m.start..=end].iter_mut().for_each(|x| *x += m.rel_score);
        }
    }
    profile
}

/// Profiles of one motif, one row per gene.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    window: ProfileWindow,
    gene_ids: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl ProfileTable {
    pub fn new(window: ProfileWindow) -> Self {
        Self { window, gene_ids: Vec::new(), values: Vec::new() }
    }

    pub fn window(&self) -> ProfileWindow {
        self.window
    }

    pub fn push(&mut self, gene_id: String, profile: Vec<f64>) -> Result<()> {
        ensure!(
            profile.len() == self.window.len(),
            "profile of {} has {} positions, expecting {}", gene_id, profile.len(), self.window.len(),
        );
        self.gene_ids.push(gene_id);
        self.values.push(profile);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gene_ids.is_empty()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.gene_ids.iter().map(|x| x.as_str()).zip(self.values.iter().map(|x| x.as_slice()))
    }

    pub fn get(&self, gene_id: &str) -> Option<&[f64]> {
        self.gene_ids.iter().position(|x| x == gene_id).map(|i| self.values[i].as_slice())
    }

    /// Gene ids in the first column, then one column per offset.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.window.len() + 1);
        columns.push(Series::new(GENE_ID_COLUMN, self.gene_ids.clone()));
        for (j, offset) in self.window.offsets().enumerate() {
            let column: Vec<f64> = self.values.iter().map(|row| row[j]).collect();
            columns.push(Series::new(&offset.to_string(), column));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let names = df.get_column_names();
        ensure!(names.first() == Some(&GENE_ID_COLUMN), "first column must be '{}'", GENE_ID_COLUMN);
        let offsets = names[1..].iter()
            .map(|x| x.parse::<i64>().with_context(|| format!("invalid offset column: {}", x)))
            .collect::<Result<Vec<_>>>()?;
        let half_width = offsets.last().copied().unwrap_or(0);
        ensure!(half_width >= 0, "invalid offset columns");
        let window = ProfileWindow::new(half_width as u64);
        ensure!(
            offsets.iter().copied().eq(window.offsets()),
            "offset columns must run from {} to {}", -half_width, half_width,
        );

        let gene_ids: Vec<String> = df.column(GENE_ID_COLUMN)?.str()?
            .into_iter()
            .map(|x| x.map(|x| x.to_string()).context("missing gene id"))
            .collect::<Result<_>>()?;
        let mut values = vec![Vec::with_capacity(window.len()); gene_ids.len()];
        for name in &names[1..] {
            let column = df.column(name)?.f64()?;
            for (row, value) in values.iter_mut().zip(column.into_iter()) {
                row.push(value.unwrap_or(0.0));
            }
        }
        Ok(Self { window, gene_ids, values })
    }

    pub fn write_ipc<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path)
            .with_context(|| format!("cannot create file: {}", path.display()))?;
        IpcWriter::new(&mut file).finish(&mut self.to_dataframe()?)?;
        Ok(())
    }

    pub fn read_ipc<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("cannot open file: {}", path.display()))?;
        let df = IpcReader::new(file).finish()?;
        Self::from_dataframe(&df).with_context(|| format!("invalid profile table: {}", path.display()))
    }
}

/// The window sequence of one anchored gene, read on the `+` strand.
#[derive(Debug, Clone, PartialEq)]
pub struct PromoterSequence {
    pub gene_id: String,
    pub strand: Strand,
    pub seq: Vec<u8>,
}

/// Window sequences of every anchored gene, shared read-only by the motif
/// tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct Promoters {
    pub window: ProfileWindow,
    pub sequences: Vec<PromoterSequence>,
}

impl Promoters {
    /// Fetch the window around each gene's anchor. Genes without an anchor
    /// are skipped, and so are genes whose window cannot be read.
    pub fn extract<S: SequenceSource>(
        source: &mut S,
        genes: &[AnchoredGene],
        window: ProfileWindow,
    ) -> Result<Self> {
        let mut sequences = Vec::new();
        for gene in genes {
            let anchor = match gene.anchor {
                Some(x) => x,
                None => continue,
            };
            if anchor <= window.half_width {
                warn!("Skipping {}: window around {} starts before the chromosome", gene.gene_id, anchor);
                continue;
            }
            let region = window.as_promoter().around(&gene.chrom, anchor);
            match source.fetch(region.chrom(), region.start(), region.end()) {
                Ok(seq) => sequences.push(PromoterSequence {
                    gene_id: gene.gene_id.clone(),
                    strand: gene.strand,
                    seq,
                }),
                Err(e) => warn!("Skipping {}: {:#}", gene.gene_id, e),
            }
        }
        info!("Extracted {} promoter sequences", sequences.len());
        Ok(Self { window, sequences })
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// Profile every promoter with `motif`.
pub fn profile_motif<M: MotifSearch + ?Sized>(
    motif: &M,
    promoters: &Promoters,
    orient_by_strand: bool,
) -> Result<ProfileTable> {
    let window = promoters.window;
    let mut table = ProfileTable::new(window);
    for promoter in &promoters.sequences {
        if promoter.seq.len() != window.len() {
            bail!(
                "sequence of {} has length {}, expecting {}",
                promoter.gene_id, promoter.seq.len(), window.len(),
            );
        }
        let mut profile = aggregate(&window, &motif.find(&promoter.seq));
        if orient_by_strand && promoter.strand == Strand::Reverse {
            profile.reverse();
        }
        table.push(promoter.gene_id.clone(), profile)?;
    }
    Ok(table)
}

/// Replace characters that are not allowed in file names.
pub fn artifact_name(motif_id: &str) -> String {
    sanitize_filename::sanitize(motif_id)
}

/// Profiles one motif over all promoters and persists the table.
pub struct MotifProfileTask {
    scanner: DNAMotifScanner,
    promoters: Arc<Promoters>,
    orient_by_strand: bool,
    output: PathBuf,
}

impl MotifProfileTask {
    pub fn new(scanner: DNAMotifScanner, promoters: Arc<Promoters>, orient_by_strand: bool, dir: &Path) -> Self {
        let output = dir.join(format!("{}.arrow", artifact_name(scanner.id())));
        Self { scanner, promoters, orient_by_strand, output }
    }
}

impl Task for MotifProfileTask {
    fn key(&self) -> String {
        self.scanner.id().to_string()
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn run(&self, dest: &Path) -> Result<()> {
        debug!(
            "Scanning {} promoters with {} (width {}, {:.2} bits)",
            self.promoters.len(), self.scanner.id(), self.scanner.motif.size(),
            self.scanner.motif.info_content(),
        );
        profile_motif(&self.scanner, &self.promoters, self.orient_by_strand)?.write_ipc(dest)
    }
}
