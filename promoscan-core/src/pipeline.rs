//! The four stages wired as memoized tasks over one output directory:
//!
//! ```text
//! <out>/genes.tsv             one TSS per gene
//! <out>/anchors.tsv           representative peak coordinate per gene
//! <out>/promoters.fa          window sequence around each anchor
//! <out>/profiles/<motif>.arrow
//! <out>/compare/<motif>.tsv
//! ```
use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use log::info;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::bed::Strand;
use crate::compare::{resolve_gene_set, BootstrapOptions, CompareTask};
use crate::config::PipelineConfig;
use crate::genome::{CanonicalChroms, ChromSizes, PromoterWindow};
use crate::motif::read_motifs;
use crate::peak::{discover_samples, AnchoredGene, PeakLocalizer, PeakScoreField};
use crate::profile::{artifact_name, MotifProfileTask, ProfileWindow, PromoterSequence, Promoters};
use crate::sequence::{fai_path, read_fasta, write_fasta, FastaSource};
use crate::task::{Task, TaskOutcome, TaskReport, TaskRunner};
use crate::tss::{read_annotation_from_path, select_tss, AnnotationParserOptions, GeneRecord};
use crate::utils::{open_file_for_write, read_name_list, read_tsv, write_tsv};

/// Artifact locations under the output directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path { &self.root }
    pub fn genes(&self) -> PathBuf { self.root.join("genes.tsv") }
    pub fn anchors(&self) -> PathBuf { self.root.join("anchors.tsv") }
    pub fn promoters(&self) -> PathBuf { self.root.join("promoters.fa") }
    pub fn profiles(&self) -> PathBuf { self.root.join("profiles") }
    pub fn compare(&self) -> PathBuf { self.root.join("compare") }
}

pub struct SelectTssTask {
    pub annotation: PathBuf,
    pub options: AnnotationParserOptions,
    pub canonical: CanonicalChroms,
    pub output: PathBuf,
}

impl Task for SelectTssTask {
    fn key(&self) -> String { "select-tss".to_string() }

    fn output(&self) -> &Path { &self.output }

    fn run(&self, dest: &Path) -> Result<()> {
        let records = read_annotation_from_path(&self.annotation)?;
        let genes = select_tss(&records, &self.options, &self.canonical);
        write_tsv(dest, genes)
    }
}

pub struct LocalizeTask {
    pub genes: PathBuf,
    pub peaks: PathBuf,
    pub chrom_sizes: PathBuf,
    pub search: PromoterWindow,
    pub profile: ProfileWindow,
    pub field: PeakScoreField,
    pub output: PathBuf,
}

impl Task for LocalizeTask {
    fn key(&self) -> String { "localize".to_string() }

    fn output(&self) -> &Path { &self.output }

    fn run(&self, dest: &Path) -> Result<()> {
        let genes: Vec<GeneRecord> = read_tsv(&self.genes)?;
        let chrom_sizes = ChromSizes::from_path(&self.chrom_sizes)?;
        let samples = discover_samples(&self.peaks)?;
        info!("Localizing {} genes over {} peak samples", genes.len(), samples.len());

        let mut localizer = PeakLocalizer::new(&genes, self.search);
        localizer.add_samples(&samples, self.field)?;
        let anchored = localizer.finish(&chrom_sizes, self.profile.as_promoter());
        write_tsv(dest, anchored)
    }
}

pub struct ExtractTask {
    pub anchors: PathBuf,
    pub genome: PathBuf,
    pub window: ProfileWindow,
    pub output: PathBuf,
}

impl Task for ExtractTask {
    fn key(&self) -> String { "extract".to_string() }

    fn output(&self) -> &Path { &self.output }

    fn run(&self, dest: &Path) -> Result<()> {
        let anchored: Vec<AnchoredGene> = read_tsv(&self.anchors)?;
        let mut source = FastaSource::from_path(&self.genome)?;
        let promoters = Promoters::extract(&mut source, &anchored, self.window)?;
        write_fasta(
            open_file_for_write(dest, None, None)?,
            promoters.sequences.iter().map(|x| (x.gene_id.as_str(), x.seq.as_slice())),
        )
    }
}

/// Reassemble the promoter set from the persisted anchors and sequences.
pub fn load_promoters(anchors: &Path, sequences: &Path, window: ProfileWindow) -> Result<Promoters> {
    let anchored: Vec<AnchoredGene> = read_tsv(anchors)?;
    let strands: HashMap<&str, Strand> = anchored.iter()
        .map(|x| (x.gene_id.as_str(), x.strand))
        .collect();
    let sequences = read_fasta(sequences)?
        .into_iter()
        .map(|(gene_id, seq)| -> Result<PromoterSequence> {
            let strand = *strands.get(gene_id.as_str())
                .with_context(|| format!("{} is not an anchored gene", gene_id))?;
            ensure!(
                seq.len() == window.len(),
                "sequence of {} has length {}, expecting {}", gene_id, seq.len(), window.len(),
            );
            Ok(PromoterSequence { gene_id, strand, seq })
        })
        .collect::<Result<_>>()?;
    Ok(Promoters { window, sequences })
}

/// Inputs of a full run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub annotation: PathBuf,
    pub peaks: PathBuf,
    pub genome: PathBuf,
    /// Defaults to the FASTA index of `genome`.
    pub chrom_sizes: Option<PathBuf>,
    pub motifs: PathBuf,
    pub gene_set: Option<PathBuf>,
}

pub struct Pipeline {
    config: PipelineConfig,
    layout: Layout,
    runner: TaskRunner,
}

impl Pipeline {
    pub fn new<P: Into<PathBuf>>(config: PipelineConfig, out_dir: P) -> Result<Self> {
        config.validate()?;
        let runner = TaskRunner::new(config.memo).with_threads(config.threads).with_progress(true);
        Ok(Self { config, layout: Layout::new(out_dir), runner })
    }

    pub fn layout(&self) -> &Layout { &self.layout }

    pub fn config(&self) -> &PipelineConfig { &self.config }

    pub fn select_tss(&self, annotation: &Path) -> Result<TaskOutcome> {
        let task = SelectTssTask {
            annotation: annotation.to_path_buf(),
            options: self.config.annotation.clone(),
            canonical: self.config.canonical_chroms()?,
            output: self.layout.genes(),
        };
        self.runner.run_one(&task)
    }

    pub fn localize(&self, peaks: &Path, chrom_sizes: &Path) -> Result<TaskOutcome> {
        let task = LocalizeTask {
            genes: self.layout.genes(),
            peaks: peaks.to_path_buf(),
            chrom_sizes: chrom_sizes.to_path_buf(),
            search: self.config.search_window(),
            profile: self.config.profile_window(),
            field: self.config.peak_score_field,
            output: self.layout.anchors(),
        };
        self.runner.run_one(&task)
    }

    pub fn extract(&self, genome: &Path) -> Result<TaskOutcome> {
        let task = ExtractTask {
            anchors: self.layout.anchors(),
            genome: genome.to_path_buf(),
            window: self.config.profile_window(),
            output: self.layout.promoters(),
        };
        self.runner.run_one(&task)
    }

    /// One profiling task per motif of the database.
    pub fn scan(&self, motifs: &Path) -> Result<Vec<TaskReport>> {
        let motifs = read_motifs(motifs)?;
        let clashes: Vec<String> = motifs.iter()
            .map(|x| artifact_name(&x.id))
            .duplicates()
            .collect();
        ensure!(
            clashes.is_empty(),
            "motif identifiers map to the same file name: {}", clashes.join(", "),
        );
        let promoters = Arc::new(load_promoters(
            &self.layout.anchors(),
            &self.layout.promoters(),
            self.config.profile_window(),
        )?);
        info!("Profiling {} motifs over {} promoters", motifs.len(), promoters.len());
        let dir = self.layout.profiles();
        let tasks: Vec<MotifProfileTask> = motifs.into_iter().map(|motif| {
            let scanner = motif.to_scanner(
                self.config.background(),
                self.config.pseudocount,
                self.config.motif_threshold,
            );
            MotifProfileTask::new(scanner, promoters.clone(), self.config.orient_by_strand, &dir)
        }).collect();
        self.runner.run_all(&tasks)
    }

    /// Compare the named genes against the rest for every profiled motif.
    pub fn compare(&self, gene_set: &Path) -> Result<Vec<TaskReport>> {
        let names = read_name_list(gene_set)?;
        let anchored: Vec<AnchoredGene> = read_tsv(self.layout.anchors())?;
        let genes = resolve_gene_set(
            anchored.iter().map(|x| (x.gene_id.as_str(), x.gene_name.as_str())),
            &names,
        );
        info!("Resolved {} gene names to {} genes", names.len(), genes.len());

        let options = BootstrapOptions {
            n_resamples: self.config.n_resamples,
            seed: self.config.seed,
            lower: self.config.lower_percentile,
            upper: self.config.upper_percentile,
        };
        let profile_dir = self.layout.profiles();
        let pattern = profile_dir.join("*.arrow");
        let pattern = pattern.to_str().context("output directory is not valid UTF-8")?;
        let mut motif_ids = Vec::new();
        for entry in glob::glob(pattern)? {
            if let Some(stem) = entry?.file_stem() {
                motif_ids.push(stem.to_string_lossy().to_string());
            }
        }
        motif_ids.sort();
        let tasks: Vec<CompareTask> = motif_ids.iter()
            .map(|id| CompareTask::new(id, &profile_dir, genes.clone(), options, &self.layout.compare()))
            .collect();
        self.runner.run_all(&tasks)
    }

    /// All stages in order. The comparison only runs with a gene set.
    pub fn run(&self, inputs: &RunInputs) -> Result<Vec<TaskReport>> {
        self.select_tss(&inputs.annotation)?;
        let chrom_sizes = inputs.chrom_sizes.clone().unwrap_or_else(|| fai_path(&inputs.genome));
        self.localize(&inputs.peaks, &chrom_sizes)?;
        self.extract(&inputs.genome)?;
        let mut reports = self.scan(&inputs.motifs)?;
        if let Some(gene_set) = &inputs.gene_set {
            reports.extend(self.compare(gene_set)?);
        }
        Ok(reports)
    }
}
