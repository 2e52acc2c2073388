use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use promoscan_core::{
    peak::PeakScoreField,
    sequence::fai_path,
    task::{MemoPolicy, TaskOutcome, TaskReport},
    Pipeline, PipelineConfig, RunInputs,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None,)]
struct Cli {
    #[clap(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Output directory.
    #[arg(short, long, global = true, default_value = "promoscan-out")]
    out_dir: PathBuf,
    #[arg(short, long, global = true)]
    threads: Option<usize>,
    /// Recompute artifacts that already exist.
    #[arg(long, global = true)]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select one transcription start site per gene.
    SelectTss {
        /// GTF annotation (FANTOM CAT layout).
        annotation: PathBuf,
    },
    /// Collapse overlapping peaks into one anchor per gene.
    Localize {
        /// Directory of narrowPeak files, or a sample list.
        peaks: PathBuf,
        /// chrom.sizes or .fai file.
        #[arg(long)]
        chrom_sizes: PathBuf,
        /// Column holding the peak confidence: signal, score, pvalue or qvalue.
        #[arg(long)]
        score_field: Option<PeakScoreField>,
    },
    /// Extract the window sequence around every anchor.
    Extract {
        /// Indexed genome FASTA.
        genome: PathBuf,
    },
    /// Profile every motif of a MEME or JASPAR file.
    Scan {
        motifs: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
        /// Reverse profiles of genes on the minus strand.
        #[arg(long)]
        orient_by_strand: bool,
    },
    /// Compare a gene set against resampled background genes.
    Compare {
        /// Gene names, one per line.
        gene_set: PathBuf,
        #[arg(long)]
        resamples: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run every stage.
    Run {
        #[arg(long)]
        annotation: PathBuf,
        #[arg(long)]
        peaks: PathBuf,
        #[arg(long)]
        genome: PathBuf,
        /// Defaults to the genome's FASTA index.
        #[arg(long)]
        chrom_sizes: Option<PathBuf>,
        #[arg(long)]
        motifs: PathBuf,
        #[arg(long)]
        gene_set: Option<PathBuf>,
    },
}

impl CommonArgs {
    fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_path(path)?,
            None => PipelineConfig::default(),
        };
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        if self.force {
            config.memo = MemoPolicy::Recompute;
        }
        Ok(config)
    }
}

fn summarize(reports: &[TaskReport]) -> Result<()> {
    let failed: Vec<_> = reports.iter().filter(|x| x.is_failed()).collect();
    for report in &failed {
        if let TaskOutcome::Failed(msg) = &report.outcome {
            error!("{}: {}", report.key, msg);
        }
    }
    if !failed.is_empty() {
        bail!("{} of {} tasks failed", failed.len(), reports.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let mut config = cli.common.load_config()?;

    match cli.command {
        Command::SelectTss { annotation } => {
            let pipeline = Pipeline::new(config, &cli.common.out_dir)?;
            pipeline.select_tss(&annotation)?;
        },
        Command::Localize { peaks, chrom_sizes, score_field } => {
            if let Some(field) = score_field {
                config.peak_score_field = field;
            }
            let pipeline = Pipeline::new(config, &cli.common.out_dir)?;
            pipeline.localize(&peaks, &chrom_sizes)?;
        },
        Command::Extract { genome } => {
            let pipeline = Pipeline::new(config, &cli.common.out_dir)?;
            pipeline.extract(&genome)?;
        },
        Command::Scan { motifs, threshold, orient_by_strand } => {
            if let Some(threshold) = threshold {
                config.motif_threshold = threshold;
            }
            config.orient_by_strand |= orient_by_strand;
            let pipeline = Pipeline::new(config, &cli.common.out_dir)?;
            summarize(&pipeline.scan(&motifs)?)?;
        },
        Command::Compare { gene_set, resamples, seed } => {
            if let Some(n) = resamples {
                config.n_resamples = n;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            let pipeline = Pipeline::new(config, &cli.common.out_dir)?;
            summarize(&pipeline.compare(&gene_set)?)?;
        },
        Command::Run { annotation, peaks, genome, chrom_sizes, motifs, gene_set } => {
            let pipeline = Pipeline::new(config, &cli.common.out_dir)?;
            info!(
                "Chromosome sizes from {}",
                chrom_sizes.clone().unwrap_or_else(|| fai_path(&genome)).display(),
            );
            let inputs = RunInputs { annotation, peaks, genome, chrom_sizes, motifs, gene_set };
            summarize(&pipeline.run(&inputs)?)?;
        },
    }
    Ok(())
}
