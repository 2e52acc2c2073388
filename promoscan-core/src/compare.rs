//! Gene-set profiles against a resampled background.
use anyhow::{ensure, Result};
use log::{info, warn};
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::profile::{artifact_name, ProfileTable};
use crate::task::Task;
use crate::utils::write_tsv;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapOptions {
    pub n_resamples: usize,
    pub seed: u64,
    pub lower: f64,
    pub upper: f64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self { n_resamples: 1000, seed: 2024, lower: 0.05, upper: 0.95 }
    }
}

/// Gene ids whose display name, or any of their `,`-separated display
/// names, is in `names`.
pub fn resolve_gene_set<'a, I>(gene_names: I, names: &[String]) -> HashSet<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let wanted: HashSet<&str> = names.iter().map(|x| x.as_str()).collect();
    let mut found = HashSet::new();
    let mut genes = HashSet::new();
    for (gene_id, gene_name) in gene_names {
        for name in gene_name.split(',').filter(|x| wanted.contains(x)) {
            found.insert(name);
            genes.insert(gene_id.to_string());
        }
    }
    let n_missing = wanted.len() - found.len();
    if n_missing > 0 {
        warn!("{} of {} gene names did not match any gene", n_missing, wanted.len());
    }
    genes
}

/// Position-wise mean of equally long profiles.
pub fn mean_profile<'a, I>(profiles: I, len: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut total = vec![0.0; len];
    let mut n = 0usize;
    for profile in profiles {
        total.iter_mut().zip(profile).for_each(|(t, x)| *t += x);
        n += 1;
    }
    if n > 0 {
        total.iter_mut().for_each(|x| *x /= n as f64);
    }
    total
}

/// The mean profile of a gene set and the percentile band of mean profiles
/// of equally sized random sets from the other genes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Genes of interest that have a profile.
    pub n_goi: usize,
    pub offsets: Vec<i64>,
    pub goi_mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeRow {
    pub offset: i64,
    pub goi_mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Envelope {
    pub fn rows(&self) -> impl Iterator<Item = EnvelopeRow> + '_ {
        (0..self.offsets.len()).map(move |i| EnvelopeRow {
            offset: self.offsets[i],
            goi_mean: self.goi_mean[i],
            lower: self.lower[i],
            upper: self.upper[i],
        })
    }

    pub fn mean_width(&self) -> f64 {
        let n = self.offsets.len().max(1) as f64;
        self.upper.iter().zip(&self.lower).map(|(u, l)| u - l).sum::<f64>() / n
    }
}

/// Each resample draws `|goi|` distinct genes from the complement of `goi`.
/// Resample `i` is seeded with `seed + i`, so results do not depend on the
/// number of threads.
pub fn bootstrap_envelope(
    table: &ProfileTable,
    goi: &HashSet<String>,
    options: &BootstrapOptions,
) -> Result<Envelope> {
    let len = table.window().len();
    let (goi_rows, background): (Vec<_>, Vec<_>) = table.iter()
        .partition(|(gene_id, _)| goi.contains(*gene_id));
    let k = goi_rows.len();
    ensure!(k > 0, "none of the genes of interest has a profile");
    ensure!(
        k <= background.len(),
        "{} genes of interest but only {} background genes", k, background.len(),
    );
    ensure!(options.n_resamples > 0, "the number of resamples must be positive");

    let goi_mean = mean_profile(goi_rows.iter().map(|x| x.1), len);
    let resampled: Vec<Vec<f64>> = (0..options.n_resamples).into_par_iter().map(|i| {
        let mut rng = Isaac64Rng::seed_from_u64(options.seed.wrapping_add(i as u64));
        let idx = rand::seq::index::sample(&mut rng, background.len(), k);
        mean_profile(idx.iter().map(|j| background[j].1), len)
    }).collect();

    let (lower, upper): (Vec<f64>, Vec<f64>) = (0..len).map(|j| {
        let mut data = Data::new(resampled.iter().map(|x| x[j]).collect::<Vec<_>>());
        (data.quantile(options.lower), data.quantile(options.upper))
    }).unzip();

    Ok(Envelope {
        n_goi: k,
        offsets: table.window().offsets().collect(),
        goi_mean,
        lower,
        upper,
    })
}

/// Compares the gene set against the background for one motif.
pub struct CompareTask {
    profiles: PathBuf,
    genes: HashSet<String>,
    options: BootstrapOptions,
    output: PathBuf,
}

impl CompareTask {
    pub fn new(motif_id: &str, profile_dir: &Path, genes: HashSet<String>, options: BootstrapOptions, dir: &Path) -> Self {
        let name = artifact_name(motif_id);
        Self {
            profiles: profile_dir.join(format!("{}.arrow", name)),
            genes,
            options,
            output: dir.join(format!("{}.tsv", name)),
        }
    }
}

impl Task for CompareTask {
    fn key(&self) -> String {
        self.profiles.file_stem().map(|x| x.to_string_lossy().to_string()).unwrap_or_default()
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn run(&self, dest: &Path) -> Result<()> {
        let table = ProfileTable::read_ipc(&self.profiles)?;
        let envelope = bootstrap_envelope(&table, &self.genes, &self.options)?;
        info!(
            "{}: {} genes of interest, mean envelope width {:.4}",
            self.key(), envelope.n_goi, envelope.mean_width(),
        );
        write_tsv(dest, envelope.rows())
    }
}
