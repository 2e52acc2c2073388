use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::genome::{CanonicalChroms, PromoterWindow, DEFAULT_CANONICAL_CHROMS};
use crate::motif::BackgroundProb;
use crate::peak::PeakScoreField;
use crate::profile::ProfileWindow;
use crate::task::MemoPolicy;
use crate::tss::AnnotationParserOptions;

/// Parameters of every pipeline stage. Fields missing from a configuration
/// file take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub annotation: AnnotationParserOptions,
    pub canonical_chroms: String,
    /// Margins of the TSS-centered window searched for peaks.
    pub search_upstream: u64,
    pub search_downstream: u64,
    pub peak_score_field: PeakScoreField,
    pub profile_half_width: u64,
    /// Reverse the profiles of `-` strand genes.
    pub orient_by_strand: bool,
    /// Minimum relative score of a reported motif match.
    pub motif_threshold: f64,
    /// A, C, G, T background frequencies.
    pub background: [f64; 4],
    pub pseudocount: f64,
    pub n_resamples: usize,
    pub seed: u64,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    /// Worker threads. `None` uses every available core.
    pub threads: Option<usize>,
    pub memo: MemoPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            annotation: AnnotationParserOptions::default(),
            canonical_chroms: DEFAULT_CANONICAL_CHROMS.to_string(),
            search_upstream: 1000,
            search_downstream: 1000,
            peak_score_field: PeakScoreField::default(),
            profile_half_width: 500,
            orient_by_strand: false,
            motif_threshold: 0.8,
            background: [0.25; 4],
            pseudocount: 0.0001,
            n_resamples: 1000,
            seed: 2024,
            lower_percentile: 0.05,
            upper_percentile: 0.95,
            threads: None,
            memo: MemoPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open config file: {}", path.display()))?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.motif_threshold),
            "motif_threshold must be in [0, 1], got {}", self.motif_threshold,
        );
        ensure!(
            self.background.iter().all(|x| *x > 0.0),
            "background frequencies must be positive",
        );
        ensure!(self.pseudocount > 0.0, "pseudocount must be positive");
        ensure!(
            0.0 <= self.lower_percentile
                && self.lower_percentile < self.upper_percentile
                && self.upper_percentile <= 1.0,
            "percentiles must satisfy 0 <= lower < upper <= 1",
        );
        ensure!(self.n_resamples > 0, "n_resamples must be positive");
        ensure!(self.threads != Some(0), "threads must be positive");
        self.canonical_chroms()?;
        Ok(())
    }

    pub fn canonical_chroms(&self) -> Result<CanonicalChroms> {
        CanonicalChroms::new(&self.canonical_chroms)
    }

    pub fn search_window(&self) -> PromoterWindow {
        PromoterWindow::new(self.search_upstream, self.search_downstream)
    }

    pub fn profile_window(&self) -> ProfileWindow {
        ProfileWindow::new(self.profile_half_width)
    }

    /// Background normalized to sum to one.
    pub fn background(&self) -> BackgroundProb {
        let total: f64 = self.background.iter().sum();
        BackgroundProb(self.background.map(|x| x / total))
    }
}
