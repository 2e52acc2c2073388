use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;
use std::{path::Path, str::FromStr, io::Read};

use crate::bed::Strand;
use crate::utils::open_file_for_read;

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundProb(pub [f64; 4]);

impl Default for BackgroundProb {
    fn default() -> Self {
        BackgroundProb([0.25, 0.25, 0.25, 0.25])
    }
}

/// A position probability matrix. Each row holds the A, C, G, T
/// probabilities of one motif position.
#[derive(Debug, Clone, PartialEq)]
pub struct DNAMotif {
    pub id: String,
    pub name: Option<String>,
    pub probability: Vec<[f64; 4]>,
}

impl FromStr for DNAMotif {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut motifs = parse_meme(s)?;
        ensure!(motifs.len() == 1, "expecting exactly one motif, found {}", motifs.len());
        Ok(motifs.remove(0))
    }
}

impl DNAMotif {
    pub fn size(&self) -> usize { self.probability.len() }

    pub fn info_content(&self) -> f64 {
        self.probability.iter().map(|row| {
            let entropy: f64 = row.iter().map(|p| if *p == 0.0 {
                0.0
            } else {
                -1.0 * *p * p.log2()
            }).sum();
            2.0 - entropy
        }).sum()
    }

    pub fn to_scanner(mut self, bg: BackgroundProb, pseudocount: f64, threshold: f64) -> DNAMotifScanner {
        self.add_pseudocount(pseudocount);
        let forward = ScoringMatrix::new(&self, &bg);
        let reverse = ScoringMatrix::new(&self.revcomp(), &bg);
        DNAMotifScanner {
            motif: self,
            forward,
            reverse,
            threshold,
        }
    }

    /// The matrix matching the opposite strand.
    pub fn revcomp(&self) -> Self {
        let probability = self.probability.iter().rev().map(|[a, c, g, t]| [*t, *g, *c, *a]).collect();
        DNAMotif { id: self.id.clone(), name: self.name.clone(), probability }
    }

    fn add_pseudocount(&mut self, pseudocount: f64) {
        self.probability.iter_mut().for_each(|ps| {
            ps.iter_mut().for_each(|p| if *p == 0.0 { *p = pseudocount; });
            let s: f64 = ps.iter().sum();
            if s != 1.0 {
                ps.iter_mut().for_each(|p| *p /= s);
            }
        });
    }
}

/// Log-odds scores of one strand.
#[derive(Debug, Clone)]
struct ScoringMatrix {
    log_odds: Vec<[f64; 4]>,
    /// Best achievable score of the positions after `i`.
    remain_best: Vec<f64>,
    min_score: f64,
    max_score: f64,
}

impl ScoringMatrix {
    fn new(motif: &DNAMotif, bg: &BackgroundProb) -> Self {
        let log_odds: Vec<[f64; 4]> = motif.probability.iter()
            .map(|row| std::array::from_fn(|i| (row[i] / bg.0[i]).ln()))
            .collect();
        let row_max = |row: &[f64; 4]| row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let row_min = |row: &[f64; 4]| row.iter().copied().fold(f64::INFINITY, f64::min);

        let mut remain_best: Vec<f64> = log_odds.iter().scan(0.0, |state, row| {
            *state += row_max(row);
            Some(*state)
        }).collect();
        let max_score = remain_best.last().copied().unwrap_or(0.0);
        remain_best.iter_mut().for_each(|x| *x = max_score - *x);
        let min_score = log_odds.iter().map(row_min).sum();

        ScoringMatrix { log_odds, remain_best, min_score, max_score }
    }

    fn size(&self) -> usize { self.log_odds.len() }

    fn relative(&self, score: f64) -> f64 {
        if self.max_score > self.min_score {
            (score - self.min_score) / (self.max_score - self.min_score)
        } else {
            1.0
        }
    }

    fn absolute(&self, relative: f64) -> f64 {
        self.min_score + relative * (self.max_score - self.min_score)
    }

    // This function does not do bound checks on seq.
    fn look_ahead_search(&self, seq: &[u8], start: usize, thres: f64) -> Option<(usize, f64)> {
        let n = self.size();
        let mut cur_pos = 0;
        let mut cur_match = 0.0;
        loop {
            let sc = match seq[cur_pos + start] {
                b'A' | b'a' => self.log_odds[cur_pos][0],
                b'C' | b'c' => self.log_odds[cur_pos][1],
                b'G' | b'g' => self.log_odds[cur_pos][2],
                b'T' | b't' => self.log_odds[cur_pos][3],
                _ => 0.0,
            };
            cur_match += sc;
            let cur_best = cur_match + self.remain_best[cur_pos];

            if cur_best < thres {
                return None;
            } else if cur_pos >= n - 1 {
                return Some((start, cur_best));
            } else {
                cur_pos += 1;
            }
        }
    }
}

/// A window of the scanned sequence scoring above the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MotifMatch {
    /// 0-based offset of the first base of the match in the scanned sequence.
    pub start: usize,
    /// 0-based offset of the last base, inclusive.
    pub end: usize,
    pub strand: Strand,
    pub score: f64,
    /// `score` scaled to [0, 1] by the lowest and highest achievable scores.
    pub rel_score: f64,
}

/// Anything that reports motif matches in a DNA sequence.
pub trait MotifSearch: Send + Sync {
    fn id(&self) -> &str;

    fn find(&self, seq: &[u8]) -> Vec<MotifMatch>;
}

#[derive(Debug, Clone)]
pub struct DNAMotifScanner {
    pub motif: DNAMotif,
    forward: ScoringMatrix,
    reverse: ScoringMatrix,
    threshold: f64,
}

impl DNAMotifScanner {
    pub fn threshold(&self) -> f64 { self.threshold }

    fn sites<'a>(&'a self, strand: Strand, seq: &'a [u8]) -> impl Iterator<Item = MotifMatch> + 'a {
        let matrix = match strand {
            Strand::Reverse => &self.reverse,
            _ => &self.forward,
        };
        MotifSites {
            matrix,
            seq,
            cur_pos: 0,
            thres: matrix.absolute(self.threshold),
        }.map(move |(start, score)| MotifMatch {
            start,
            end: start + matrix.size() - 1,
            strand,
            score,
            rel_score: matrix.relative(score).clamp(0.0, 1.0),
        })
    }
}

impl MotifSearch for DNAMotifScanner {
    fn id(&self) -> &str { &self.motif.id }

    /// Matches on both strands, ordered by position.
    fn find(&self, seq: &[u8]) -> Vec<MotifMatch> {
        if self.motif.size() == 0 {
            return Vec::new();
        }
        self.sites(Strand::Forward, seq)
            .merge_by(self.sites(Strand::Reverse, seq), |a, b| a.start <= b.start)
            .collect()
    }
}

struct MotifSites<'a> {
    matrix: &'a ScoringMatrix,
    seq: &'a [u8],
    cur_pos: usize,
    thres: f64,
}

impl<'a> Iterator for MotifSites<'a> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cur_pos + self.matrix.size() >= self.seq.len() + 1 {
                return None;
            }
            let search_result = self.matrix.look_ahead_search(self.seq, self.cur_pos, self.thres);
            self.cur_pos += 1;
            if search_result.is_some() {
                return search_result;
            }
        }
    }
}

fn parse_row(line: &str) -> Result<[f64; 4]> {
    let values: Vec<f64> = line.split_ascii_whitespace()
        .map(|v| v.parse().with_context(|| format!("invalid probability: {}", v)))
        .collect::<Result<_>>()?;
    values.try_into()
        .map_err(|v: Vec<f64>| anyhow::anyhow!("expecting 4 columns, found {}", v.len()))
}

/// Parse motifs in the MEME minimal text format.
pub fn parse_meme(content: &str) -> Result<Vec<DNAMotif>> {
    let mut motifs = Vec::new();
    let mut lines = content.lines().map(str::trim);
    while let Some(line) = lines.next() {
        let header = match line.strip_prefix("MOTIF") {
            Some(x) => x,
            None => continue,
        };
        let mut fields = header.split_ascii_whitespace();
        let id = fields.next().context("MOTIF line without identifier")?.to_string();
        let name = fields.next().map(|x| x.to_string());

        let matrix_line = lines.by_ref()
            .find(|x| x.starts_with("letter-probability matrix"))
            .with_context(|| format!("motif {}: letter-probability matrix not found", id))?;
        let width: usize = matrix_line.split("w=").nth(1)
            .and_then(|x| x.split_ascii_whitespace().next())
            .with_context(|| format!("motif {}: missing motif width", id))?
            .parse()
            .with_context(|| format!("motif {}: invalid motif width", id))?;
        let probability = lines.by_ref()
            .filter(|x| !x.is_empty())
            .take(width)
            .map(parse_row)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("motif {}: malformed matrix", id))?;
        ensure!(probability.len() == width, "motif {}: expecting {} rows, found {}", id, width, probability.len());
        motifs.push(DNAMotif { id, name, probability });
    }
    Ok(motifs)
}

/// Parse count matrices in the JASPAR format and convert them to probabilities.
pub fn parse_jaspar(content: &str) -> Result<Vec<DNAMotif>> {
    let mut motifs = Vec::new();
    let mut lines = content.lines().map(str::trim).filter(|x| !x.is_empty()).peekable();
    while let Some(header) = lines.next() {
        let header = header.strip_prefix('>')
            .with_context(|| format!("expecting a '>' header line, found: {}", header))?;
        let mut fields = header.split_ascii_whitespace();
        let id = fields.next().context("header without identifier")?.to_string();
        let name = fields.next().map(|x| x.to_string());

        let counts: Vec<Vec<f64>> = (0..4).map(|_| {
            let line = lines.next().with_context(|| format!("motif {}: expecting 4 count rows", id))?;
            line.trim_start_matches(['A', 'C', 'G', 'T'])
                .replace(['[', ']'], " ")
                .split_ascii_whitespace()
                .map(|v| v.parse::<f64>().with_context(|| format!("motif {}: invalid count {}", id, v)))
                .collect::<Result<Vec<f64>>>()
        }).collect::<Result<_>>()?;
        let width = counts[0].len();
        ensure!(counts.iter().all(|x| x.len() == width), "motif {}: rows of unequal length", id);

        let probability: Vec<[f64; 4]> = (0..width).map(|j| -> Result<[f64; 4]> {
            let total: f64 = counts.iter().map(|x| x[j]).sum();
            ensure!(total > 0.0, "motif {}: column {} has no counts", id, j + 1);
            Ok(std::array::from_fn(|i| counts[i][j] / total))
        }).collect::<Result<_>>()?;
        motifs.push(DNAMotif { id, name, probability });
    }
    Ok(motifs)
}

/// Read a motif database, recognizing the MEME and JASPAR formats.
pub fn read_motifs<P: AsRef<Path>>(path: P) -> Result<Vec<DNAMotif>> {
    let path = path.as_ref();
    let mut content = String::new();
    open_file_for_read(path)?.read_to_string(&mut content)?;
    let motifs = if content.trim_start().starts_with('>') {
        parse_jaspar(&content)
    } else {
        parse_meme(&content)
    }.with_context(|| format!("failed to read motifs from {}", path.display()))?;
    if motifs.is_empty() {
        bail!("no motifs found in {}", path.display());
    }
    let duplicates: Vec<_> = motifs.iter().map(|x| x.id.as_str()).duplicates().collect();
    ensure!(duplicates.is_empty(), "duplicated motif identifiers: {}", duplicates.join(", "));
    Ok(motifs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEME: &str = "MEME version 4

ALPHABET= ACGT

MOTIF AAAC_1 Foo
letter-probability matrix: alength= 4 w= 4 nsites= 20 E= 0
0.97 0.01 0.01 0.01
0.97 0.01 0.01 0.01
0.97 0.01 0.01 0.01
0.01 0.97 0.01 0.01

MOTIF 1_ASCCAGGCKGG
letter-probability matrix: alength= 4 w= 3 nsites= 14 E= 3.2e-035
0.768791 0.07577 0.120456 0.034983
0.057276 0.532522375 0.282802875 0.12739862500000002
0.048894125 0.796682375 0.09644475 0.05797825
";

    fn scanner() -> DNAMotifScanner {
        let motifs = parse_meme(MEME).unwrap();
        motifs[0].clone().to_scanner(BackgroundProb::default(), 0.0001, 0.8)
    }

    #[test]
    fn test_parse_meme() {
        let motifs = parse_meme(MEME).unwrap();
        assert_eq!(motifs.len(), 2);
        assert_eq!(motifs[0].id, "AAAC_1");
        assert_eq!(motifs[0].name.as_deref(), Some("Foo"));
        assert_eq!(motifs[1].name, None);
        assert_eq!(motifs[1].size(), 3);
        assert_eq!(motifs[1].probability[2][1], 0.796682375);

        let truncated = MEME.replace("w= 3", "w= 5");
        assert!(parse_meme(&truncated).is_err());
        assert!("MOTIF X\nletter-probability matrix: w= 1\n0.5 0.5 x 0".parse::<DNAMotif>().is_err());
    }

    #[test]
    fn test_parse_jaspar() {
        let content = ">MA0004.1 Arnt
A  [ 4 19  0 ]
C  [16  0 20 ]
G  [ 0  1  0 ]
T  [ 0  0  0 ]
>MA0006.1\tAhr::Arnt
1 0 0
0 1 0
0 0 1
1 1 1
";
        let motifs = parse_jaspar(content).unwrap();
        assert_eq!(motifs.len(), 2);
        assert_eq!(motifs[0].name.as_deref(), Some("Arnt"));
        assert_eq!(motifs[0].probability[0], [0.2, 0.8, 0.0, 0.0]);
        assert_eq!(motifs[0].probability[1], [0.95, 0.0, 0.05, 0.0]);
        assert_eq!(motifs[1].probability[2], [0.0, 0.0, 0.5, 0.5]);
        assert!(parse_jaspar(">X\nA [1]\nC [1]\n").is_err());
    }

    #[test]
    fn test_revcomp() {
        let motif = DNAMotif {
            id: "m".to_string(),
            name: None,
            probability: vec![[0.7, 0.1, 0.1, 0.1], [0.1, 0.2, 0.3, 0.4]],
        };
        let rc = motif.revcomp();
        assert_eq!(rc.probability, vec![[0.4, 0.3, 0.2, 0.1], [0.1, 0.1, 0.1, 0.7]]);
        assert_eq!(rc.revcomp(), motif);
        assert!((motif.info_content() - rc.info_content()).abs() < 1e-12);
    }

    #[test]
    fn test_both_strands() {
        let scanner = scanner();
        //         0    5    10
        let seq = b"CCAAACCCGTTTCC";
        let matches = scanner.find(seq);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].start, matches[0].end, matches[0].strand), (2, 5, Strand::Forward));
        assert_eq!((matches[1].start, matches[1].end, matches[1].strand), (8, 11, Strand::Reverse));
        assert!(matches.iter().all(|m| (m.rel_score - 1.0).abs() < 1e-9));
        assert_eq!(scanner.find(&seq.to_ascii_lowercase()), matches);
    }

    #[test]
    fn test_threshold_and_ambiguous_bases() {
        let scanner = scanner();
        // a single mismatch falls below 0.8
        assert!(scanner.find(b"AAGC").is_empty());
        // N scores as background
        let matches = scanner.find(b"AANC");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].rel_score > 0.9 && matches[0].rel_score < 0.95);
        assert!(scanner.find(b"AAA").is_empty());
        assert!(scanner.find(b"").is_empty());

        let permissive = parse_meme(MEME).unwrap()[0].clone()
            .to_scanner(BackgroundProb::default(), 0.0001, 0.0);
        assert_eq!(permissive.find(b"GGGGG").len(), 4);
    }
}
