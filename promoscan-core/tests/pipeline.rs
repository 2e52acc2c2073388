use promoscan_core::{
    compare::EnvelopeRow,
    peak::AnchoredGene,
    profile::ProfileTable,
    task::{MemoPolicy, TaskOutcome},
    tss::GeneRecord,
    utils::read_tsv,
    Pipeline, PipelineConfig, RunInputs,
};
use std::fmt::Write as _;
use std::path::Path;

const CHROM_LEN: usize = 4000;

fn genome() -> Vec<u8> {
    let mut state: u64 = 42;
    let mut seq: Vec<u8> = (0..CHROM_LEN).map(|_| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        b"ACGT"[(state >> 62) as usize]
    }).collect();
    // motif at the anchor of G1 (1-based 1005..=1008)
    seq[1004..1008].copy_from_slice(b"AAAC");
    seq
}

fn write_genome(path: &Path) {
    let seq = genome();
    let mut fasta = String::from(">chr1\n");
    for line in seq.chunks(60) {
        fasta.push_str(std::str::from_utf8(line).unwrap());
        fasta.push('\n');
    }
    std::fs::write(path, fasta).unwrap();
    std::fs::write(format!("{}.fai", path.display()), format!("chr1\t{}\t6\t60\t61\n", CHROM_LEN)).unwrap();
}

fn annotation() -> String {
    let mut gtf = String::from("##format: gtf\n");
    let genes = [
        ("G1", 1000, 1600, '+'),
        ("G2", 2000, 2500, '-'),
        ("G3", 3950, 3990, '+'),
        ("G4", 500, 700, '+'),
    ];
    for (id, start, end, strand) in genes {
        for (feature, score) in [("gene", ""), ("transcript", " TIEScore \"0.9\";"), ("exon", "")] {
            writeln!(
                gtf,
                "chr1\tFANTOM\t{}\t{}\t{}\t.\t{}\t.\tgene_id \"{}\"; gene_name \"{}\"; geneClass \"coding_mRNA\";{}",
                feature, start, end, strand, id, id.to_lowercase(), score,
            ).unwrap();
        }
    }
    gtf
}

fn write_inputs(dir: &Path) -> RunInputs {
    let peaks = dir.join("peaks");
    std::fs::create_dir_all(&peaks).unwrap();
    std::fs::write(
        peaks.join("E001.narrowPeak"),
        "chr1\t979\t1020\ta1\t0\t.\t10\t-1\t-1\t20\n\
         chr1\t2479\t2520\ta2\t0\t.\t5.5\t-1\t-1\t20\n\
         chr1\t3929\t3970\ta3\t0\t.\t1\t-1\t-1\t20\n",
    ).unwrap();
    std::fs::write(
        peaks.join("E002.narrowPeak"),
        "chr1\t989\t1030\tb1\t0\t.\t8\t-1\t-1\t20\n\
         chr1\t2489\t2530\tb2\t0\t.\t2\t-1\t-1\t20\n",
    ).unwrap();

    let annotation = dir.join("annotation.gtf");
    std::fs::write(&annotation, crate::annotation()).unwrap();
    let genome = dir.join("genome.fa");
    write_genome(&genome);
    let motifs = dir.join("motifs.meme");
    std::fs::write(
        &motifs,
        "MEME version 4\n\nMOTIF M1 AAAC\nletter-probability matrix: alength= 4 w= 4 nsites= 10\n\
         0.97 0.01 0.01 0.01\n0.97 0.01 0.01 0.01\n0.97 0.01 0.01 0.01\n0.01 0.97 0.01 0.01\n",
    ).unwrap();
    let gene_set = dir.join("goi.txt");
    std::fs::write(&gene_set, "# genes of interest\ng1\n").unwrap();

    RunInputs { annotation, peaks, genome, chrom_sizes: None, motifs, gene_set: Some(gene_set) }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        search_upstream: 200,
        search_downstream: 200,
        profile_half_width: 100,
        n_resamples: 20,
        threads: Some(2),
        ..Default::default()
    }
}

#[test]
fn test_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path());
    let out = dir.path().join("out");
    let pipeline = Pipeline::new(config(), &out).unwrap();
    let reports = pipeline.run(&inputs).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|x| x.outcome == TaskOutcome::Completed));

    let genes: Vec<GeneRecord> = read_tsv(out.join("genes.tsv")).unwrap();
    assert_eq!(
        genes.iter().map(|x| (x.gene_id.as_str(), x.tss)).collect::<Vec<_>>(),
        vec![("G1", 1000), ("G2", 2500), ("G3", 3950), ("G4", 500)],
    );

    // G3's profile window would end past the chromosome
    let anchors: Vec<AnchoredGene> = read_tsv(out.join("anchors.tsv")).unwrap();
    assert_eq!(
        anchors.iter().map(|x| (x.gene_id.as_str(), x.anchor, x.n_peaks)).collect::<Vec<_>>(),
        vec![("G1", Some(1005), 2), ("G2", Some(2500), 2), ("G4", None, 0)],
    );

    let profiles = ProfileTable::read_ipc(out.join("profiles/M1.arrow")).unwrap();
    assert_eq!(profiles.gene_ids(), ["G1".to_string(), "G2".to_string()]);
    let g1 = profiles.get("G1").unwrap();
    assert_eq!(g1.len(), 201);
    assert!(g1[100..104].iter().all(|x| *x > 0.99));

    let envelope: Vec<EnvelopeRow> = read_tsv(out.join("compare/M1.tsv")).unwrap();
    assert_eq!(envelope.len(), 201);
    assert_eq!(envelope[0].offset, -100);
    assert_eq!(envelope[100].goi_mean, g1[100]);
    // a single background gene: every resample draws it
    let g2 = profiles.get("G2").unwrap();
    assert!(envelope.iter().zip(g2).all(|(row, x)| row.lower == *x && row.upper == *x));
}

#[test]
fn test_rerun_is_memoized() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path());
    let out = dir.path().join("out");
    Pipeline::new(config(), &out).unwrap().run(&inputs).unwrap();
    let anchors = std::fs::read(out.join("anchors.tsv")).unwrap();

    let pipeline = Pipeline::new(config(), &out).unwrap();
    assert_eq!(pipeline.select_tss(&inputs.annotation).unwrap(), TaskOutcome::Skipped);
    let reports = pipeline.scan(&inputs.motifs).unwrap();
    assert_eq!(reports[0].outcome, TaskOutcome::Skipped);

    // a profile removed by hand is the only thing recomputed
    std::fs::remove_file(out.join("profiles/M1.arrow")).unwrap();
    let reports = pipeline.run(&inputs).unwrap();
    assert_eq!(reports[0].outcome, TaskOutcome::Completed);
    assert_eq!(reports[1].outcome, TaskOutcome::Skipped);

    let config = PipelineConfig { memo: MemoPolicy::Recompute, ..config() };
    Pipeline::new(config, &out).unwrap().run(&inputs).unwrap();
    assert_eq!(std::fs::read(out.join("anchors.tsv")).unwrap(), anchors);
}

#[test]
fn test_motif_file_names_must_be_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path());
    let out = dir.path().join("out");
    let pipeline = Pipeline::new(config(), &out).unwrap();
    pipeline.select_tss(&inputs.annotation).unwrap();
    pipeline.localize(&inputs.peaks, &dir.path().join("genome.fa.fai")).unwrap();
    pipeline.extract(&inputs.genome).unwrap();

    // both identifiers sanitize to MA0001.1a
    let motifs = dir.path().join("clash.meme");
    let matrix = "letter-probability matrix: alength= 4 w= 2 nsites= 10\n0.97 0.01 0.01 0.01\n0.01 0.97 0.01 0.01\n";
    std::fs::write(
        &motifs,
        format!("MEME version 4\n\nMOTIF MA0001.1/a\n{}\nMOTIF MA0001.1a\n{}", matrix, matrix),
    ).unwrap();
    let err = pipeline.scan(&motifs).unwrap_err();
    assert!(err.to_string().contains("MA0001.1a"));
    assert!(!out.join("profiles").exists());
}
