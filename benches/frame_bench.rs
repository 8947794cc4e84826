//! Frame expansion and motif scanning benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modmap::alignment::AlignmentRecord;
use modmap::caller::{prepare_query, SequenceCaller};
use modmap::frame::{ExpandedFrame, FrameLayout};
use modmap::md::encode_md;
use modmap::motif::{MotifConfig, MotifScanner};

/// Synthetic 10 kb read with regular indels against a CpG rich reference.
fn fixture() -> (AlignmentRecord, Vec<u8>) {
    let unit_ref = b"ACGTTACGGACGTCAGCGTA";
    let unit_query = b"AZGTTACGGTCGTCAGZGTAA";
    let repeats = 500;

    let reference: Vec<u8> = unit_ref.iter().copied().cycle().take(unit_ref.len() * repeats).collect();
    let query: Vec<u8> = unit_query
        .iter()
        .copied()
        .cycle()
        .take(unit_query.len() * repeats)
        .collect();
    let cigar = "20M1I".repeat(repeats);
    let line = format!(
        "bench\t16\tchr1\t1\t60\t{cigar}\t*\t0\t0\t{}\t*",
        String::from_utf8_lossy(&query)
    );
    let record = AlignmentRecord::from_sam_line(&line).expect("fixture parses");
    (record, reference)
}

fn benchmark_frame(c: &mut Criterion) {
    let (record, reference) = fixture();
    let query = prepare_query(&record, None).expect("query trims");
    let layout = FrameLayout::from_cigar(&record.cigar);
    let scanner = MotifScanner::new(&MotifConfig::default()).expect("motif compiles");
    let caller = SequenceCaller::new(&MotifConfig::default(), 0.0).expect("caller builds");

    c.bench_function("layout_from_cigar_10kb", |b| {
        b.iter(|| FrameLayout::from_cigar(black_box(&record.cigar)));
    });

    c.bench_function("expand_and_scan_10kb", |b| {
        b.iter(|| {
            let frame = ExpandedFrame::build(
                &layout,
                black_box(&reference),
                black_box(&query.sequence),
                0,
                record.strand(),
            )
            .expect("lengths agree");
            scanner.sites(&frame).len()
        });
    });

    c.bench_function("encode_md_10kb", |b| {
        b.iter(|| encode_md(black_box(&reference), black_box(&query.sequence), &layout));
    });

    c.bench_function("sequence_caller_10kb", |b| {
        b.iter(|| caller.call(black_box(&record), &reference, &query).map(|calls| calls.len()));
    });
}

criterion_group!(benches, benchmark_frame);
criterion_main!(benches);
