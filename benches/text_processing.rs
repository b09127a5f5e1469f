use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use graph_rag::extract::{parse, DelimiterSet, ExtractionFormat, ParseContext};
use graph_rag::fusion::{fuse, FusionOptions};
use graph_rag::tokenizer::{Tokenizer, WordTokenizer};
use graph_rag::{chunk_document, ChunkOptions};

fn chunker_benchmark(c: &mut Criterion) {
    let tokenizer = WordTokenizer::new();
    let text = "Rust async ingestion graph merge retrieval chunk overlap pipeline".repeat(64);
    let opts = ChunkOptions {
        max_tokens: 64,
        overlap_tokens: 8,
        split_char: None,
        split_char_only: false,
    };

    c.bench_function("chunker_split_long_text", |b| {
        b.iter(|| {
            let chunks =
                chunk_document(&tokenizer, black_box(text.as_str()), "bench", "bench.txt", &opts)
                    .unwrap();
            black_box(chunks.len());
        });
    });
}

fn parser_benchmark(c: &mut Criterion) {
    let record = concat!(
        "(\"entity\"<|>Alice<|>person<|>A researcher working on graph pipelines)##",
        "(\"entity\"<|>Acme<|>organization<|>A research lab)##",
        "(\"relationship\"<|>Alice<|>Acme<|>Alice works at Acme<|>2.0)##"
    );
    let raw = record.repeat(32) + "<|COMPLETE|>";
    let delimiters = DelimiterSet::default();
    let ctx = ParseContext {
        chunk_id: "bench-chunk".to_string(),
        file_path: "bench.txt".to_string(),
        timestamp: Utc::now(),
        max_name_len: 256,
    };

    c.bench_function("parser_dense_delimited_output", |b| {
        b.iter(|| {
            let parsed = parse(
                ExtractionFormat::Delimited,
                black_box(raw.as_str()),
                &delimiters,
                &ctx,
            );
            black_box(parsed.accepted());
        });
    });
}

fn tokenizer_benchmark(c: &mut Criterion) {
    let tokenizer = WordTokenizer::new();
    let text = "entity graph retrieval fusion pipeline chunk merge store".repeat(128);

    c.bench_function("tokenizer_encode_hot_path", |b| {
        b.iter(|| {
            let tokens = tokenizer.encode(black_box(text.as_str()));
            black_box(tokens.len());
        });
    });
}

fn fusion_benchmark(c: &mut Criterion) {
    let channels: Vec<(String, Vec<String>)> = ["vector", "graph", "keyword"]
        .iter()
        .map(|name| {
            let docs: Vec<String> = (0..200).map(|i| format!("doc-{}", (i * 7) % 211)).collect();
            (name.to_string(), docs)
        })
        .collect();
    let opts = FusionOptions::default();

    c.bench_function("rrf_fuse_three_channels", |b| {
        b.iter(|| {
            let fused = fuse(black_box(&channels), &opts);
            black_box(fused.len());
        });
    });
}

criterion_group!(
    benches,
    chunker_benchmark,
    parser_benchmark,
    tokenizer_benchmark,
    fusion_benchmark
);
criterion_main!(benches);
