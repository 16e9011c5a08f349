use criterion::{black_box, criterion_group, criterion_main, Criterion};
use diamond_relay::protocol::openai_chat::response_encoder::ChunkEmitter;
use diamond_relay::stream::translator::canonicalize;
use diamond_relay::stream::{LineReassembler, TranslationSession};

/// Upstream body: one `curr` record followed by `diff_count` appends and heartbeats.
fn sample_upstream_body(diff_count: usize) -> Vec<u8> {
    let mut body = String::from("0:{\"curr\":\"Sure, here is the answer: \"}\n");
    for idx in 0..diff_count {
        if idx % 4 == 3 {
            body.push_str(&format!("{:x}:{{\"diff\":[1]}}\n", idx + 1));
        } else {
            body.push_str(&format!(
                "{:x}:{{\"diff\":[0,\"token {idx} costs $$1 \"]}}\n",
                idx + 1
            ));
        }
    }
    body.into_bytes()
}

fn translate_body(body: &[u8], chunk_size: usize) -> usize {
    let mut reassembler = LineReassembler::new();
    let mut session = TranslationSession::new();
    let mut lines = Vec::new();
    let mut forwarded = 0;
    for chunk in body.chunks(chunk_size) {
        reassembler
            .push_into(chunk, &mut lines)
            .expect("valid utf-8");
        for line in lines.drain(..) {
            if let Some(increment) = session.process_line(&line) {
                forwarded += increment.len();
            }
        }
    }
    if let Some(tail) = reassembler.finish().expect("valid utf-8") {
        if let Some(increment) = session.process_tail(&tail) {
            forwarded += increment.len();
        }
    }
    forwarded
}

fn bench_translate(c: &mut Criterion) {
    let body = sample_upstream_body(512);

    c.bench_function("translate_512_diffs_chunk_64", |b| {
        b.iter(|| black_box(translate_body(black_box(&body), 64)));
    });

    c.bench_function("translate_512_diffs_chunk_4k", |b| {
        b.iter(|| black_box(translate_body(black_box(&body), 4096)));
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let plain = "The quick brown fox jumps over the lazy dog. ".repeat(32);
    let dollars = "Total: $$5 plus $$10 shipping. ".repeat(32);

    c.bench_function("canonicalize_plain_1k", |b| {
        b.iter(|| black_box(canonicalize(black_box(&plain))));
    });
    c.bench_function("canonicalize_dollars_1k", |b| {
        b.iter(|| black_box(canonicalize(black_box(&dollars))));
    });
}

fn bench_delta_frame(c: &mut Criterion) {
    let emitter = ChunkEmitter::new(
        "chatcmpl-bench".to_string(),
        1_727_000_000,
        "gpt-4o".to_string(),
        "fp_0123456789".to_string(),
    );

    c.bench_function("delta_frame_short", |b| {
        b.iter(|| black_box(emitter.delta_frame(black_box(" there")).expect("frame")));
    });
}

criterion_group!(
    benches,
    bench_translate,
    bench_canonicalize,
    bench_delta_frame
);
criterion_main!(benches);
