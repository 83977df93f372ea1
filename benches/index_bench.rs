use criterion::{black_box, criterion_group, criterion_main, Criterion};
use radic::core::config::ShardConfig;
use radic::core::types::Document;
use radic::index::Indexer;
use radic::query::TermQuery;
use rand::Rng;
use tempfile::TempDir;

fn test_document(id: u64) -> Document {
    let mut rng = rand::thread_rng();
    let words = ["usb", "wireless", "mouse", "keyboard", "cable", "charger"];
    let mut doc = Document::new(format!("doc-{id}")).with_bits(1 << (id % 20));
    for _ in 0..4 {
        doc = doc.with_keyword("content", words[rng.gen_range(0..words.len())]);
    }
    doc.with_payload(vec![0u8; 128])
}

fn bench_add_doc(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let indexer = Indexer::open(&ShardConfig::new(dir.path().join("bench"))).unwrap();
    let mut next = 0u64;
    c.bench_function("indexer_add_doc", |b| {
        b.iter(|| {
            next += 1;
            indexer.add_doc(black_box(test_document(next))).unwrap();
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let indexer = Indexer::open(&ShardConfig::new(dir.path().join("bench"))).unwrap();
    for i in 0..5_000 {
        indexer.add_doc(test_document(i)).unwrap();
    }
    let query = TermQuery::all_of("content", &["usb", "cable"]);
    c.bench_function("indexer_search_two_terms", |b| {
        b.iter(|| indexer.search(black_box(&query), 0, 0, &[]).unwrap())
    });
}

criterion_group!(benches, bench_add_doc, bench_search);
criterion_main!(benches);
