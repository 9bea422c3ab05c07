use criterion::{criterion_group, criterion_main, Criterion};
use ragcore::tokenizer::tokenize;
use ragcore::{Bm25Index, Bm25Params, Corpus, Document, Retriever};

const WORDS: &[&str] = &[
    "retrieval", "index", "token", "query", "score", "corpus", "document", "memory", "rust", "search",
    "lexical", "ranking", "model", "prompt", "context", "answer", "source", "artifact", "snapshot", "term",
];

fn synthetic_text(seed: usize, len: usize) -> String {
    (0..len).map(|i| WORDS[(seed * 7 + i * 13 + i / 3) % WORDS.len()]).collect::<Vec<_>>().join(" ")
}

fn bench_tokenize(c: &mut Criterion) {
    let text = synthetic_text(1, 2_000);
    c.bench_function("tokenize_2k_words", |b| b.iter(|| tokenize(&text)));
}

fn bench_top_k(c: &mut Criterion) {
    let corpus: Corpus = (0..1_000).map(|i| Document::new(format!("doc{i}.txt"), synthetic_text(i, 200))).collect();
    let index = Bm25Index::build(&corpus, Bm25Params::default());
    let retriever = Retriever::new(corpus, index).expect("consistent index");
    c.bench_function("top_k_1000_docs", |b| b.iter(|| retriever.top_k("rust memory snapshot ranking", 4)));
}

criterion_group!(benches, bench_tokenize, bench_top_k);
criterion_main!(benches);
