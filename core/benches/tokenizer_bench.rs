use criterion::{criterion_group, criterion_main, Criterion};
use rwi_core::tokenizer::{tokenize, word_hashes};

const TEXT: &str = "Reverse word indexes map every word hash to the documents containing it. \
    A search joins the postings of the query words, normalizes their features against the \
    range seen so far and keeps the best candidates on a bounded stack, one site at a time.";

fn bench_tokenize(c: &mut Criterion) {
    let text = TEXT.repeat(50);
    c.bench_function("tokenize_text", |b| b.iter(|| tokenize(&text)));
    c.bench_function("word_hashes_text", |b| b.iter(|| word_hashes(&text)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
