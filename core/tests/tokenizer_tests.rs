use rwi_core::tokenizer::{term_hash, title_words, tokenize, url_components, word_hashes};
use rwi_core::WordHash;

#[test]
fn it_normalizes_and_stems() {
    let toks = tokenize("Running Runners RUN! The café's menu.");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    assert!(words.contains(&"run".to_string()));
    // NFKC keeps the accent; lowercasing and stemming still apply
    assert!(words.iter().any(|w| w.starts_with("caf")));
}

#[test]
fn it_filters_stopwords() {
    let toks = tokenize("The quick brown fox and the lazy dog");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
}

#[test]
fn query_words_hash_like_indexed_words() {
    let indexed = word_hashes("Runners are running");
    assert!(indexed.contains(&term_hash("RUNNING").unwrap()));
    assert_eq!(term_hash("and"), None);
    assert_eq!(WordHash::of("run").as_str().len(), 12);
}

#[test]
fn url_and_title_components() {
    assert_eq!(url_components("https://docs.rs/serde"), vec!["https", "docs", "rs", "serde"]);
    assert_eq!(title_words("The Rust Book"), vec!["the", "rust", "book"]);
}
