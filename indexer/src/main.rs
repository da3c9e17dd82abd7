use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rwi_core::persist::{save_docs, save_meta, save_postings_for_word, IndexPaths, MetaFile};
use rwi_core::tokenizer::{title_words, tokenize, url_components};
use rwi_core::{ContentDomain, DocumentId, DocumentRecord, Features, Flags, Language, MediaLink, Posting, WordHash};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;
use walkdir::WalkDir;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const INDEX_VERSION: u32 = 2;
const DESCRIPTION_CHARS: usize = 160;

#[derive(Debug, Deserialize)]
struct MediaInput {
    url: String,
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    title: String,
    body: String,
    url: Option<String>,
    author: Option<String>,
    lang: Option<String>,
    /// RFC3339 last-modified time.
    timestamp: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    images: Vec<MediaInput>,
    #[serde(default)]
    audio: Vec<MediaInput>,
    #[serde(default)]
    video: Vec<MediaInput>,
    #[serde(default)]
    apps: Vec<MediaInput>,
}

#[derive(Parser)]
#[command(name = "rwi-indexer")]
#[command(about = "Build a word-hash reverse index for the ranking server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output } => build_index(Path::new(&input), Path::new(&output)).map(|_| ()),
    }
}

/// Occurrence statistics of one word in one document.
#[derive(Debug, Default, Clone, Copy)]
struct WordStats {
    hitcount: u32,
    position: u32,
    pos_in_phrase: u32,
    pos_of_phrase: u32,
    in_title: bool,
    in_author: bool,
}

/// Accumulates postings and metadata across all input files.
struct IndexBuilder {
    paths: IndexPaths,
    postings: HashMap<WordHash, Vec<Posting>>,
    docs: HashMap<DocumentId, DocumentRecord>,
    seen_external: HashSet<String>,
}

impl IndexBuilder {
    fn new(paths: IndexPaths) -> Self {
        IndexBuilder { paths, postings: HashMap::new(), docs: HashMap::new(), seen_external: HashSet::new() }
    }

    fn ingest(&mut self, doc: InputDoc) -> Result<()> {
        if !self.seen_external.insert(doc.id.clone()) {
            tracing::warn!(id = %doc.id, "duplicate document id, skipping");
            return Ok(());
        }
        let url = match &doc.url {
            Some(u) => Url::parse(u).with_context(|| format!("document {} has an invalid url", doc.id))?,
            None => Url::parse(&format!("http://localhost/doc/{}", doc.id))?,
        };
        let mut record = DocumentRecord::new(url, doc.title.clone());
        if self.docs.contains_key(&record.id) {
            tracing::warn!(id = %doc.id, url = %record.url, "url already indexed, skipping");
            return Ok(());
        }

        let language = doc.lang.as_deref().map(Language::new).unwrap_or_default();
        let days = doc.timestamp.as_deref().map(days_since_epoch).transpose()?.unwrap_or(0);
        let (llocal, lother) = count_links(&record.url, &doc.links);
        let media = media_links(&doc);

        let mut flags = Flags::empty();
        if doc.title.to_lowercase().starts_with("index of") {
            flags |= Flags::INDEX_OF;
        }
        for (domain, flag) in [
            (ContentDomain::Image, Flags::HAS_IMAGE),
            (ContentDomain::Audio, Flags::HAS_AUDIO),
            (ContentDomain::Video, Flags::HAS_VIDEO),
            (ContentDomain::App, Flags::HAS_APP),
        ] {
            if media.iter().any(|m| m.domain == domain) {
                flags |= flag;
            }
        }

        let (stats, words_in_text, phrases_in_text) = word_stats(&doc);
        let words_in_title = title_words(&doc.title).len() as u32;
        let url_length = record.url.as_str().len() as u32;
        let url_comps = url_components(record.url.as_str()).len() as u32;

        for (word, s) in stats {
            let features = Features {
                hitcount: s.hitcount,
                llocal,
                lother,
                virtual_age: days,
                words_in_text,
                phrases_in_text,
                position: s.position,
                pos_in_phrase: s.pos_in_phrase,
                pos_of_phrase: s.pos_of_phrase,
                url_length,
                url_comps,
                words_in_title,
                ..Default::default()
            };
            let mut word_flags = flags;
            word_flags.set(Flags::APP_DC_TITLE, s.in_title);
            word_flags.set(Flags::APP_DC_CREATOR, s.in_author);
            let posting = Posting::new(record.id, WordHash::of(&word), features).with_flags(word_flags).with_language(language);
            self.postings.entry(posting.word).or_default().push(posting);
        }

        // Write text for snippet extraction
        let text_rel = format!("texts/{}.txt", record.id);
        fs::write(self.paths.root.join(&text_rel), &doc.body)?;

        record.author = doc.author;
        record.description = Some(doc.body.chars().take(DESCRIPTION_CHARS).collect());
        record.size = doc.body.len() as u64;
        record.last_modified = days;
        record.language = language;
        record.flags = flags;
        record.word_count = words_in_text;
        let count = |domain: ContentDomain| media.iter().filter(|m| m.domain == domain).count() as u32;
        record.limage = count(ContentDomain::Image);
        record.laudio = count(ContentDomain::Audio);
        record.lvideo = count(ContentDomain::Video);
        record.lapp = count(ContentDomain::App);
        record.text_path = Some(text_rel);
        record.media = media;
        self.docs.insert(record.id, record);
        Ok(())
    }

    fn ingest_jsonl(&mut self, file: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(file)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            let doc: InputDoc = serde_json::from_str(&line)?;
            self.ingest(doc)?;
        }
        Ok(())
    }

    fn ingest_json(&mut self, file: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(file)?);
        let json: serde_json::Value = serde_json::from_reader(reader)?;
        match json {
            serde_json::Value::Array(arr) => {
                for v in arr {
                    self.ingest(serde_json::from_value(v)?)?;
                }
            }
            serde_json::Value::Object(_) => self.ingest(serde_json::from_value(json)?)?,
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self) -> Result<MetaFile> {
        for (word, postings) in self.postings.iter_mut() {
            postings.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
            save_postings_for_word(&self.paths, word, postings)?;
        }
        save_docs(&self.paths, &self.docs)?;
        let meta = MetaFile {
            num_docs: self.docs.len() as u32,
            num_words: self.postings.len() as u32,
            created_at: time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_default(),
            version: INDEX_VERSION,
        };
        save_meta(&self.paths, &meta)?;
        Ok(meta)
    }
}

fn build_index(input: &Path, output: &Path) -> Result<MetaFile> {
    let paths = IndexPaths::new(output);
    fs::create_dir_all(&paths.root)?;
    fs::create_dir_all(paths.texts_dir())?;

    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }

    let mut builder = IndexBuilder::new(paths);
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            builder.ingest_jsonl(&file)?;
        } else {
            builder.ingest_json(&file)?;
        }
    }
    tracing::info!(num_docs = builder.docs.len(), num_words = builder.postings.len(), "ingested documents");

    let meta = builder.finish()?;
    tracing::info!(output = %output.display(), "index build complete");
    Ok(meta)
}

/// Per-word statistics of a document, plus its word and phrase counts.
/// Words of the title and author count as well, flagged by where they appear.
fn word_stats(doc: &InputDoc) -> (HashMap<String, WordStats>, u32, u32) {
    let mut stats: HashMap<String, WordStats> = HashMap::new();
    let mut offset = 0u32;
    let mut phrases = 0u32;
    for (phrase_no, sentence) in doc.body.split(['.', '!', '?', '\n']).filter(|s| !s.trim().is_empty()).enumerate() {
        phrases += 1;
        for (term, pos) in tokenize(sentence) {
            let entry = stats.entry(term).or_insert_with(|| WordStats {
                position: offset + pos as u32,
                pos_in_phrase: pos as u32,
                pos_of_phrase: phrase_no as u32,
                ..Default::default()
            });
            entry.hitcount += 1;
        }
        offset += title_words(sentence).len() as u32;
    }
    for (term, _) in tokenize(&doc.title) {
        stats.entry(term).or_default().in_title = true;
    }
    if let Some(author) = &doc.author {
        for (term, _) in tokenize(author) {
            stats.entry(term).or_default().in_author = true;
        }
    }
    (stats, offset, phrases)
}

/// Outlinks split into same-host and other-host counts; unparsable links are ignored.
fn count_links(base: &Url, links: &[String]) -> (u32, u32) {
    links.iter().filter_map(|l| base.join(l).ok()).fold((0, 0), |(local, other), link| {
        if link.host_str() == base.host_str() { (local + 1, other) } else { (local, other + 1) }
    })
}

fn media_links(doc: &InputDoc) -> Vec<MediaLink> {
    [
        (ContentDomain::Image, &doc.images),
        (ContentDomain::Audio, &doc.audio),
        (ContentDomain::Video, &doc.video),
        (ContentDomain::App, &doc.apps),
    ]
    .into_iter()
    .flat_map(|(domain, items)| {
        items.iter().filter_map(move |m| match Url::parse(&m.url) {
            Ok(url) => Some(MediaLink { domain, url, label: m.label.clone() }),
            Err(e) => {
                tracing::debug!(url = %m.url, error = %e, "skipping media link");
                None
            }
        })
    })
    .collect()
}

fn days_since_epoch(ts: &str) -> Result<u32> {
    let t = time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339).with_context(|| format!("invalid timestamp {ts}"))?;
    Ok((t.unix_timestamp().max(0) / 86_400) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwi_core::persist::load_postings_for_word;
    use rwi_core::{DiskIndex, MetadataRepository};
    use tempfile::tempdir;

    fn doc(json: &str) -> InputDoc { serde_json::from_str(json).unwrap() }

    #[test]
    fn word_stats_track_first_occurrence() {
        let d = doc(r#"{"id":"1","title":"Rust Book","body":"Learn quickly. Then learn rust well.","author":"Ferris"}"#);
        let (stats, words, phrases) = word_stats(&d);
        assert_eq!(words, 6);
        assert_eq!(phrases, 2);
        let learn = stats["learn"];
        assert_eq!(learn.hitcount, 2);
        assert_eq!(learn.position, 0);
        let rust = stats["rust"];
        assert_eq!((rust.pos_of_phrase, rust.pos_in_phrase, rust.position), (1, 2, 4));
        assert!(rust.in_title);
        assert!(stats["book"].in_title && stats["book"].hitcount == 0);
        assert!(stats.values().any(|s| s.in_author));
    }

    #[test]
    fn links_split_by_host() {
        let base = Url::parse("http://a.com/x").unwrap();
        let links = vec!["/y".to_string(), "http://a.com/z".into(), "https://b.org/".into()];
        assert_eq!(count_links(&base, &links), (2, 1));
    }

    #[test]
    fn build_writes_a_readable_index() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::write(
            input.path().join("docs.jsonl"),
            concat!(
                r#"{"id":"a","title":"Index of /pub","body":"rust files","url":"http://a.com/pub/","timestamp":"2024-01-02T00:00:00Z"}"#,
                "\n",
                r#"{"id":"b","title":"Gallery","body":"rust pictures","url":"http://b.com/g/","lang":"de","images":[{"url":"http://b.com/i/1.png","label":"crab"}]}"#,
                "\n",
                r#"{"id":"a","title":"dup","body":"ignored","url":"http://c.com/"}"#,
                "\n"
            ),
        )
        .unwrap();

        let meta = build_index(input.path(), output.path()).unwrap();
        assert_eq!(meta.num_docs, 2);
        assert_eq!(meta.version, INDEX_VERSION);

        let paths = IndexPaths::new(output.path());
        let postings = load_postings_for_word(&paths, &WordHash::of("rust")).unwrap();
        assert_eq!(postings.len(), 2);
        let a = DocumentId::from_url(&Url::parse("http://a.com/pub/").unwrap());
        let b = DocumentId::from_url(&Url::parse("http://b.com/g/").unwrap());
        let pa = postings.iter().find(|p| p.doc_id == a).unwrap();
        assert!(pa.flags.contains(Flags::INDEX_OF));
        assert_eq!(pa.features.virtual_age, 19_724);
        let pb = postings.iter().find(|p| p.doc_id == b).unwrap();
        assert!(pb.flags.contains(Flags::HAS_IMAGE));
        assert_eq!(pb.language, Language::new("de"));

        let index = DiskIndex::open(output.path()).unwrap();
        let rec = index.resolve(&b).unwrap().unwrap();
        assert_eq!(rec.limage, 1);
        assert_eq!(rec.media[0].label, "crab");
        let text = fs::read_to_string(output.path().join(rec.text_path.unwrap())).unwrap();
        assert_eq!(text, "rust pictures");
    }

    #[test]
    fn media_counts_skip_unparsable_links() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::write(
            input.path().join("docs.jsonl"),
            concat!(
                r#"{"id":"m","title":"Media","body":"rust media","url":"http://m.com/","#,
                r#""images":[{"url":"http://m.com/1.png","label":"ok"},{"url":"not a url","label":"bad"}],"#,
                r#""audio":[{"url":"::","label":"bad"}]}"#,
                "\n"
            ),
        )
        .unwrap();
        build_index(input.path(), output.path()).unwrap();

        let index = DiskIndex::open(output.path()).unwrap();
        let id = DocumentId::from_url(&Url::parse("http://m.com/").unwrap());
        let rec = index.resolve(&id).unwrap().unwrap();
        assert_eq!((rec.limage, rec.laudio), (1, 0));
        assert_eq!(rec.media.len(), 1);
        let postings = load_postings_for_word(&IndexPaths::new(output.path()), &WordHash::of("rust")).unwrap();
        assert!(postings[0].flags.contains(Flags::HAS_IMAGE));
        assert!(!postings[0].flags.contains(Flags::HAS_AUDIO));
    }
}
