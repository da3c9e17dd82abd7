use crate::docid::{DocumentId, WordHash};
use crate::error::Result;
use crate::posting::{Flags, Language, Posting};
use crate::profile::ContentDomain;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use url::Url;

/// A link to an embedded or referenced media resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaLink {
    pub domain: ContentDomain,
    pub url: Url,
    pub label: String,
}

/// Resolved metadata of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub url: Url,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    /// Content length in bytes.
    pub size: u64,
    /// Days since epoch.
    pub last_modified: u32,
    pub language: Language,
    pub flags: Flags,
    pub word_count: u32,
    pub limage: u32,
    pub laudio: u32,
    pub lvideo: u32,
    pub lapp: u32,
    /// Relative path to the stored full text for snippet extraction, e.g., texts/{id}.txt
    pub text_path: Option<String>,
    pub media: Vec<MediaLink>,
}

impl DocumentRecord {
    pub fn new(url: Url, title: impl Into<String>) -> Self {
        DocumentRecord {
            id: DocumentId::from_url(&url),
            url,
            title: title.into(),
            author: None,
            description: None,
            size: 0,
            last_modified: 0,
            language: Language::UNKNOWN,
            flags: Flags::empty(),
            word_count: 0,
            limage: 0,
            laudio: 0,
            lvideo: 0,
            lapp: 0,
            text_path: None,
            media: Vec::new(),
        }
    }

    /// Number of links of the given media kind.
    pub fn media_count(&self, domain: ContentDomain) -> u32 {
        match domain {
            ContentDomain::Image => self.limage,
            ContentDomain::Audio => self.laudio,
            ContentDomain::Video => self.lvideo,
            ContentDomain::App => self.lapp,
            ContentDomain::All | ContentDomain::Text => 0,
        }
    }
}

/// Reverse word index: word hash to postings.
pub trait TermIndex: Send + Sync {
    /// Postings of documents containing every include word and no exclude
    /// word, one joined posting per document.
    fn lookup(&self, include: &BTreeSet<WordHash>, exclude: &BTreeSet<WordHash>, max_distance: u32) -> Result<Vec<Posting>>;

    /// Drop the association of `word` with `doc`. Returns whether it existed.
    fn remove(&self, word: &WordHash, doc: &DocumentId) -> Result<bool>;
}

/// Store of resolved document metadata.
pub trait MetadataRepository: Send + Sync {
    fn resolve(&self, id: &DocumentId) -> Result<Option<DocumentRecord>>;
    fn store(&self, record: DocumentRecord) -> Result<()>;
    fn remove(&self, id: &DocumentId) -> Result<bool>;
}

/// Intersect per-word containers by document, joining the postings of each
/// document and dropping excluded or too widely spread matches.
pub fn join_postings(mut containers: Vec<Vec<Posting>>, excluded: &HashSet<DocumentId>, max_distance: u32) -> Vec<Posting> {
    if containers.is_empty() || containers.iter().any(Vec::is_empty) {
        return Vec::new();
    }
    containers.sort_by_key(Vec::len);
    let mut iter = containers.into_iter();
    let mut joined: HashMap<DocumentId, Posting> = HashMap::new();
    if let Some(first) = iter.next() {
        for p in first {
            joined.entry(p.doc_id).or_insert(p);
        }
    }
    let mut words = 1;
    for container in iter {
        words += 1;
        let by_doc: HashMap<DocumentId, Posting> = container.into_iter().map(|p| (p.doc_id, p)).collect();
        joined.retain(|id, _| by_doc.contains_key(id));
        for (id, p) in joined.iter_mut() {
            if let Some(other) = by_doc.get(id) {
                p.join(other);
            }
        }
    }
    let mut out: Vec<Posting> = joined
        .into_values()
        .filter(|p| !excluded.contains(&p.doc_id))
        .filter(|p| words < 2 || p.features.distance <= max_distance)
        .collect();
    out.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    out
}

/// In-memory term index and metadata store.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: RwLock<HashMap<WordHash, Vec<Posting>>>,
    docs: RwLock<HashMap<DocumentId, DocumentRecord>>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Add or replace the posting of its word for its document.
    pub fn add_posting(&self, posting: Posting) {
        let mut postings = self.postings.write();
        let list = postings.entry(posting.word).or_default();
        list.retain(|p| p.doc_id != posting.doc_id);
        list.push(posting);
    }

    pub fn add_document(&self, record: DocumentRecord) { self.docs.write().insert(record.id, record); }

    pub fn num_docs(&self) -> usize { self.docs.read().len() }

    pub fn num_words(&self) -> usize { self.postings.read().len() }

    pub fn postings_for(&self, word: &WordHash) -> Vec<Posting> {
        self.postings.read().get(word).cloned().unwrap_or_default()
    }
}

impl TermIndex for InvertedIndex {
    fn lookup(&self, include: &BTreeSet<WordHash>, exclude: &BTreeSet<WordHash>, max_distance: u32) -> Result<Vec<Posting>> {
        let postings = self.postings.read();
        let containers: Vec<Vec<Posting>> = include.iter().map(|w| postings.get(w).cloned().unwrap_or_default()).collect();
        let excluded: HashSet<DocumentId> =
            exclude.iter().filter_map(|w| postings.get(w)).flat_map(|l| l.iter().map(|p| p.doc_id)).collect();
        drop(postings);
        Ok(join_postings(containers, &excluded, max_distance))
    }

    fn remove(&self, word: &WordHash, doc: &DocumentId) -> Result<bool> {
        let mut postings = self.postings.write();
        let Some(list) = postings.get_mut(word) else { return Ok(false) };
        let before = list.len();
        list.retain(|p| p.doc_id != *doc);
        Ok(list.len() != before)
    }
}

impl MetadataRepository for InvertedIndex {
    fn resolve(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> { Ok(self.docs.read().get(id).cloned()) }

    fn store(&self, record: DocumentRecord) -> Result<()> {
        self.add_document(record);
        Ok(())
    }

    fn remove(&self, id: &DocumentId) -> Result<bool> { Ok(self.docs.write().remove(id).is_some()) }
}
