use crate::docid::{DocumentId, WordHash};
use crate::error::{Result as SearchResult, SearchError};
use crate::index::{join_postings, DocumentRecord, MetadataRepository, TermIndex};
use crate::posting::Posting;
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_words: u32,
    pub created_at: String,
    pub version: u32,
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn docs(&self) -> PathBuf { self.root.join("docs.bin") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    fn postings_dir(&self) -> PathBuf { self.root.join("postings") }
    fn postings_file(&self, word: &WordHash) -> PathBuf { self.postings_dir().join(format!("{word}.postings.bin")) }
    pub fn texts_dir(&self) -> PathBuf { self.root.join("texts") }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Replace `path` atomically: readers see either the old or the new content.
fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)?;
    Ok(())
}

pub fn save_docs(paths: &IndexPaths, docs: &HashMap<DocumentId, DocumentRecord>) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_bytes(&paths.docs(), &bincode::serialize(docs)?)
}

pub fn load_docs(paths: &IndexPaths) -> Result<HashMap<DocumentId, DocumentRecord>> {
    let docs = bincode::deserialize(&read_bytes(&paths.docs())?)?;
    Ok(docs)
}

pub fn save_postings_for_word(paths: &IndexPaths, word: &WordHash, postings: &[Posting]) -> Result<()> {
    create_dir_all(paths.postings_dir())?;
    write_bytes(&paths.postings_file(word), &bincode::serialize(postings)?)
}

/// Postings of `word`; a word without a postings file has none.
pub fn load_postings_for_word(paths: &IndexPaths, word: &WordHash) -> Result<Vec<Posting>> {
    match read_bytes(&paths.postings_file(word)) {
        Ok(buf) => Ok(bincode::deserialize(&buf)?),
        Err(e) if e.downcast_ref::<std::io::Error>().is_some_and(|io| io.kind() == ErrorKind::NotFound) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(meta)?;
    write_bytes(&paths.meta(), json.as_bytes())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// File-backed term index and metadata store. Document metadata is held in
/// memory; postings are read per word on lookup.
pub struct DiskIndex {
    paths: IndexPaths,
    meta: MetaFile,
    docs: RwLock<HashMap<DocumentId, DocumentRecord>>,
    /// Serializes read-modify-write cycles on postings files. Readers need no
    /// lock since files are replaced by rename.
    write_lock: Mutex<()>,
}

impl DiskIndex {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let paths = IndexPaths::new(root);
        let meta = load_meta(&paths)?;
        let docs = load_docs(&paths)?;
        tracing::info!(root = %paths.root.display(), num_docs = meta.num_docs, num_words = meta.num_words, "opened index");
        Ok(DiskIndex { paths, meta, docs: RwLock::new(docs), write_lock: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path { &self.paths.root }

    pub fn meta(&self) -> &MetaFile { &self.meta }
}

impl TermIndex for DiskIndex {
    fn lookup(&self, include: &BTreeSet<WordHash>, exclude: &BTreeSet<WordHash>, max_distance: u32) -> SearchResult<Vec<Posting>> {
        let load = |w: &WordHash| load_postings_for_word(&self.paths, w).map_err(SearchError::storage);
        let containers = include.iter().map(load).collect::<SearchResult<Vec<_>>>()?;
        let mut excluded = HashSet::new();
        for w in exclude {
            excluded.extend(load(w)?.into_iter().map(|p| p.doc_id));
        }
        Ok(join_postings(containers, &excluded, max_distance))
    }

    fn remove(&self, word: &WordHash, doc: &DocumentId) -> SearchResult<bool> {
        let _guard = self.write_lock.lock();
        let mut postings = load_postings_for_word(&self.paths, word).map_err(SearchError::storage)?;
        let before = postings.len();
        postings.retain(|p| p.doc_id != *doc);
        if postings.len() == before {
            return Ok(false);
        }
        save_postings_for_word(&self.paths, word, &postings).map_err(SearchError::storage)?;
        Ok(true)
    }
}

impl MetadataRepository for DiskIndex {
    fn resolve(&self, id: &DocumentId) -> SearchResult<Option<DocumentRecord>> { Ok(self.docs.read().get(id).cloned()) }

    fn store(&self, record: DocumentRecord) -> SearchResult<()> {
        self.docs.write().insert(record.id, record);
        Ok(())
    }

    fn remove(&self, id: &DocumentId) -> SearchResult<bool> { Ok(self.docs.write().remove(id).is_some()) }
}
