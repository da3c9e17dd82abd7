use crate::config::SearchConfig;
use crate::docid::DocumentId;
use crate::index::{DocumentRecord, TermIndex};
use crate::pool::WorkerPool;
use crate::profile::{Coefficient as C, ContentDomain};
use crate::query::{CacheStrategy, QueryParams};
use crate::queue::ResultList;
use crate::ranking::{Phase, RankedDocument, RankingProcess};
use crate::snippet::{MediaSnippet, Snippet, SnippetLoader, TextSnippet};
use crate::tokenizer;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

const COMPLETE_POLL: Duration = Duration::from_millis(20);
const IMAGE_POLL: Duration = Duration::from_millis(50);
/// Topic words that earn a post-ranking bonus.
const TOPIC_TOPLIST: usize = 10;

/// A materialized search result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEntry {
    pub record: DocumentRecord,
    pub snippet: Option<TextSnippet>,
    pub media: Vec<MediaSnippet>,
    /// Final score after post-ranking.
    pub score: i64,
    /// Score the candidate had on the ranking stack.
    pub ranking_score: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetcherStats {
    pub available: usize,
    pub images: usize,
    pub failed: usize,
    pub workers_alive: usize,
    pub metadata_ms: u64,
    pub snippet_ms: u64,
}

/// Worker pool turning ranked candidates into result entries.
pub struct ResultFetcher {
    ranking: Arc<RankingProcess>,
    query: RwLock<Arc<QueryParams>>,
    config: SearchConfig,
    loader: Arc<dyn SnippetLoader>,
    terms: Arc<dyn TermIndex>,
    results: ResultList<ResultEntry>,
    images: ResultList<MediaSnippet>,
    seen_images: Mutex<HashSet<Url>>,
    failed: Mutex<HashMap<DocumentId, String>>,
    pool: WorkerPool,
    /// Result count workers try to reach, raised when a caller reads past it.
    target: AtomicUsize,
    abort: AtomicBool,
    snippet_ms: AtomicU64,
}

impl ResultFetcher {
    pub fn new(ranking: Arc<RankingProcess>, config: SearchConfig, loader: Arc<dyn SnippetLoader>, terms: Arc<dyn TermIndex>) -> Self {
        let query = Arc::clone(ranking.query());
        ResultFetcher {
            target: AtomicUsize::new(query.needed_results()),
            query: RwLock::new(query),
            results: ResultList::new(config.result_capacity),
            images: ResultList::new(None),
            seen_images: Mutex::new(HashSet::new()),
            failed: Mutex::new(HashMap::new()),
            pool: WorkerPool::new("result-worker", config.max_workers),
            abort: AtomicBool::new(false),
            snippet_ms: AtomicU64::new(0),
            ranking,
            config,
            loader,
            terms,
        }
    }

    pub fn query(&self) -> Arc<QueryParams> { Arc::clone(&self.query.read()) }

    /// Swap in a query with the same fingerprint, e.g. for the next page.
    pub fn set_query(&self, query: Arc<QueryParams>) {
        self.raise_target(query.needed_results());
        *self.query.write() = query;
    }

    pub fn ranking(&self) -> &Arc<RankingProcess> { &self.ranking }

    fn raise_target(&self, n: usize) { self.target.fetch_max(n, Ordering::AcqRel); }

    fn needed(&self) -> usize {
        let lookahead = if self.query().content_domain == ContentDomain::Image { self.config.image_lookahead } else { self.config.result_lookahead };
        self.target.load(Ordering::Acquire).saturating_add(lookahead)
    }

    /// Start up to `count` workers. Returns how many were started.
    pub fn deploy_workers(self: &Arc<Self>, count: usize) -> usize {
        let mut started = 0;
        for _ in 0..count {
            let this = Arc::clone(self);
            let deadline = Instant::now() + self.config.worker_lifetime();
            if !self.pool.spawn_within(count, move || this.work(deadline)) {
                break;
            }
            started += 1;
        }
        if started > 0 {
            tracing::debug!(started, needed = self.needed(), "deployed result workers");
        }
        started
    }

    fn aborted(&self) -> bool { self.abort.load(Ordering::Acquire) }

    fn work(&self, deadline: Instant) {
        let mut produced = 0usize;
        while !self.aborted() && self.results.size_available() < self.needed() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.config.take_timeout().min(deadline - now);
            let Some(doc) = self.ranking.take_best(true, wait) else {
                if self.ranking.feeding_is_finished() {
                    break;
                }
                continue;
            };
            if self.failed.lock().contains_key(&doc.record.id) {
                continue;
            }
            let query = self.query();
            let start = Instant::now();
            let fetched = self.fetch(&doc, &query);
            self.snippet_ms.fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
            let Some((snippet, media)) = fetched else { continue };

            self.ranking.add_topics(&doc.record);
            let base = self.ranking.order().cardinal(&doc.posting).unwrap_or(doc.score);
            let score = base + self.post_ranking(&doc.record, &query);
            if query.content_domain == ContentDomain::Image {
                let mut seen = self.seen_images.lock();
                for m in &media {
                    if seen.insert(m.href.clone()) {
                        self.images.push(m.clone(), score + m.ranking);
                    }
                }
            }
            self.results.push(ResultEntry { record: doc.record, snippet, media, score, ranking_score: doc.score }, score);
            produced += 1;
        }
        tracing::debug!(produced, "result worker finished");
        self.results.notify();
        self.images.notify();
    }

    /// Snippet and media for a candidate; `None` drops the candidate.
    fn fetch(&self, doc: &RankedDocument, query: &QueryParams) -> Option<(Option<TextSnippet>, Vec<MediaSnippet>)> {
        let domain = query.content_domain;
        if query.strategy == CacheStrategy::NoFetch && !domain.is_media() {
            return Some((None, Vec::new()));
        }
        match self.loader.fetch_snippet(&doc.record, &query.words, domain, query.strategy) {
            Ok(Snippet::Text(snippet)) => {
                if let Some(matcher) = &query.snippet_matcher {
                    if !matcher.is_match(&snippet.line) {
                        return None;
                    }
                }
                Some((Some(snippet), Vec::new()))
            }
            Ok(Snippet::Media(media)) => Some((None, media)),
            Err(e) if query.strategy == CacheStrategy::FetchAndVerify => {
                self.register_failure(&doc.record.id, &query, e.to_string());
                None
            }
            Err(e) => {
                tracing::info!(doc = %doc.record.id, error = %e, "no snippet, keeping result");
                Some((None, Vec::new()))
            }
        }
    }

    fn register_failure(&self, id: &DocumentId, query: &QueryParams, reason: String) {
        tracing::info!(doc = %id, %reason, "snippet fetch failed");
        self.failed.lock().insert(*id, reason);
        if self.config.delete_if_snippet_fail {
            for word in &query.include {
                if let Err(e) = self.terms.remove(word, id) {
                    tracing::warn!(doc = %id, error = %e, "failed to remove reference");
                }
            }
        }
    }

    /// Heuristics that only apply once a document is resolved.
    pub fn post_ranking(&self, record: &DocumentRecord, query: &QueryParams) -> i64 {
        let profile = &query.profile;
        let mut r = 0i64;
        match query.content_domain {
            ContentDomain::Image => r += (record.limage as i64) << profile.get(C::CatHasImage),
            ContentDomain::Audio => r += (record.laudio as i64) << profile.get(C::CatHasAudio),
            ContentDomain::Video => r += (record.lvideo as i64) << profile.get(C::CatHasVideo),
            ContentDomain::App => r += (record.lapp as i64) << profile.get(C::CatHasApp),
            ContentDomain::All | ContentDomain::Text => {}
        }
        if let Some(prefer) = &query.prefer {
            if prefer.is_match(record.url.as_str()) {
                r += 256i64 << profile.get(C::Prefer);
            }
            if prefer.is_match(&record.title) {
                r += 256i64 << profile.get(C::Prefer);
            }
        }

        // sets, so a word repeated in the title counts once
        let url_comps: HashSet<String> = tokenizer::url_components(record.url.as_str()).into_iter().collect();
        let title_words: HashSet<String> = tokenizer::title_words(&record.title).into_iter().collect();
        let toplist = self.ranking.top_topics(TOPIC_TOPLIST);
        for comp in &url_comps {
            if let Some(&tc) = toplist.get(comp) {
                r += (tc as i64) << profile.get(C::UrlCompInToplist);
            }
        }
        for word in &title_words {
            if let Some(&tc) = toplist.get(word) {
                r += (tc as i64) << profile.get(C::DescrCompInToplist);
            }
        }
        for word in query.words.iter().map(|w| w.to_lowercase()) {
            if url_comps.contains(&word) {
                r += 256i64 << profile.get(C::AppUrl);
            }
            if title_words.contains(&word) {
                r += 256i64 << profile.get(C::AppDcTitle);
            }
        }
        r
    }

    fn workers_needed(&self) -> bool { !self.pool.any_alive() && !self.aborted() && self.ranking.phase() != Phase::Exhausted }

    /// Result at rank `index`, waiting for workers to produce it. `None`
    /// when it did not arrive in time or no more results exist.
    pub fn one_result(self: &Arc<Self>, index: usize) -> Option<ResultEntry> {
        if let Some(e) = self.results.element(index) {
            return Some(e.item);
        }
        let per_page = self.query().items_per_page.max(1);
        let slice = Duration::from_millis(10 * (1 + (index % per_page) as u64));
        let deadline = Instant::now() + self.config.one_result_timeout();
        loop {
            if self.results.size_available() <= index && self.workers_needed() {
                self.raise_target(index.saturating_add(per_page));
                self.deploy_workers(per_page.min(20));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Some(e) = self.results.element_timeout(index, slice.min(deadline - now)) {
                return Some(e.item);
            }
            if !self.pool.any_alive() && (self.aborted() || self.ranking.phase() == Phase::Exhausted) {
                break;
            }
        }
        self.results.element(index).map(|e| e.item)
    }

    /// Image at rank `index` of the image stream.
    pub fn one_image(self: &Arc<Self>, index: usize) -> Option<MediaSnippet> {
        let deadline = Instant::now() + self.config.one_result_timeout();
        loop {
            if let Some(i) = self.images.element(index) {
                return Some(i.item);
            }
            if self.workers_needed() {
                self.raise_target(self.results.size_available().saturating_add(self.query().items_per_page.max(1)));
                self.deploy_workers(self.config.max_workers);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if let Some(i) = self.images.element_timeout(index, IMAGE_POLL.min(deadline - now)) {
                return Some(i.item);
            }
            if !self.pool.any_alive() && (self.aborted() || self.ranking.phase() == Phase::Exhausted) {
                return self.images.element(index).map(|i| i.item);
            }
        }
    }

    /// Wait up to `wait` for the current page to fill, then return every
    /// result available so far, best first.
    pub fn complete_results(&self, wait: Duration) -> Vec<ResultEntry> {
        let deadline = Instant::now() + wait;
        let needed = self.query().needed_results();
        while self.results.size_available() < needed && Instant::now() < deadline && self.pool.any_alive() {
            thread::sleep(COMPLETE_POLL);
        }
        self.results.list(self.results.size_available()).into_iter().map(|r| r.item).collect()
    }

    /// Stop workers at their next iteration.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
        self.results.notify();
        self.images.notify();
    }

    pub fn any_worker_alive(&self) -> bool { self.pool.any_alive() }

    pub fn failed_ids(&self) -> Vec<DocumentId> { self.failed.lock().keys().copied().collect() }

    pub fn failure_reason(&self, id: &DocumentId) -> Option<String> { self.failed.lock().get(id).cloned() }

    pub fn available(&self) -> usize { self.results.size_available() }

    pub fn stats(&self) -> FetcherStats {
        FetcherStats {
            available: self.results.size_available(),
            images: self.images.size_available(),
            failed: self.failed.lock().len(),
            workers_alive: self.pool.alive(),
            metadata_ms: self.ranking.metadata_time().as_millis() as u64,
            snippet_ms: self.snippet_ms.load(Ordering::Relaxed),
        }
    }
}
