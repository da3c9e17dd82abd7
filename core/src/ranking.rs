use crate::config::SearchConfig;
use crate::docid::{DocumentId, SiteId};
use crate::index::{DocumentRecord, MetadataRepository, TermIndex};
use crate::navigator::{Navigator, NavigatorItem};
use crate::order::ReferenceOrder;
use crate::posting::{Flags, Posting};
use crate::profile::ContentDomain;
use crate::query::{Navigators, QueryParams};
use crate::stack::RankingStack;
use crate::tokenizer;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

/// Title words that never make a useful topic.
const TOPIC_NOISE: &[&str] = &[
    "http", "html", "php", "ftp", "www", "com", "org", "net", "gov", "edu", "index", "home", "page", "for", "usage", "the", "and",
    "zum", "der", "die", "das", "und", "zur", "bzw", "mit", "blog", "wiki", "aus", "bei", "off",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Feeders are still adding postings.
    Collecting,
    /// Feeding finished; candidates remain.
    Draining,
    Exhausted,
}

/// A candidate that passed every constraint, with its resolved metadata.
#[derive(Debug, Clone)]
pub struct RankedDocument {
    pub record: DocumentRecord,
    pub posting: Posting,
    /// Score the candidate was admitted with.
    pub score: i64,
}

/// Counters for "N of M results" reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RankingStats {
    pub local_resource_size: usize,
    pub remote_resource_size: usize,
    pub local_count: usize,
    pub remote_count: usize,
    pub remote_peer_count: usize,
    pub misses: usize,
    pub handed_over: usize,
    pub stack_size: usize,
    pub phase: Phase,
}

/// Collects postings from every feeder of one query, filters and scores them
/// and hands out the best resolved documents.
pub struct RankingProcess {
    query: Arc<QueryParams>,
    strict_normalization: bool,
    order: Arc<ReferenceOrder>,
    stack: RankingStack<Posting>,
    metadata: Arc<dyn MetadataRepository>,
    terms: Arc<dyn TermIndex>,
    feeders: AtomicUsize,
    /// Every document id ever admitted, for deduplication across feeders.
    url_hashes: Mutex<HashSet<DocumentId>>,
    handed_over: Mutex<HashSet<DocumentId>>,
    misses: Mutex<HashSet<DocumentId>>,
    flag_count: [AtomicU32; 32],
    local_resource_size: AtomicUsize,
    remote_resource_size: AtomicUsize,
    local_count: AtomicUsize,
    remote_count: AtomicUsize,
    remote_peer_count: AtomicUsize,
    /// Time spent in metadata resolution, in microseconds.
    resolve_micros: AtomicU64,
    /// Candidate count per site plus one document of the site to resolve its host name.
    host_navigator: Mutex<HashMap<SiteId, (u32, DocumentId)>>,
    author_navigator: Mutex<Navigator>,
    namespace_navigator: Mutex<Navigator>,
    topics: Mutex<Navigator>,
}

impl RankingProcess {
    pub fn new(
        query: Arc<QueryParams>,
        config: &SearchConfig,
        terms: Arc<dyn TermIndex>,
        metadata: Arc<dyn MetadataRepository>,
        feeders: usize,
    ) -> Self {
        let bucket_capacity = if query.special_rights { config.double_domain_capacity_special } else { config.double_domain_capacity };
        RankingProcess {
            order: Arc::new(ReferenceOrder::new(query.profile.clone(), query.language)),
            stack: RankingStack::new(Some(config.max_results_preparation), bucket_capacity),
            strict_normalization: config.strict_normalization,
            query,
            metadata,
            terms,
            feeders: AtomicUsize::new(feeders),
            url_hashes: Mutex::new(HashSet::new()),
            handed_over: Mutex::new(HashSet::new()),
            misses: Mutex::new(HashSet::new()),
            flag_count: std::array::from_fn(|_| AtomicU32::new(0)),
            local_resource_size: AtomicUsize::new(0),
            remote_resource_size: AtomicUsize::new(0),
            local_count: AtomicUsize::new(0),
            remote_count: AtomicUsize::new(0),
            remote_peer_count: AtomicUsize::new(0),
            resolve_micros: AtomicU64::new(0),
            host_navigator: Mutex::new(HashMap::new()),
            author_navigator: Mutex::new(Navigator::new()),
            namespace_navigator: Mutex::new(Navigator::new()),
            topics: Mutex::new(Navigator::new()),
        }
    }

    pub fn query(&self) -> &Arc<QueryParams> { &self.query }

    pub fn order(&self) -> &Arc<ReferenceOrder> { &self.order }

    /// Look up the query in the local term index and feed the result.
    /// Counts as one feeder.
    pub fn run_local_search(&self) {
        let start = Instant::now();
        match self.terms.lookup(&self.query.include, &self.query.exclude, self.query.max_distance) {
            Ok(postings) => {
                let n = postings.len();
                self.add(postings, true, Some(n));
                tracing::debug!(postings = n, elapsed_ms = start.elapsed().as_millis() as u64, "local search finished");
            }
            Err(e) => tracing::warn!(error = %e, "local term index lookup failed"),
        }
        self.one_feeder_terminated();
    }

    /// Normalize a batch of postings, filter them and push the survivors onto
    /// the ranking stack.
    pub fn add(&self, postings: Vec<Posting>, local: bool, full_resource_size: Option<usize>) {
        let batch = postings.len();
        let resource_size = full_resource_size.unwrap_or(batch);
        if local {
            self.local_resource_size.fetch_add(resource_size, Ordering::Relaxed);
        } else {
            self.remote_resource_size.fetch_add(resource_size, Ordering::Relaxed);
            self.remote_peer_count.fetch_add(1, Ordering::Relaxed);
        }
        if batch == 0 {
            return;
        }
        let normalized = self.order.normalize(postings);
        let accepted = if self.strict_normalization {
            let all: Vec<Posting> = normalized.iter().collect();
            all.into_iter().map(|p| self.admit(p)).filter(|admitted| *admitted).count()
        } else {
            normalized.iter().map(|p| self.admit(p)).filter(|admitted| *admitted).count()
        };
        if local {
            self.local_count.fetch_add(accepted, Ordering::Relaxed);
        } else {
            self.remote_count.fetch_add(accepted, Ordering::Relaxed);
        }
        tracing::debug!(batch, accepted, local, "added postings");
    }

    fn admit(&self, p: Posting) -> bool {
        for (bit, counter) in self.flag_count.iter().enumerate() {
            if p.flags.is_set(bit as u32) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Some(required) = self.query.constraint {
            let ok = if self.query.all_of_constraint { p.flags.contains(required) } else { p.flags.intersects(required) };
            if !ok {
                tracing::trace!(doc = %p.doc_id, "flag constraint rejected");
                return false;
            }
        }
        if !accepts_domain(self.query.content_domain, p.flags) {
            return false;
        }
        if !self.query.accepts_zone(p.doc_id.zone()) {
            return false;
        }
        let site = p.doc_id.site();
        if !self.query.sites.is_empty() && !self.query.sites.contains(&site) {
            return false;
        }
        if !self.url_hashes.lock().insert(p.doc_id) {
            return false;
        }
        if self.query.sites.is_empty() && self.query.navigators.contains(Navigators::HOSTS) {
            self.host_navigator.lock().entry(site).or_insert((0, p.doc_id)).0 += 1;
        }
        let Some(score) = self.order.cardinal(&p) else { return false };
        if self.stack.bottom_exceeds(score) {
            return false;
        }
        self.stack.push(p, score);
        true
    }

    /// Best resolved candidate, waiting up to `timeout` while feeders are
    /// still running. `None` with [`RankingProcess::feeding_is_finished`]
    /// false means "try again later".
    pub fn take_best(&self, skip_double_domain: bool, timeout: Duration) -> Option<RankedDocument> {
        let deadline = Instant::now() + timeout;
        loop {
            let ranked = self.stack.pop_best_wait(skip_double_domain, deadline, || self.feeding_is_finished())?;
            let id = ranked.item.doc_id;
            if self.handed_over.lock().contains(&id) {
                continue;
            }
            let start = Instant::now();
            let resolved = self.metadata.resolve(&id);
            self.resolve_micros.fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
            let record = match resolved {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::debug!(doc = %id, "metadata miss");
                    self.misses.lock().insert(id);
                    continue;
                }
                Err(e) => {
                    tracing::debug!(doc = %id, error = %e, "metadata resolve failed");
                    self.misses.lock().insert(id);
                    continue;
                }
            };
            if !self.accepts_record(&record) {
                continue;
            }
            if !self.handed_over.lock().insert(id) {
                continue;
            }
            return Some(RankedDocument { record, posting: ranked.item, score: ranked.score });
        }
    }

    fn accepts_record(&self, record: &DocumentRecord) -> bool {
        let query = &self.query;
        if !query.exclude.is_empty() {
            let mut words = tokenizer::word_hashes(&record.title);
            words.extend(tokenizer::url_components(record.url.as_str()).iter().filter_map(|c| tokenizer::term_hash(c)));
            if let Some(author) = &record.author {
                words.extend(tokenizer::word_hashes(author));
            }
            if words.iter().any(|w| query.exclude.contains(w)) {
                tracing::trace!(doc = %record.id, "excluded word in title, url or author");
                return false;
            }
        }
        if let Some(mask) = &query.url_mask {
            if !mask.is_match(record.url.as_str()) {
                return false;
            }
        }
        let wants_index_of = query.constraint.is_some_and(|c| c.contains(Flags::INDEX_OF));
        if !wants_index_of && record.title.to_lowercase().starts_with("index of") {
            self.remove_references_async(record.id);
            return false;
        }
        if query.content_domain.is_media() && record.media_count(query.content_domain) == 0 {
            return false;
        }
        if let Some(wanted) = &query.author {
            match &record.author {
                Some(a) if a.eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }
        if query.navigators.contains(Navigators::AUTHORS) {
            if let Some(author) = record.author.as_deref().filter(|a| !a.is_empty()) {
                self.author_navigator.lock().inc(author);
            }
        }
        if query.navigators.contains(Navigators::NAMESPACE) {
            if let Some(ns) = namespace_of(&record.url) {
                self.namespace_navigator.lock().inc(&ns);
            }
        }
        true
    }

    /// Directory listings pollute text results; drop their postings for the
    /// query words in the background.
    fn remove_references_async(&self, id: DocumentId) {
        let terms = Arc::clone(&self.terms);
        let words: Vec<_> = self.query.include.iter().copied().collect();
        let spawned = thread::Builder::new().name("remove-index-of".into()).spawn(move || {
            for w in &words {
                if let Err(e) = terms.remove(w, &id) {
                    tracing::warn!(doc = %id, error = %e, "failed to remove directory listing reference");
                }
            }
        });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn reference removal");
        }
    }

    /// Remove a candidate that turned out to be invalid after it was admitted.
    pub fn remove(&self, id: &DocumentId) -> bool { self.stack.remove(id).is_some() }

    pub fn one_feeder_terminated(&self) {
        let _ = self.feeders.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        self.stack.notify();
    }

    pub fn more_feeders(&self, n: usize) { self.feeders.fetch_add(n, Ordering::AcqRel); }

    pub fn feeding_is_finished(&self) -> bool { self.feeders.load(Ordering::Acquire) == 0 }

    pub fn phase(&self) -> Phase {
        if !self.feeding_is_finished() {
            Phase::Collecting
        } else if !self.stack.is_empty() {
            Phase::Draining
        } else {
            Phase::Exhausted
        }
    }

    /// Count the topic words of a materialized result's title.
    pub fn add_topics(&self, record: &DocumentRecord) {
        let words: Vec<String> = tokenizer::title_words(&record.title)
            .into_iter()
            .filter(|w| w.len() > 2 && w.chars().all(|c| c.is_ascii_lowercase()))
            .filter(|w| !TOPIC_NOISE.contains(&w.as_str()) && !tokenizer::is_stopword(w))
            .filter(|w| tokenizer::term_hash(w).map_or(true, |h| !self.query.include.contains(&h)))
            .collect();
        if words.is_empty() {
            return;
        }
        let mut topics = self.topics.lock();
        for w in &words {
            topics.inc(w);
        }
    }

    /// Current count of a topic word.
    pub fn topic_count(&self, word: &str) -> u32 { self.topics.lock().get(word) }

    /// The `max` most frequent topic words with their counts.
    pub fn top_topics(&self, max: usize) -> HashMap<String, u32> {
        self.topics.lock().top(max).into_iter().map(|item| (item.name, item.count)).collect()
    }

    /// Total time spent resolving candidates against the metadata repository.
    pub fn metadata_time(&self) -> Duration { Duration::from_micros(self.resolve_micros.load(Ordering::Relaxed)) }

    pub fn host_navigator(&self, max: usize) -> Vec<NavigatorItem> {
        if !self.query.navigators.contains(Navigators::HOSTS) {
            return Vec::new();
        }
        let sites: Vec<(u32, DocumentId)> = self.host_navigator.lock().values().copied().collect();
        let mut hosts = Navigator::new();
        for (count, sample) in sites {
            if let Ok(Some(record)) = self.metadata.resolve(&sample) {
                if let Some(host) = record.url.host_str() {
                    hosts.inc_by(host, count);
                }
            }
        }
        hosts.entries(max)
    }

    pub fn author_navigator(&self, max: usize) -> Vec<NavigatorItem> { self.author_navigator.lock().entries(max) }

    pub fn namespace_navigator(&self, max: usize) -> Vec<NavigatorItem> { self.namespace_navigator.lock().entries(max) }

    pub fn topic_navigator(&self, max: usize) -> Vec<NavigatorItem> {
        if !self.query.navigators.contains(Navigators::TOPICS) {
            return Vec::new();
        }
        self.topics.lock().entries(max)
    }

    /// Occurrences of each flag bit among all postings fed so far.
    pub fn flag_counts(&self) -> [u32; 32] { std::array::from_fn(|i| self.flag_count[i].load(Ordering::Relaxed)) }

    pub fn local_resource_size(&self) -> usize { self.local_resource_size.load(Ordering::Relaxed) }
    pub fn remote_resource_size(&self) -> usize { self.remote_resource_size.load(Ordering::Relaxed) }
    pub fn local_count(&self) -> usize { self.local_count.load(Ordering::Relaxed) }
    pub fn remote_count(&self) -> usize { self.remote_count.load(Ordering::Relaxed) }
    pub fn remote_peer_count(&self) -> usize { self.remote_peer_count.load(Ordering::Relaxed) }
    pub fn miss_count(&self) -> usize { self.misses.lock().len() }
    pub fn handed_over_count(&self) -> usize { self.handed_over.lock().len() }
    pub fn stack_size(&self) -> usize { self.stack.size() }

    pub fn stats(&self) -> RankingStats {
        RankingStats {
            local_resource_size: self.local_resource_size(),
            remote_resource_size: self.remote_resource_size(),
            local_count: self.local_count(),
            remote_count: self.remote_count(),
            remote_peer_count: self.remote_peer_count(),
            misses: self.miss_count(),
            handed_over: self.handed_over_count(),
            stack_size: self.stack_size(),
            phase: self.phase(),
        }
    }
}

fn accepts_domain(domain: ContentDomain, flags: Flags) -> bool {
    match domain {
        ContentDomain::Image => flags.contains(Flags::HAS_IMAGE),
        ContentDomain::Audio => flags.contains(Flags::HAS_AUDIO),
        ContentDomain::Video => flags.contains(Flags::HAS_VIDEO),
        ContentDomain::App => flags.contains(Flags::HAS_APP),
        ContentDomain::All | ContentDomain::Text => true,
    }
}

/// Wiki style namespace of the last path segment, e.g. `Category` in `/wiki/Category:Rust`.
fn namespace_of(url: &Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    let (ns, rest) = last.split_once(':')?;
    (!ns.is_empty() && !rest.is_empty() && ns.chars().all(char::is_alphabetic)).then(|| ns.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docid::{WordHash, Zone};
    use crate::index::InvertedIndex;
    use crate::posting::Features;

    fn url(s: &str) -> Url { Url::parse(s).unwrap() }

    fn fixture(docs: &[(&str, &str, u32, Flags)]) -> Arc<InvertedIndex> {
        let index = Arc::new(InvertedIndex::new());
        for &(u, title, hits, flags) in docs {
            let record = DocumentRecord::new(url(u), title);
            let p = Posting::new(record.id, WordHash::of("rust"), Features { hitcount: hits, ..Default::default() }).with_flags(flags);
            index.add_posting(p);
            index.add_document(record);
        }
        index
    }

    fn process(index: &Arc<InvertedIndex>, query: QueryParams) -> RankingProcess {
        let config = SearchConfig { strict_normalization: true, ..SearchConfig::default() };
        let rp = RankingProcess::new(Arc::new(query), &config, index.clone(), index.clone(), 1);
        rp.run_local_search();
        rp
    }

    fn drain(rp: &RankingProcess) -> Vec<String> {
        std::iter::from_fn(|| rp.take_best(false, Duration::from_millis(10))).map(|d| d.record.url.to_string()).collect()
    }

    #[test]
    fn any_of_and_all_of_constraints() {
        let index = fixture(&[
            ("http://a.com/1", "one", 1, Flags::HAS_IMAGE),
            ("http://b.com/1", "two", 2, Flags::HAS_IMAGE | Flags::HAS_AUDIO),
            ("http://c.com/1", "three", 3, Flags::empty()),
        ]);
        let q = QueryParams::builder("rust").constraint(Flags::HAS_IMAGE | Flags::HAS_AUDIO, false).build().unwrap();
        assert_eq!(drain(&process(&index, q)).len(), 2);
        let q = QueryParams::builder("rust").constraint(Flags::HAS_IMAGE | Flags::HAS_AUDIO, true).build().unwrap();
        assert_eq!(drain(&process(&index, q)), vec!["http://b.com/1"]);
    }

    #[test]
    fn flag_histogram_counts_every_posting() {
        let index = fixture(&[("http://a.com/1", "one", 1, Flags::HAS_IMAGE), ("http://b.com/1", "two", 2, Flags::HAS_IMAGE)]);
        let rp = process(&index, QueryParams::builder("rust").constraint(Flags::HAS_VIDEO, true).build().unwrap());
        assert_eq!(rp.flag_counts()[20], 2);
        assert_eq!(rp.local_count(), 0);
        assert_eq!(rp.local_resource_size(), 2);
        assert_eq!(rp.phase(), Phase::Exhausted);
    }

    #[test]
    fn directory_listings_are_dropped_and_removed() {
        let index = fixture(&[("http://a.com/pub/", "Index of /pub", 5, Flags::INDEX_OF), ("http://b.com/1", "Rust", 1, Flags::empty())]);
        let rp = process(&index, QueryParams::builder("rust").build().unwrap());
        assert_eq!(drain(&rp), vec!["http://b.com/1"]);
        let listing = DocumentId::from_url(&url("http://a.com/pub/"));
        let deadline = Instant::now() + Duration::from_secs(5);
        while index.postings_for(&WordHash::of("rust")).iter().any(|p| p.doc_id == listing) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(index.postings_for(&WordHash::of("rust")).iter().all(|p| p.doc_id != listing));
    }

    #[test]
    fn exclude_words_in_title_are_rejected() {
        let index = fixture(&[("http://a.com/1", "Rust and Java", 5, Flags::empty()), ("http://b.com/1", "Rust only", 1, Flags::empty())]);
        let java = tokenizer::term_hash("java").unwrap();
        let q = QueryParams::builder("rust").exclude_hashes([java]).build().unwrap();
        assert_eq!(drain(&process(&index, q)), vec!["http://b.com/1"]);
    }

    #[test]
    fn author_filter_and_navigator() {
        let index = Arc::new(InvertedIndex::new());
        for (u, author) in [("http://a.com/1", "Ann"), ("http://b.com/1", "Bob"), ("http://c.com/1", "ann")] {
            let mut record = DocumentRecord::new(url(u), "Rust");
            record.author = Some(author.into());
            index.add_posting(Posting::new(record.id, WordHash::of("rust"), Features { hitcount: 1, ..Default::default() }));
            index.add_document(record);
        }
        let q = QueryParams::builder("rust").author("ANN").navigators(Navigators::AUTHORS).build().unwrap();
        let rp = process(&index, q);
        assert_eq!(drain(&rp).len(), 2);
        let q = QueryParams::builder("rust").navigators(Navigators::AUTHORS).build().unwrap();
        let rp = process(&index, q);
        drain(&rp);
        let authors = rp.author_navigator(10);
        assert_eq!(authors.len(), 3);
    }

    #[test]
    fn host_navigator_counts_sites() {
        let index = fixture(&[
            ("http://a.com/1", "one", 1, Flags::empty()),
            ("http://a.com/2", "two", 2, Flags::empty()),
            ("http://b.com/1", "three", 3, Flags::empty()),
        ]);
        let rp = process(&index, QueryParams::builder("rust").navigators(Navigators::HOSTS).build().unwrap());
        let hosts = rp.host_navigator(10);
        assert_eq!(hosts[0], NavigatorItem { name: "a.com".into(), count: 2 });
        assert_eq!(hosts[1], NavigatorItem { name: "b.com".into(), count: 1 });
    }

    #[test]
    fn site_filter_limits_candidates() {
        let index = fixture(&[("http://a.com/1", "one", 1, Flags::empty()), ("https://b.com/1", "two", 2, Flags::empty())]);
        let rp = process(&index, QueryParams::builder("rust").site("b.com").build().unwrap());
        assert_eq!(drain(&rp), vec!["https://b.com/1"]);
    }

    #[test]
    fn topics_skip_query_words_and_noise() {
        let index = fixture(&[]);
        let rp = process(&index, QueryParams::builder("rust").navigators(Navigators::TOPICS).build().unwrap());
        rp.add_topics(&DocumentRecord::new(url("http://a.com/1"), "Rust compiler internals home page"));
        rp.add_topics(&DocumentRecord::new(url("http://a.com/2"), "The compiler book"));
        assert_eq!(rp.topic_count("compiler"), 2);
        assert_eq!(rp.topic_count("rust"), 0);
        assert_eq!(rp.topic_count("home"), 0);
        assert_eq!(rp.topic_navigator(1), vec![NavigatorItem { name: "compiler".into(), count: 2 }]);
    }

    #[test]
    fn top_topics_are_bounded() {
        let index = fixture(&[]);
        let rp = process(&index, QueryParams::builder("rust").build().unwrap());
        rp.add_topics(&DocumentRecord::new(url("http://a.com/1"), "compiler borrow lifetimes"));
        rp.add_topics(&DocumentRecord::new(url("http://a.com/2"), "compiler borrow"));
        rp.add_topics(&DocumentRecord::new(url("http://a.com/3"), "compiler"));
        let top = rp.top_topics(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top.get("compiler"), Some(&3));
        assert_eq!(top.get("borrow"), Some(&2));
        assert!(!top.contains_key("lifetimes"));
    }

    #[test]
    fn zone_mask_limits_candidates() {
        let index = fixture(&[("http://shop.de/1", "one", 1, Flags::empty()), ("http://shop.com/1", "two", 2, Flags::empty())]);
        let q = QueryParams::builder("rust").zone_mask(Zone::EuropeRussia.bit()).build().unwrap();
        let rp = process(&index, q);
        assert_eq!(rp.local_count(), 1);
        assert_eq!(drain(&rp), vec!["http://shop.de/1"]);

        let q = QueryParams::builder("rust").zone_mask(Zone::ALL_MASK & !Zone::EuropeRussia.bit()).build().unwrap();
        assert_eq!(drain(&process(&index, q)), vec!["http://shop.com/1"]);
    }

    #[test]
    fn url_mask_rejects_after_resolve() {
        let index = fixture(&[("http://a.com/docs/1", "one", 1, Flags::empty()), ("http://a.com/blog/1", "two", 2, Flags::empty())]);
        let q = QueryParams::builder("rust").url_mask(r"http://a\.com/docs/.*").build().unwrap();
        let rp = process(&index, q);
        // both pass admission, the mask applies to the resolved url
        assert_eq!(rp.local_count(), 2);
        assert_eq!(drain(&rp), vec!["http://a.com/docs/1"]);
        assert_eq!(rp.handed_over_count(), 1);
    }

    #[test]
    fn media_queries_need_resolved_media() {
        let index = Arc::new(InvertedIndex::new());
        for (u, images, hits) in [("http://a.com/gallery", 3, 1), ("http://b.com/claims", 0, 5)] {
            let mut record = DocumentRecord::new(url(u), "Pictures");
            record.limage = images;
            let p = Posting::new(record.id, WordHash::of("rust"), Features { hitcount: hits, ..Default::default() }).with_flags(Flags::HAS_IMAGE);
            index.add_posting(p);
            index.add_document(record);
        }
        let rp = process(&index, QueryParams::builder("rust").content_domain(ContentDomain::Image).build().unwrap());
        assert_eq!(rp.local_count(), 2);
        assert_eq!(drain(&rp), vec!["http://a.com/gallery"]);
    }

    #[test]
    fn special_rights_widen_site_buckets() {
        let docs: Vec<(String, u32)> = (0..30).map(|i| (format!("http://a.com/page/{i}"), i + 1)).collect();
        let fixture_docs: Vec<(&str, &str, u32, Flags)> = docs.iter().map(|(u, h)| (u.as_str(), "page", *h, Flags::empty())).collect();
        let index = fixture(&fixture_docs);
        let drain_skipping = |rp: &RankingProcess| std::iter::from_fn(|| rp.take_best(true, Duration::from_millis(10))).count();

        let normal = process(&index, QueryParams::builder("rust").build().unwrap());
        assert_eq!(drain_skipping(&normal), 1 + SearchConfig::default().double_domain_capacity);
        let special = process(&index, QueryParams::builder("rust").special_rights(true).build().unwrap());
        assert_eq!(drain_skipping(&special), 30);
    }

    #[test]
    fn metadata_time_excludes_waiting() {
        let index = fixture(&[]);
        let config = SearchConfig::default();
        let rp = RankingProcess::new(Arc::new(QueryParams::builder("rust").build().unwrap()), &config, index.clone(), index.clone(), 1);
        assert!(rp.take_best(true, Duration::from_millis(200)).is_none());
        assert!(rp.metadata_time() < Duration::from_millis(50));
    }

    #[test]
    fn namespaces_from_wiki_paths() {
        assert_eq!(namespace_of(&url("http://w.org/wiki/Category:Rust")), Some("Category".into()));
        assert_eq!(namespace_of(&url("http://w.org/wiki/Rust")), None);
    }
}
