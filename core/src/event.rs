use crate::config::SearchConfig;
use crate::error::Result;
use crate::fetcher::{FetcherStats, ResultEntry, ResultFetcher};
use crate::index::{DocumentRecord, MetadataRepository, TermIndex};
use crate::navigator::NavigatorItem;
use crate::posting::Posting;
use crate::query::{CacheStrategy, QueryFingerprint, QueryParams};
use crate::ranking::{RankingProcess, RankingStats};
use crate::snippet::{MediaSnippet, SnippetLoader};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What a remote peer answered for a query.
#[derive(Debug, Clone, Default)]
pub struct PeerResponse {
    pub postings: Vec<Posting>,
    /// Metadata of the documents the postings refer to.
    pub records: Vec<DocumentRecord>,
    /// Total hits the peer knows of, possibly more than it sent.
    pub resource_size: usize,
}

/// A remote index answering queries. Each peer is one feeder of an event.
pub trait RemoteSearch: Send + Sync {
    fn peer_name(&self) -> &str;
    fn search(&self, query: &QueryParams) -> Result<PeerResponse>;
}

/// Collaborators shared by every search event.
#[derive(Clone)]
pub struct SearchContext {
    pub terms: Arc<dyn TermIndex>,
    pub metadata: Arc<dyn MetadataRepository>,
    pub loader: Arc<dyn SnippetLoader>,
    pub config: SearchConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventNavigators {
    pub hosts: Vec<NavigatorItem>,
    pub authors: Vec<NavigatorItem>,
    pub topics: Vec<NavigatorItem>,
    pub namespaces: Vec<NavigatorItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub ranking: RankingStats,
    pub results: FetcherStats,
    pub age_ms: u64,
}

/// One query's ranking process and result pipeline, cached across page requests.
pub struct SearchEvent {
    fingerprint: QueryFingerprint,
    ranking: Arc<RankingProcess>,
    fetcher: Arc<ResultFetcher>,
    terms: Arc<dyn TermIndex>,
    created: Instant,
    last_access: Mutex<Instant>,
    ttl: Duration,
}

impl SearchEvent {
    /// Start feeding the local index and every peer, then deploy the first
    /// result workers. Without peers the local search completes before this
    /// returns.
    pub fn new(query: QueryParams, ctx: &SearchContext, peers: Vec<Arc<dyn RemoteSearch>>) -> Arc<Self> {
        let fingerprint = query.fingerprint();
        let query = Arc::new(query);
        let ranking = Arc::new(RankingProcess::new(
            Arc::clone(&query),
            &ctx.config,
            Arc::clone(&ctx.terms),
            Arc::clone(&ctx.metadata),
            1 + peers.len(),
        ));
        tracing::info!(%fingerprint, query = %query.query_string, peers = peers.len(), "search event created");

        if peers.is_empty() {
            ranking.run_local_search();
        } else {
            let local = Arc::clone(&ranking);
            if let Err(e) = thread::Builder::new().name("local-feeder".into()).spawn(move || local.run_local_search()) {
                tracing::warn!(error = %e, "failed to spawn local feeder, searching inline");
                ranking.run_local_search();
            }
            for peer in peers {
                let (feeder, metadata, q) = (Arc::clone(&ranking), Arc::clone(&ctx.metadata), Arc::clone(&query));
                let spawned = thread::Builder::new()
                    .name(format!("remote-feeder-{}", peer.peer_name()))
                    .spawn(move || feed_remote(&feeder, metadata.as_ref(), peer.as_ref(), &q));
                if let Err(e) = spawned {
                    tracing::warn!(error = %e, "failed to spawn remote feeder");
                    ranking.one_feeder_terminated();
                }
            }
        }

        let fetcher = Arc::new(ResultFetcher::new(Arc::clone(&ranking), ctx.config.clone(), Arc::clone(&ctx.loader), Arc::clone(&ctx.terms)));
        let workers = if query.strategy == CacheStrategy::FetchAndVerify { ctx.config.max_workers } else { ctx.config.offline_workers };
        fetcher.deploy_workers(workers.min(query.items_per_page).max(1));

        let now = Instant::now();
        Arc::new(SearchEvent {
            fingerprint,
            ranking,
            fetcher,
            terms: Arc::clone(&ctx.terms),
            created: now,
            last_access: Mutex::new(now),
            ttl: ctx.config.event_ttl(),
        })
    }

    pub fn fingerprint(&self) -> &QueryFingerprint { &self.fingerprint }

    pub fn query(&self) -> Arc<QueryParams> { self.fetcher.query() }

    pub fn ranking(&self) -> &Arc<RankingProcess> { &self.ranking }

    pub fn fetcher(&self) -> &Arc<ResultFetcher> { &self.fetcher }

    /// Replace the paging of the cached query. Ignored unless `query` has
    /// this event's fingerprint.
    pub fn update_query(&self, query: QueryParams) -> bool {
        if query.fingerprint() != self.fingerprint {
            return false;
        }
        self.fetcher.set_query(Arc::new(query));
        true
    }

    pub fn one_result(&self, index: usize) -> Option<ResultEntry> {
        self.touch();
        self.fetcher.one_result(index)
    }

    pub fn one_image(&self, index: usize) -> Option<MediaSnippet> {
        self.touch();
        self.fetcher.one_image(index)
    }

    pub fn complete_results(&self, wait: Duration) -> Vec<ResultEntry> {
        self.touch();
        self.fetcher.complete_results(wait)
    }

    pub fn host_navigator(&self, max: usize) -> Vec<NavigatorItem> { self.ranking.host_navigator(max) }
    pub fn author_navigator(&self, max: usize) -> Vec<NavigatorItem> { self.ranking.author_navigator(max) }
    pub fn topic_navigator(&self, max: usize) -> Vec<NavigatorItem> { self.ranking.topic_navigator(max) }
    pub fn namespace_navigator(&self, max: usize) -> Vec<NavigatorItem> { self.ranking.namespace_navigator(max) }

    pub fn navigators(&self, max: usize) -> EventNavigators {
        EventNavigators {
            hosts: self.host_navigator(max),
            authors: self.author_navigator(max),
            topics: self.topic_navigator(max),
            namespaces: self.namespace_navigator(max),
        }
    }

    pub fn stats(&self) -> EventStats {
        EventStats { ranking: self.ranking.stats(), results: self.fetcher.stats(), age_ms: self.created.elapsed().as_millis() as u64 }
    }

    pub fn touch(&self) { *self.last_access.lock() = Instant::now(); }

    pub fn is_expired(&self) -> bool { self.last_access.lock().elapsed() >= self.ttl }

    /// Stop the workers and drop the references of documents whose snippet
    /// could not be verified. Returns the number of references removed.
    pub fn cleanup(&self) -> usize {
        self.fetcher.abort();
        let query = self.query();
        let mut removed = 0;
        for id in self.fetcher.failed_ids() {
            for word in query.include.iter().chain(query.exclude.iter()) {
                match self.terms.remove(word, &id) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(doc = %id, error = %e, "failed to remove reference"),
                }
            }
        }
        if removed > 0 {
            tracing::info!(fingerprint = %self.fingerprint, removed, "removed references of failed documents");
        }
        removed
    }
}

fn feed_remote(ranking: &RankingProcess, metadata: &dyn MetadataRepository, peer: &dyn RemoteSearch, query: &QueryParams) {
    let start = Instant::now();
    match peer.search(query) {
        Ok(response) => {
            let mut stored = 0;
            for record in response.records {
                match metadata.store(record) {
                    Ok(()) => stored += 1,
                    Err(e) => tracing::warn!(peer = peer.peer_name(), error = %e, "failed to store remote record"),
                }
            }
            let postings = response.postings.len();
            ranking.add(response.postings, false, Some(response.resource_size));
            tracing::info!(
                peer = peer.peer_name(),
                postings,
                stored,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "remote search finished"
            );
        }
        Err(e) => tracing::warn!(peer = peer.peer_name(), error = %e, "remote search failed"),
    }
    ranking.one_feeder_terminated();
}

/// Search events by query fingerprint. Expired events are evicted whenever a
/// new event is requested.
#[derive(Default)]
pub struct SearchEventCache {
    events: Mutex<HashMap<QueryFingerprint, Arc<SearchEvent>>>,
}

impl SearchEventCache {
    pub fn new() -> Self { Self::default() }

    /// The cached event for this query, or a new one. A cached event takes
    /// over the paging of `query`.
    pub fn get_or_create(&self, query: QueryParams, ctx: &SearchContext, peers: Vec<Arc<dyn RemoteSearch>>) -> Arc<SearchEvent> {
        self.cleanup_events(false);
        let fingerprint = query.fingerprint();
        let cached = self.events.lock().get(&fingerprint).cloned();
        if let Some(event) = cached {
            event.update_query(query);
            event.touch();
            return event;
        }
        let event = SearchEvent::new(query, ctx, peers);
        let winner = Arc::clone(self.events.lock().entry(fingerprint).or_insert_with(|| Arc::clone(&event)));
        if !Arc::ptr_eq(&winner, &event) {
            tracing::debug!(fingerprint = %event.fingerprint(), "concurrent event creation lost, discarding");
            event.cleanup();
            winner.touch();
        }
        winner
    }

    pub fn get(&self, fingerprint: &QueryFingerprint) -> Option<Arc<SearchEvent>> {
        let event = self.events.lock().get(fingerprint).cloned()?;
        event.touch();
        Some(event)
    }

    /// Evict expired events, or every event with `all`. Returns how many were evicted.
    pub fn cleanup_events(&self, all: bool) -> usize {
        let evicted: Vec<Arc<SearchEvent>> = {
            let mut events = self.events.lock();
            let keys: Vec<QueryFingerprint> = events.iter().filter(|(_, e)| all || e.is_expired()).map(|(k, _)| k.clone()).collect();
            keys.iter().filter_map(|k| events.remove(k)).collect()
        };
        for event in &evicted {
            tracing::info!(fingerprint = %event.fingerprint(), "search event evicted");
            event.cleanup();
        }
        evicted.len()
    }

    pub fn invalidate(&self, fingerprint: &QueryFingerprint) -> bool {
        let Some(event) = self.events.lock().remove(fingerprint) else { return false };
        event.cleanup();
        true
    }

    pub fn invalidate_all(&self) -> usize { self.cleanup_events(true) }

    pub fn len(&self) -> usize { self.events.lock().len() }

    pub fn is_empty(&self) -> bool { self.events.lock().is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docid::WordHash;
    use crate::index::InvertedIndex;
    use crate::posting::Features;
    use crate::snippet::TextFileLoader;
    use url::Url;

    fn context(index: &Arc<InvertedIndex>, config: SearchConfig) -> SearchContext {
        SearchContext { terms: index.clone(), metadata: index.clone(), loader: Arc::new(TextFileLoader::new("/nonexistent")), config }
    }

    fn index_with(urls: &[&str]) -> Arc<InvertedIndex> {
        let index = Arc::new(InvertedIndex::new());
        for (i, u) in urls.iter().enumerate() {
            let record = DocumentRecord::new(Url::parse(u).unwrap(), format!("Doc {i}"));
            index.add_posting(Posting::new(record.id, WordHash::of("rust"), Features { hitcount: 1 + i as u32, ..Default::default() }));
            index.add_document(record);
        }
        index
    }

    struct Peer {
        records: Vec<DocumentRecord>,
    }

    impl RemoteSearch for Peer {
        fn peer_name(&self) -> &str { "peer-a" }

        fn search(&self, _query: &QueryParams) -> Result<PeerResponse> {
            let postings = self
                .records
                .iter()
                .map(|r| Posting::new(r.id, WordHash::of("rust"), Features { hitcount: 9, ..Default::default() }))
                .collect();
            Ok(PeerResponse { postings, records: self.records.clone(), resource_size: 42 })
        }
    }

    #[test]
    fn cache_reuses_event_across_pages() {
        let index = index_with(&["http://a.com/1", "http://b.com/1"]);
        let ctx = context(&index, SearchConfig::default());
        let cache = SearchEventCache::new();
        let first = cache.get_or_create(QueryParams::builder("rust").paging(0, 1).build().unwrap(), &ctx, Vec::new());
        let second = cache.get_or_create(QueryParams::builder("rust").paging(1, 1).build().unwrap(), &ctx, Vec::new());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.query().offset, 1);
        assert_eq!(cache.len(), 1);
        assert!(second.one_result(1).is_some());
    }

    #[test]
    fn expired_events_are_evicted() {
        let index = index_with(&["http://a.com/1"]);
        let ctx = context(&index, SearchConfig { event_ttl_ms: 0, ..SearchConfig::default() });
        let cache = SearchEventCache::new();
        let event = cache.get_or_create(QueryParams::builder("rust").build().unwrap(), &ctx, Vec::new());
        assert_eq!(cache.cleanup_events(false), 1);
        assert!(cache.get(event.fingerprint()).is_none());
    }

    #[test]
    fn concurrent_requests_share_one_event() {
        let index = index_with(&["http://a.com/1", "http://b.com/1"]);
        let ctx = context(&index, SearchConfig::default());
        let cache = SearchEventCache::new();
        let barrier = std::sync::Barrier::new(8);
        let events: Vec<Arc<SearchEvent>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_create(QueryParams::builder("rust").build().unwrap(), &ctx, Vec::new())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(cache.len(), 1);
        let cached = cache.get(events[0].fingerprint()).unwrap();
        assert!(events.iter().all(|e| Arc::ptr_eq(e, &cached)));
        assert!(cached.one_result(0).is_some());
    }

    #[test]
    fn invalidate_drops_only_the_named_event() {
        let index = index_with(&["http://a.com/1"]);
        let ctx = context(&index, SearchConfig::default());
        let cache = SearchEventCache::new();
        let rust = cache.get_or_create(QueryParams::builder("rust").build().unwrap(), &ctx, Vec::new());
        let other = cache.get_or_create(QueryParams::builder("rust systems").build().unwrap(), &ctx, Vec::new());
        assert!(cache.invalidate(rust.fingerprint()));
        assert!(!cache.invalidate(rust.fingerprint()));
        assert!(cache.get(rust.fingerprint()).is_none());
        assert!(cache.get(other.fingerprint()).is_some());
    }

    #[test]
    fn remote_records_are_stored_before_ranking() {
        let index = index_with(&["http://a.com/1"]);
        let ctx = context(&index, SearchConfig::default());
        let remote = DocumentRecord::new(Url::parse("http://remote.org/x").unwrap(), "Remote doc");
        let peer: Arc<dyn RemoteSearch> = Arc::new(Peer { records: vec![remote.clone()] });
        let event = SearchEvent::new(QueryParams::builder("rust").build().unwrap(), &ctx, vec![peer]);
        let results = event.complete_results(Duration::from_secs(5));
        assert!(results.iter().any(|r| r.record.id == remote.id));
        let stats = event.stats();
        assert_eq!(stats.ranking.remote_peer_count, 1);
        assert_eq!(stats.ranking.remote_resource_size, 42);
        assert!(index.resolve(&remote.id).unwrap().is_some());
    }
}
