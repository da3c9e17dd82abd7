use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode, Uri}, routing::{get, post}, Json, Router};
use rwi_core::{
    CacheStrategy, ContentDomain, DiskIndex, DocumentId, EventNavigators, EventStats, Language, MediaSnippet, MetadataRepository,
    Navigators, QueryParams, RankingProfile, SearchConfig, SearchContext, SearchEventCache, TextFileLoader,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const MAX_COUNT: usize = 100;
/// Deepest result a client may page to.
const MAX_OFFSET: usize = 10_000;
const NAVIGATOR_ENTRIES: usize = 10;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_count")]
    pub count: usize,
    pub contentdom: Option<String>,
    pub site: Option<String>,
    pub author: Option<String>,
    pub lang: Option<String>,
    pub prefer: Option<String>,
    pub urlmask: Option<String>,
    /// External ranking profile, e.g. `{hitcount=12,prefer=15}`.
    pub profile: Option<String>,
    /// Comma separated navigator names, or `all`.
    pub nav: Option<String>,
    pub strategy: Option<String>,
}
fn default_count() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    /// More candidates may still arrive for this query.
    pub partial: bool,
    pub results: Vec<SearchHit>,
    pub navigators: Option<EventNavigators>,
    pub stats: Option<EventStats>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: i64,
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
    pub author: Option<String>,
}

#[derive(Serialize)]
pub struct ImageResponse {
    pub query: String,
    pub took_s: f64,
    pub images: Vec<MediaSnippet>,
}

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<DiskIndex>,
    pub context: SearchContext,
    pub events: Arc<SearchEventCache>,
    pub admin_token: Option<String>,
}

type ApiError = (StatusCode, String);

pub fn build_app(index_dir: String) -> Result<Router> { build_app_with_config(index_dir, SearchConfig::default()) }

pub fn build_app_with_config(index_dir: String, config: SearchConfig) -> Result<Router> {
    let index = Arc::new(DiskIndex::open(&index_dir)?);
    let context = SearchContext {
        terms: index.clone(),
        metadata: index.clone(),
        loader: Arc::new(TextFileLoader::new(&index_dir)),
        config,
    };
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app_state = AppState { index, context, events: Arc::new(SearchEventCache::new()), admin_token };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/images", get(image_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/events", get(events_handler))
        .route("/events/invalidate", post(invalidate_handler))
        .with_state(app_state)
        .layer(cors);
    Ok(app)
}

fn bad_request(e: impl std::fmt::Display) -> ApiError { (StatusCode::BAD_REQUEST, e.to_string()) }

/// Translate request parameters into a query; malformed values are rejected.
pub fn query_from_params(params: &SearchParams, default_strategy: CacheStrategy) -> Result<QueryParams, ApiError> {
    if params.offset > MAX_OFFSET {
        return Err(bad_request(format!("offset must not exceed {MAX_OFFSET}")));
    }
    let count = params.count.clamp(1, MAX_COUNT);
    let domain = match &params.contentdom {
        Some(d) => ContentDomain::from_str(d).map_err(|_| bad_request(format!("unknown content domain {d}")))?,
        None => ContentDomain::Text,
    };
    let strategy = match &params.strategy {
        Some(s) => CacheStrategy::from_str(s).map_err(|_| bad_request(format!("unknown strategy {s}")))?,
        None => default_strategy,
    };
    let mut builder = QueryParams::builder(params.q.as_str()).content_domain(domain).paging(params.offset, count).strategy(strategy);
    if let Some(site) = params.site.as_deref().filter(|s| !s.is_empty()) {
        builder = builder.site(site);
    }
    if let Some(author) = params.author.as_deref().filter(|s| !s.is_empty()) {
        builder = builder.author(author);
    }
    if let Some(lang) = &params.lang {
        builder = builder.language(Language::new(lang));
    }
    if let Some(prefer) = &params.prefer {
        builder = builder.prefer(prefer.as_str());
    }
    if let Some(mask) = &params.urlmask {
        builder = builder.url_mask(mask.as_str());
    }
    if let Some(profile) = &params.profile {
        builder = builder.profile(RankingProfile::parse_external(profile).map_err(bad_request)?);
    }
    if let Some(nav) = &params.nav {
        builder = builder.navigators(Navigators::parse(nav));
    }
    builder.build().map_err(bad_request)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    let start = Instant::now();
    let query = query_from_params(&params, CacheStrategy::OfflineOnly)?;
    // Edge case: nothing left to search for after tokenizing
    if query.include.is_empty() {
        let elapsed = start.elapsed();
        return Ok(Json(SearchResponse { query: params.q, took_ms: elapsed.as_millis(), took_s: elapsed.as_secs_f64(), total_hits: 0, partial: false, results: vec![], navigators: None, stats: None }));
    }

    let (offset, count) = (query.offset, query.items_per_page);
    let page = tokio::task::spawn_blocking(move || {
        let event = state.events.get_or_create(query, &state.context, Vec::new());
        let hits: Vec<SearchHit> = (offset..offset.saturating_add(count))
            .map_while(|i| event.one_result(i))
            .map(|r| SearchHit {
                doc_id: r.record.id.to_string(),
                score: r.score,
                title: r.record.title,
                url: r.record.url.to_string(),
                snippet: r.snippet.map(|s| s.highlighted),
                author: r.record.author,
            })
            .collect();
        let stats = event.stats();
        (hits, event.navigators(NAVIGATOR_ENTRIES), stats)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let (results, navigators, stats) = page;

    let elapsed = start.elapsed();
    tracing::debug!(query = %params.q, hits = results.len(), took_ms = elapsed.as_millis() as u64, "search served");
    Ok(Json(SearchResponse {
        query: params.q,
        took_ms: elapsed.as_millis(),
        took_s: elapsed.as_secs_f64(),
        total_hits: stats.ranking.local_count + stats.ranking.remote_count,
        partial: stats.ranking.phase == rwi_core::Phase::Collecting,
        results,
        navigators: Some(navigators),
        stats: Some(stats),
    }))
}

pub async fn image_handler(State(state): State<AppState>, Query(mut params): Query<SearchParams>) -> Result<Json<ImageResponse>, ApiError> {
    let start = Instant::now();
    params.contentdom = Some(ContentDomain::Image.to_string());
    let query = query_from_params(&params, CacheStrategy::OfflineOnly)?;
    let (offset, count) = (query.offset, query.items_per_page);
    let images = tokio::task::spawn_blocking(move || {
        let event = state.events.get_or_create(query, &state.context, Vec::new());
        (offset..offset.saturating_add(count)).map_while(|i| event.one_image(i)).collect::<Vec<_>>()
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ImageResponse { query: params.q, took_s: start.elapsed().as_secs_f64(), images }))
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let id = DocumentId::from_str(&doc_id).map_err(bad_request)?;
    let record = state.index.resolve(&id).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let Some(record) = record else {
        return Err((StatusCode::NOT_FOUND, "not found".into()));
    };
    let mut obj = serde_json::json!({
        "doc_id": doc_id,
        "title": record.title,
        "url": record.url,
        "author": record.author,
        "language": record.language.as_str(),
    });
    if let Some(rel) = &record.text_path {
        if let Ok(text) = std::fs::read_to_string(state.index.root().join(rel)) {
            obj["text"] = serde_json::Value::String(text);
        }
    }
    Ok(Json(obj))
}

// --- Admin endpoints ---
async fn events_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(serde_json::json!({ "cached_events": state.events.len() })))
}

/// Without a query string every event is dropped; with search parameters
/// only the event those parameters map onto.
async fn invalidate_handler(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let params = match uri.query().filter(|q| !q.is_empty()) {
        Some(_) => Some(Query::<SearchParams>::try_from_uri(&uri).map_err(bad_request)?.0),
        None => None,
    };
    let removed = invalidate_events(&state.events, params.as_ref())?;
    tracing::info!(removed, query = params.as_ref().map(|p| p.q.as_str()), "search events invalidated");
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub fn invalidate_events(events: &SearchEventCache, params: Option<&SearchParams>) -> Result<usize, ApiError> {
    match params {
        Some(params) => {
            let query = query_from_params(params, CacheStrategy::OfflineOnly)?;
            Ok(usize::from(events.invalidate(&query.fingerprint())))
        }
        None => Ok(events.invalidate_all()),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(q: &str) -> SearchParams {
        SearchParams { q: q.into(), offset: 0, count: 10, contentdom: None, site: None, author: None, lang: None, prefer: None, urlmask: None, profile: None, nav: None, strategy: None }
    }

    #[test]
    fn params_map_onto_query() {
        let mut p = params("rust -java");
        p.count = 500;
        p.contentdom = Some("image".into());
        p.nav = Some("hosts,topics".into());
        p.strategy = Some("verify".into());
        let q = query_from_params(&p, CacheStrategy::OfflineOnly).unwrap();
        assert_eq!(q.items_per_page, MAX_COUNT);
        assert_eq!(q.content_domain, ContentDomain::Image);
        assert_eq!(q.navigators, Navigators::HOSTS | Navigators::TOPICS);
        assert_eq!(q.strategy, CacheStrategy::FetchAndVerify);
        assert_eq!(q.exclude.len(), 1);
    }

    #[test]
    fn malformed_params_are_rejected() {
        let mut p = params("rust");
        p.contentdom = Some("hologram".into());
        assert_eq!(query_from_params(&p, CacheStrategy::NoFetch).unwrap_err().0, StatusCode::BAD_REQUEST);
        let mut p = params("rust");
        p.urlmask = Some("(".into());
        assert_eq!(query_from_params(&p, CacheStrategy::NoFetch).unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn huge_offset_is_rejected() {
        let mut p = params("rust");
        p.offset = usize::MAX;
        assert_eq!(query_from_params(&p, CacheStrategy::NoFetch).unwrap_err().0, StatusCode::BAD_REQUEST);
        p.offset = MAX_OFFSET;
        assert_eq!(query_from_params(&p, CacheStrategy::NoFetch).unwrap().needed_results(), MAX_OFFSET + 10);
    }

    #[test]
    fn invalidate_by_query_keeps_other_events() {
        let index = Arc::new(rwi_core::InvertedIndex::new());
        let ctx = SearchContext { terms: index.clone(), metadata: index, loader: Arc::new(TextFileLoader::new("/nonexistent")), config: SearchConfig::default() };
        let events = SearchEventCache::new();
        for q in ["rust", "tokio"] {
            events.get_or_create(query_from_params(&params(q), CacheStrategy::OfflineOnly).unwrap(), &ctx, Vec::new());
        }

        let mut second_page = params("Rust");
        second_page.offset = 10;
        assert_eq!(invalidate_events(&events, Some(&second_page)).unwrap(), 1);
        assert_eq!(invalidate_events(&events, Some(&params("rust"))).unwrap(), 0);
        assert_eq!(events.len(), 1);
        assert_eq!(invalidate_events(&events, None).unwrap(), 1);
        assert!(events.is_empty());
    }
}
