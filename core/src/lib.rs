pub mod config;
pub mod docid;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod index;
pub mod navigator;
pub mod order;
pub mod persist;
pub mod pool;
pub mod posting;
pub mod profile;
pub mod query;
pub mod queue;
pub mod ranking;
pub mod snippet;
pub mod stack;
pub mod tokenizer;

pub use config::SearchConfig;
pub use docid::{DocumentId, SiteId, WordHash, Zone};
pub use error::{Result, SearchError};
pub use event::{EventNavigators, EventStats, PeerResponse, RemoteSearch, SearchContext, SearchEvent, SearchEventCache};
pub use fetcher::{FetcherStats, ResultEntry, ResultFetcher};
pub use index::{DocumentRecord, InvertedIndex, MediaLink, MetadataRepository, TermIndex};
pub use navigator::{Navigator, NavigatorItem};
pub use order::ReferenceOrder;
pub use persist::DiskIndex;
pub use posting::{FeatureRange, Features, Flags, Language, Posting};
pub use profile::{Coefficient, ContentDomain, RankingProfile};
pub use query::{CacheStrategy, Navigators, QueryFingerprint, QueryParams, QueryParamsBuilder};
pub use queue::{Ranked, RankedQueue, ResultList};
pub use ranking::{Phase, RankedDocument, RankingProcess, RankingStats};
pub use snippet::{MediaSnippet, Snippet, SnippetLoader, TextFileLoader, TextSnippet};
pub use stack::{Candidate, RankingStack};
