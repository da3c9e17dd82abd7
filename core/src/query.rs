use crate::docid::{SiteId, WordHash, Zone};
use crate::error::Result;
use crate::posting::{Flags, Language};
use crate::profile::{ContentDomain, RankingProfile};
use crate::tokenizer;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bitflags::bitflags;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use strum::{Display, EnumString};

/// How the snippet loader may obtain document content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CacheStrategy {
    /// Never call the loader; results carry no snippet.
    #[default]
    #[strum(serialize = "nofetch")]
    NoFetch,
    /// Local copies only; a missing snippet does not drop the result.
    #[strum(serialize = "offline")]
    OfflineOnly,
    /// The loader must produce a snippet that contains the query; otherwise the result is dropped.
    #[strum(serialize = "verify")]
    FetchAndVerify,
}

bitflags! {
    /// Facets collected while ranking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Navigators: u8 {
        const HOSTS = 1;
        const AUTHORS = 1 << 1;
        const TOPICS = 1 << 2;
        const NAMESPACE = 1 << 3;
    }
}

impl Navigators {
    /// Parses a comma separated list such as `hosts,authors`; `all` enables everything.
    pub fn parse(s: &str) -> Navigators {
        s.split(',').map(str::trim).fold(Navigators::empty(), |acc, name| match name {
            "all" => Navigators::all(),
            "hosts" => acc | Navigators::HOSTS,
            "authors" => acc | Navigators::AUTHORS,
            "topics" => acc | Navigators::TOPICS,
            "namespace" => acc | Navigators::NAMESPACE,
            _ => acc,
        })
    }
}

/// Identifies a query independent of its paging; key of the event cache.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint(String);

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl fmt::Debug for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "QueryFingerprint({})", self.0) }
}

/// Parsed query with every filter the ranking core applies.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub query_string: String,
    pub include: BTreeSet<WordHash>,
    pub exclude: BTreeSet<WordHash>,
    /// Raw query words, used for snippet extraction and highlighting.
    pub words: Vec<String>,
    pub content_domain: ContentDomain,
    /// Bit set of accepted [`Zone`]s.
    pub zone_mask: u8,
    pub site_host: Option<String>,
    pub sites: Vec<SiteId>,
    pub author: Option<String>,
    pub language: Option<Language>,
    pub url_mask: Option<Regex>,
    pub prefer: Option<Regex>,
    pub snippet_matcher: Option<Regex>,
    pub constraint: Option<Flags>,
    pub all_of_constraint: bool,
    pub max_distance: u32,
    pub offset: usize,
    pub items_per_page: usize,
    pub profile: RankingProfile,
    pub special_rights: bool,
    pub strategy: CacheStrategy,
    pub navigators: Navigators,
}

impl QueryParams {
    pub fn builder(query: impl Into<String>) -> QueryParamsBuilder { QueryParamsBuilder::new(query) }

    /// Results the caller needs to fill the requested page.
    pub fn needed_results(&self) -> usize { self.offset.saturating_add(self.items_per_page) }

    pub fn accepts_zone(&self, zone: Zone) -> bool { self.zone_mask & zone.bit() != 0 }

    pub fn fingerprint(&self) -> QueryFingerprint {
        let hashes = |set: &BTreeSet<WordHash>| set.iter().map(WordHash::as_str).collect::<String>();
        let pattern = |r: &Option<Regex>| r.as_ref().map(Regex::as_str).unwrap_or("").to_string();
        let key = [
            hashes(&self.include),
            hashes(&self.exclude),
            self.content_domain.to_string(),
            self.zone_mask.to_string(),
            self.profile.to_external_string(),
            pattern(&self.prefer),
            pattern(&self.url_mask),
            pattern(&self.snippet_matcher),
            self.site_host.clone().unwrap_or_default(),
            self.author.clone().unwrap_or_default(),
            self.language.map(|l| l.to_string()).unwrap_or_default(),
            self.constraint.map(|c| format!("{:x}:{}", c.bits(), self.all_of_constraint)).unwrap_or_default(),
            self.max_distance.to_string(),
            self.strategy.to_string(),
            self.navigators.bits().to_string(),
        ]
        .join("*");
        QueryFingerprint(URL_SAFE_NO_PAD.encode(md5::compute(key.as_bytes()).0))
    }
}

/// Builds [`QueryParams`]; patterns are compiled in [`QueryParamsBuilder::build`].
#[derive(Debug, Clone)]
pub struct QueryParamsBuilder {
    query_string: String,
    include: BTreeSet<WordHash>,
    exclude: BTreeSet<WordHash>,
    words: Vec<String>,
    content_domain: ContentDomain,
    zone_mask: u8,
    site: Option<String>,
    author: Option<String>,
    language: Option<Language>,
    url_mask: Option<String>,
    prefer: Option<String>,
    snippet_matcher: Option<String>,
    constraint: Option<(Flags, bool)>,
    max_distance: u32,
    offset: usize,
    items_per_page: usize,
    profile: Option<RankingProfile>,
    special_rights: bool,
    strategy: CacheStrategy,
    navigators: Navigators,
}

impl QueryParamsBuilder {
    /// Splits the query into include and exclude words; `-word` excludes.
    pub fn new(query: impl Into<String>) -> Self {
        let query_string = query.into();
        let mut include = BTreeSet::new();
        let mut exclude = BTreeSet::new();
        let mut words = Vec::new();
        for piece in query_string.split_whitespace() {
            match piece.strip_prefix('-') {
                Some(rest) => exclude.extend(tokenizer::tokenize(rest).into_iter().map(|(t, _)| WordHash::of(&t))),
                None => {
                    let terms = tokenizer::tokenize(piece);
                    if !terms.is_empty() {
                        words.push(piece.to_string());
                    }
                    include.extend(terms.into_iter().map(|(t, _)| WordHash::of(&t)));
                }
            }
        }
        QueryParamsBuilder {
            query_string,
            include,
            exclude,
            words,
            content_domain: ContentDomain::Text,
            zone_mask: Zone::ALL_MASK,
            site: None,
            author: None,
            language: None,
            url_mask: None,
            prefer: None,
            snippet_matcher: None,
            constraint: None,
            max_distance: u32::MAX,
            offset: 0,
            items_per_page: 10,
            profile: None,
            special_rights: false,
            strategy: CacheStrategy::NoFetch,
            navigators: Navigators::empty(),
        }
    }

    pub fn exclude_hashes(mut self, hashes: impl IntoIterator<Item = WordHash>) -> Self {
        self.exclude = hashes.into_iter().collect();
        self
    }

    pub fn content_domain(mut self, domain: ContentDomain) -> Self {
        self.content_domain = domain;
        self
    }

    pub fn zone_mask(mut self, mask: u8) -> Self {
        self.zone_mask = mask;
        self
    }

    pub fn site(mut self, host: impl Into<String>) -> Self {
        self.site = Some(host.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn url_mask(mut self, pattern: impl Into<String>) -> Self {
        self.url_mask = Some(pattern.into());
        self
    }

    pub fn prefer(mut self, pattern: impl Into<String>) -> Self {
        self.prefer = Some(pattern.into());
        self
    }

    pub fn snippet_matcher(mut self, pattern: impl Into<String>) -> Self {
        self.snippet_matcher = Some(pattern.into());
        self
    }

    /// Require `flags`; with `all_of` every bit must be set, otherwise any one.
    pub fn constraint(mut self, flags: Flags, all_of: bool) -> Self {
        self.constraint = Some((flags, all_of));
        self
    }

    pub fn max_distance(mut self, distance: u32) -> Self {
        self.max_distance = distance;
        self
    }

    pub fn paging(mut self, offset: usize, items_per_page: usize) -> Self {
        self.offset = offset;
        self.items_per_page = items_per_page.max(1);
        self
    }

    pub fn profile(mut self, profile: RankingProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn special_rights(mut self, special: bool) -> Self {
        self.special_rights = special;
        self
    }

    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn navigators(mut self, navigators: Navigators) -> Self {
        self.navigators = navigators;
        self
    }

    pub fn build(self) -> Result<QueryParams> {
        // Patterns must match the whole input.
        let full = |p: Option<String>| -> Result<Option<Regex>> {
            p.filter(|s| !s.is_empty() && s != ".*").map(|s| Regex::new(&format!("^(?:{s})$"))).transpose().map_err(Into::into)
        };
        let sites = match &self.site {
            Some(host) => SiteId::for_host(host)?,
            None => Vec::new(),
        };
        Ok(QueryParams {
            query_string: self.query_string,
            include: self.include,
            exclude: self.exclude,
            words: self.words,
            profile: self.profile.unwrap_or_else(|| RankingProfile::for_domain(self.content_domain)),
            content_domain: self.content_domain,
            zone_mask: self.zone_mask,
            site_host: self.site,
            sites,
            author: self.author,
            language: self.language,
            url_mask: full(self.url_mask)?,
            prefer: full(self.prefer)?,
            snippet_matcher: full(self.snippet_matcher)?,
            constraint: self.constraint.map(|(f, _)| f),
            all_of_constraint: self.constraint.is_some_and(|(_, all)| all),
            max_distance: self.max_distance,
            offset: self.offset,
            items_per_page: self.items_per_page,
            special_rights: self.special_rights,
            strategy: self.strategy,
            navigators: self.navigators,
        })
    }
}
