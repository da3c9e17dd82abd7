use crate::error::{Result, SearchError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, FromRepr};
use url::Url;

/// Ordered alphabet of the id encoding. Every byte of an id is one of these.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

lazy_static! {
    static ref ROOT_FLAG_BARE: u8 = subdom_port_path("", 80, "");
    static ref ROOT_FLAG_WWW: u8 = subdom_port_path("www", 80, "");
}

fn digest(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(md5::compute(input.as_bytes()).0)
}

fn decode_char(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u8)
}

fn encode_byte(b: u8) -> u8 { ALPHABET[(b & 63) as usize] }

fn subdom_port_path(subdom: &str, port: u16, rootpath: &str) -> u8 {
    digest(&format!("{subdom}:{port}:{rootpath}")).as_bytes()[0]
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = s.as_bytes();
    if bytes.len() != N || bytes.iter().any(|b| decode_char(*b).is_none()) {
        return Err(SearchError::InvalidId(s.to_string()));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Coarse geographic zone of a host, derived from its top-level domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr, Serialize, Deserialize)]
#[repr(u8)]
#[strum(serialize_all = "snake_case")]
pub enum Zone {
    EuropeRussia = 0,
    MiddleSouthAmerica = 1,
    SouthEastAsia = 2,
    MiddleEastWestAsia = 3,
    NorthAmericaOceania = 4,
    Africa = 5,
    Generic = 6,
    Local = 7,
}

impl Zone {
    pub const ALL_MASK: u8 = 0xff;

    pub fn of_host(host: &str) -> Zone {
        let host = host.trim_end_matches('.');
        if host == "localhost"
            || host.starts_with("127.")
            || host.starts_with("10.")
            || host.starts_with("192.168.")
            || host.ends_with(".local")
            || host.ends_with(".lan")
            || host.ends_with(".localhost")
            || host == "[::1]"
        {
            return Zone::Local;
        }
        let tld = host.rsplit('.').next().unwrap_or("");
        if tld.chars().all(|c| c.is_ascii_digit()) {
            return Zone::Generic;
        }
        match tld {
            "de" | "fr" | "it" | "es" | "nl" | "ru" | "pl" | "se" | "no" | "fi" | "dk" | "at" | "ch" | "be"
            | "pt" | "cz" | "gr" | "hu" | "ro" | "ua" | "eu" | "sk" | "si" | "hr" | "bg" | "lt" | "lv" | "ee"
            | "by" | "lu" | "is" => Zone::EuropeRussia,
            "br" | "ar" | "mx" | "cl" | "co" | "pe" | "ve" | "uy" | "ec" | "bo" | "py" | "cu" | "cr" => {
                Zone::MiddleSouthAmerica
            }
            "cn" | "jp" | "kr" | "tw" | "hk" | "sg" | "th" | "vn" | "my" | "id" | "ph" | "in" => Zone::SouthEastAsia,
            "tr" | "il" | "ir" | "iq" | "sa" | "ae" | "jo" | "lb" | "sy" | "kw" | "qa" | "pk" | "af" => {
                Zone::MiddleEastWestAsia
            }
            "us" | "uk" | "ca" | "au" | "nz" | "ie" | "gov" | "edu" | "mil" => Zone::NorthAmericaOceania,
            "za" | "ng" | "ke" | "eg" | "ma" | "gh" | "tz" | "et" | "dz" | "tn" => Zone::Africa,
            _ => Zone::Generic,
        }
    }

    pub fn bit(self) -> u8 { 1 << (self as u8) }
}

/// Twelve-character document id.
///
/// Layout: five characters of protocol/host/port hash, one host flag character
/// (domain-length class, zone, non-http bit), five characters of the full url
/// hash and one character hashing subdomain, port and first path segment.
/// The first six characters form the [`SiteId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId([u8; 12]);

impl DocumentId {
    pub fn from_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or("").to_lowercase();
        let port = url.port_or_known_default().unwrap_or(80);
        let is_http = url.scheme() == "http";

        let (dom, subdom) = split_host(&host);
        let rootpath = root_path(url.path());
        let l = dom.len();
        let dom_length_key: u8 = if l <= 8 { 0 } else if l <= 12 { 1 } else if l <= 16 { 2 } else { 3 };
        let flag = (if is_http { 0 } else { 32 }) | ((Zone::of_host(&host) as u8) << 2) | dom_length_key;

        let mut id = [0u8; 12];
        id[..5].copy_from_slice(&digest(&format!("{}:{}:{}", url.scheme(), host, port)).as_bytes()[..5]);
        id[5] = encode_byte(flag);
        id[6..11].copy_from_slice(&digest(url.as_str()).as_bytes()[..5]);
        id[11] = subdom_port_path(subdom, port, rootpath);
        DocumentId(id)
    }

    pub fn as_str(&self) -> &str { std::str::from_utf8(&self.0).unwrap_or("") }

    pub fn site(&self) -> SiteId {
        let mut s = [0u8; 6];
        s.copy_from_slice(&self.0[..6]);
        SiteId(s)
    }

    fn flag(&self) -> u8 { decode_char(self.0[5]).unwrap_or(0) }

    pub fn dom_length_key(&self) -> u8 { self.flag() & 3 }

    /// Estimated length of the registered domain name.
    pub fn dom_length_estimation(&self) -> u32 {
        match self.dom_length_key() {
            0 => 4,
            1 => 10,
            2 => 14,
            _ => 20,
        }
    }

    /// Domain length scaled to 0..=256.
    pub fn dom_length_normalized(&self) -> u32 { (self.dom_length_estimation() << 8) / 20 }

    pub fn zone(&self) -> Zone { Zone::from_repr((self.flag() & 28) >> 2).unwrap_or(Zone::Generic) }

    /// True for `/` or a bare document on the plain or `www` host.
    pub fn is_probably_root(&self) -> bool {
        self.0[11] == *ROOT_FLAG_BARE || self.0[11] == *ROOT_FLAG_WWW
    }
}

fn split_host(host: &str) -> (&str, &str) {
    let dom = match host.rfind('.') {
        Some(p) if p > 0 => &host[..p],
        _ => "",
    };
    match dom.rfind('.') {
        Some(p) if p > 0 => (&dom[p + 1..], &dom[..p]),
        _ => (dom, ""),
    }
}

fn root_path(path: &str) -> &str {
    let start = usize::from(path.starts_with('/'));
    let end = if path.ends_with('/') { path.len() as isize - 2 } else { path.len() as isize - 1 };
    match path.get(start..).and_then(|rest| rest.find('/')) {
        Some(rel) => {
            let p = start + rel;
            if p > 0 && (p as isize) < end { &path[start..p] } else { "" }
        }
        None => "",
    }
}

impl FromStr for DocumentId {
    type Err = SearchError;
    fn from_str(s: &str) -> Result<Self> { parse_fixed::<12>(s).map(DocumentId) }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "DocumentId({})", self.as_str()) }
}

/// Six-character host identifier; the prefix of every [`DocumentId`] on that host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId([u8; 6]);

impl SiteId {
    pub fn of_url(url: &Url) -> Self { DocumentId::from_url(url).site() }

    /// Site ids of a bare host name under http and https.
    pub fn for_host(host: &str) -> Result<Vec<SiteId>> {
        let mut ids = Vec::with_capacity(2);
        for scheme in ["http", "https"] {
            let url = Url::parse(&format!("{scheme}://{host}/")).map_err(|e| SearchError::InvalidId(format!("{host}: {e}")))?;
            ids.push(SiteId::of_url(&url));
        }
        Ok(ids)
    }

    pub fn as_str(&self) -> &str { std::str::from_utf8(&self.0).unwrap_or("") }
}

impl FromStr for SiteId {
    type Err = SearchError;
    fn from_str(s: &str) -> Result<Self> { parse_fixed::<6>(s).map(SiteId) }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "SiteId({})", self.as_str()) }
}

/// Hash of a (normalized, stemmed) word; key of the term index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WordHash([u8; 12]);

impl WordHash {
    pub fn of(word: &str) -> Self {
        let mut h = [0u8; 12];
        h.copy_from_slice(&digest(&word.to_lowercase()).as_bytes()[..12]);
        WordHash(h)
    }

    pub fn as_str(&self) -> &str { std::str::from_utf8(&self.0).unwrap_or("") }
}

impl FromStr for WordHash {
    type Err = SearchError;
    fn from_str(s: &str) -> Result<Self> { parse_fixed::<12>(s).map(WordHash) }
}

impl fmt::Display for WordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Debug for WordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "WordHash({})", self.as_str()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(u: &str) -> DocumentId { DocumentId::from_url(&Url::parse(u).unwrap()) }

    #[test]
    fn same_host_shares_site() {
        let a = id("http://www.example.com/a/b.html");
        let b = id("http://www.example.com/c.html");
        let c = id("http://other.org/c.html");
        assert_eq!(a.site(), b.site());
        assert_ne!(a.site(), c.site());
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 12);
    }

    #[test]
    fn round_trips_through_string() {
        let a = id("https://rust-lang.org/learn");
        let parsed: DocumentId = a.to_string().parse().unwrap();
        assert_eq!(a, parsed);
        assert!("short".parse::<DocumentId>().is_err());
        assert!("abc$efghijkl".parse::<DocumentId>().is_err());
    }

    #[test]
    fn decodes_host_flag() {
        assert_eq!(id("http://abc.de/x").dom_length_key(), 0);
        assert_eq!(id("http://abcdefghijklmnopqrstu.com/").dom_length_key(), 3);
        assert_eq!(id("http://abc.de/x").zone(), Zone::EuropeRussia);
        assert_eq!(id("http://localhost/x").zone(), Zone::Local);
        assert_eq!(id("http://example.com/").zone(), Zone::Generic);
        assert_eq!(id("http://abc.de/").dom_length_normalized(), (4 << 8) / 20);
    }

    #[test]
    fn detects_probable_root() {
        assert!(id("http://www.example.com/").is_probably_root());
        assert!(id("http://example.com/index.html").is_probably_root());
        assert!(!id("http://example.com/docs/page.html").is_probably_root());
    }

    #[test]
    fn site_for_host_matches_documents() {
        let ids = SiteId::for_host("example.com").unwrap();
        assert!(ids.contains(&id("http://example.com/a").site()));
        assert!(ids.contains(&id("https://example.com/b").site()));
    }

    #[test]
    fn word_hash_is_case_insensitive() {
        assert_eq!(WordHash::of("Rust"), WordHash::of("rust"));
        assert_ne!(WordHash::of("rust"), WordHash::of("java"));
    }
}
