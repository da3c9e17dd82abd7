use crate::docid::{DocumentId, WordHash};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Per posting property bits. Unnamed bits are carried through untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Flags: u32 {
        const INDEX_OF = 1 << 0;
        const HAS_LOCATION = 1 << 19;
        const HAS_IMAGE = 1 << 20;
        const HAS_AUDIO = 1 << 21;
        const HAS_VIDEO = 1 << 22;
        const HAS_APP = 1 << 23;
        const APP_DC_DESCRIPTION = 1 << 24;
        const APP_DC_TITLE = 1 << 25;
        const APP_DC_CREATOR = 1 << 26;
        const APP_DC_SUBJECT = 1 << 27;
        const APP_DC_IDENTIFIER = 1 << 28;
        const APP_EMPHASIZED = 1 << 29;
        const _ = !0;
    }
}

impl Flags {
    pub fn is_set(self, bit: u32) -> bool { bit < 32 && self.bits() & (1 << bit) != 0 }
}

/// Two-letter language code, lowercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Language([u8; 2]);

impl Language {
    pub const UNKNOWN: Language = Language(*b"xx");

    pub fn new(code: &str) -> Self {
        let b = code.trim().as_bytes();
        if b.len() < 2 || !b[..2].iter().all(u8::is_ascii_alphabetic) {
            return Language::UNKNOWN;
        }
        Language([b[0].to_ascii_lowercase(), b[1].to_ascii_lowercase()])
    }

    pub fn as_str(&self) -> &str { std::str::from_utf8(&self.0).unwrap_or("xx") }
}

impl Default for Language {
    fn default() -> Self { Language::UNKNOWN }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Language({})", self.as_str()) }
}

/// Numeric ranking features of one posting.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Features {
    /// Occurrences of the word in the document text.
    pub hitcount: u32,
    /// Outlinks to the same host.
    pub llocal: u32,
    /// Outlinks to other hosts.
    pub lother: u32,
    /// Days since epoch of the last modification.
    pub virtual_age: u32,
    pub words_in_text: u32,
    pub phrases_in_text: u32,
    /// Position of the first occurrence among all words.
    pub position: u32,
    pub pos_in_phrase: u32,
    pub pos_of_phrase: u32,
    pub url_length: u32,
    pub url_comps: u32,
    pub words_in_title: u32,
    /// Summed gap between the positions of joined query words.
    pub distance: u32,
    /// Zero means "derive from hitcount".
    pub term_frequency: f64,
}

impl Features {
    pub fn tf(&self) -> f64 {
        if self.term_frequency > 0.0 {
            self.term_frequency
        } else {
            f64::from(self.hitcount) / f64::from(self.words_in_text + self.words_in_title + 1)
        }
    }

    fn component_min(&self, o: &Features) -> Features {
        Features {
            hitcount: self.hitcount.min(o.hitcount),
            llocal: self.llocal.min(o.llocal),
            lother: self.lother.min(o.lother),
            virtual_age: self.virtual_age.min(o.virtual_age),
            words_in_text: self.words_in_text.min(o.words_in_text),
            phrases_in_text: self.phrases_in_text.min(o.phrases_in_text),
            position: self.position.min(o.position),
            pos_in_phrase: self.pos_in_phrase.min(o.pos_in_phrase),
            pos_of_phrase: self.pos_of_phrase.min(o.pos_of_phrase),
            url_length: self.url_length.min(o.url_length),
            url_comps: self.url_comps.min(o.url_comps),
            words_in_title: self.words_in_title.min(o.words_in_title),
            distance: self.distance.min(o.distance),
            term_frequency: self.tf().min(o.tf()),
        }
    }

    fn component_max(&self, o: &Features) -> Features {
        Features {
            hitcount: self.hitcount.max(o.hitcount),
            llocal: self.llocal.max(o.llocal),
            lother: self.lother.max(o.lother),
            virtual_age: self.virtual_age.max(o.virtual_age),
            words_in_text: self.words_in_text.max(o.words_in_text),
            phrases_in_text: self.phrases_in_text.max(o.phrases_in_text),
            position: self.position.max(o.position),
            pos_in_phrase: self.pos_in_phrase.max(o.pos_in_phrase),
            pos_of_phrase: self.pos_of_phrase.max(o.pos_of_phrase),
            url_length: self.url_length.max(o.url_length),
            url_comps: self.url_comps.max(o.url_comps),
            words_in_title: self.words_in_title.max(o.words_in_title),
            distance: self.distance.max(o.distance),
            term_frequency: self.tf().max(o.tf()),
        }
    }

    /// Values of every scored dimension, in a fixed order.
    pub fn dimensions(&self) -> [f64; 14] {
        [
            f64::from(self.hitcount),
            f64::from(self.llocal),
            f64::from(self.lother),
            f64::from(self.virtual_age),
            f64::from(self.words_in_text),
            f64::from(self.phrases_in_text),
            f64::from(self.position),
            f64::from(self.pos_in_phrase),
            f64::from(self.pos_of_phrase),
            f64::from(self.url_length),
            f64::from(self.url_comps),
            f64::from(self.words_in_title),
            f64::from(self.distance),
            self.tf(),
        ]
    }
}

/// Component-wise minimum and maximum over all features seen so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRange {
    pub min: Features,
    pub max: Features,
}

impl FeatureRange {
    pub fn new(first: &Features) -> Self {
        let f = Features { term_frequency: first.tf(), ..*first };
        FeatureRange { min: f, max: f }
    }

    pub fn include(&mut self, f: &Features) {
        self.min = self.min.component_min(f);
        self.max = self.max.component_max(f);
    }

    pub fn contains(&self, f: &Features) -> bool {
        let (lo, hi, v) = (self.min.dimensions(), self.max.dimensions(), f.dimensions());
        (0..v.len()).all(|i| lo[i] <= v[i] && v[i] <= hi[i])
    }
}

/// One (word, document) relation as delivered by the term index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocumentId,
    pub word: WordHash,
    pub features: Features,
    pub flags: Flags,
    pub language: Language,
    /// Positions of the query words joined into this posting.
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(doc_id: DocumentId, word: WordHash, features: Features) -> Self {
        let positions = vec![features.position];
        Posting { doc_id, word, features, flags: Flags::empty(), language: Language::UNKNOWN, positions }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Merge the posting of another query word for the same document.
    pub fn join(&mut self, other: &Posting) {
        debug_assert_eq!(self.doc_id, other.doc_id);
        self.positions.extend_from_slice(&other.positions);
        let f = &mut self.features;
        let o = &other.features;
        f.pos_in_phrase = if f.pos_of_phrase == o.pos_of_phrase { f.pos_in_phrase.min(o.pos_in_phrase) } else { 0 };
        f.pos_of_phrase = f.pos_of_phrase.min(o.pos_of_phrase);
        f.term_frequency = f.tf() + o.tf();
        f.words_in_text += o.words_in_text;
        f.position = self.positions.iter().copied().min().unwrap_or(f.position);
        f.distance = distance(&self.positions);
    }
}

fn distance(positions: &[u32]) -> u32 {
    positions.windows(2).map(|w| w[0].abs_diff(w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn doc() -> DocumentId { DocumentId::from_url(&Url::parse("http://example.com/a").unwrap()) }

    #[test]
    fn range_tracks_extremes() {
        let a = Features { hitcount: 3, url_length: 40, term_frequency: 0.2, ..Default::default() };
        let b = Features { hitcount: 9, url_length: 12, term_frequency: 0.5, ..Default::default() };
        let mut r = FeatureRange::new(&a);
        r.include(&b);
        assert_eq!(r.min.hitcount, 3);
        assert_eq!(r.max.hitcount, 9);
        assert_eq!(r.min.url_length, 12);
        assert_eq!(r.max.url_length, 40);
        assert!(r.contains(&a) && r.contains(&b));
    }

    #[test]
    fn derived_term_frequency() {
        let f = Features { hitcount: 4, words_in_text: 6, words_in_title: 1, ..Default::default() };
        assert!((f.tf() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn join_merges_positions() {
        let w1 = WordHash::of("alpha");
        let w2 = WordHash::of("beta");
        let mut a = Posting::new(doc(), w1, Features { position: 3, pos_of_phrase: 1, pos_in_phrase: 3, words_in_text: 10, term_frequency: 0.1, ..Default::default() });
        let b = Posting::new(doc(), w2, Features { position: 7, pos_of_phrase: 2, pos_in_phrase: 1, words_in_text: 10, term_frequency: 0.2, ..Default::default() });
        a.join(&b);
        assert_eq!(a.positions, vec![3, 7]);
        assert_eq!(a.features.distance, 4);
        assert_eq!(a.features.pos_in_phrase, 0);
        assert_eq!(a.features.pos_of_phrase, 1);
        assert_eq!(a.features.words_in_text, 20);
        assert!((a.features.term_frequency - 0.3).abs() < 1e-9);
    }

    #[test]
    fn flags_keep_unnamed_bits() {
        let f = Flags::from_bits_retain(1 << 5) | Flags::HAS_IMAGE;
        assert!(f.is_set(5));
        assert!(f.is_set(20));
        assert!(!f.is_set(21));
        assert_eq!(Language::new("EN").as_str(), "en");
        assert_eq!(Language::new("?"), Language::UNKNOWN);
    }
}
