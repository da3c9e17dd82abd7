use crate::docid::SiteId;
use crate::posting::{FeatureRange, Flags, Language, Posting};
use crate::profile::{Coefficient as C, RankingProfile};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

/// Normalization statistics shared by all postings of one query.
#[derive(Debug, Default)]
struct Statistics {
    range: Option<FeatureRange>,
    sites: HashMap<SiteId, u32>,
    max_site_count: u32,
}

/// Site count of a posting and the largest site count seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteAuthority {
    pub count: u32,
    pub max: u32,
}

/// Normalizer and scoring function for one query.
///
/// Postings pass through [`ReferenceOrder::normalize`], which widens the
/// feature range; [`ReferenceOrder::cardinal`] scores against whatever range
/// has been collected at that moment.
#[derive(Debug)]
pub struct ReferenceOrder {
    profile: RankingProfile,
    language: Option<Language>,
    stats: Mutex<Statistics>,
}

impl ReferenceOrder {
    pub fn new(profile: RankingProfile, language: Option<Language>) -> Self {
        ReferenceOrder { profile, language, stats: Mutex::new(Statistics::default()) }
    }

    pub fn profile(&self) -> &RankingProfile { &self.profile }

    /// Fan postings across normalizer threads. The returned channel
    /// disconnects once every posting has been forwarded and every worker has
    /// merged its site counts.
    pub fn normalize(self: &Arc<Self>, postings: Vec<Posting>) -> Receiver<Posting> {
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        if postings.is_empty() {
            return out_rx;
        }
        let workers = if postings.len() < 20 {
            2
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1) + 1
        };
        let (in_tx, in_rx) = crossbeam_channel::unbounded::<Posting>();

        let mut spawned = 0;
        for i in 0..workers {
            let (rx, tx, order) = (in_rx.clone(), out_tx.clone(), Arc::clone(self));
            match thread::Builder::new().name(format!("normalizer-{i}")).spawn(move || order.normalize_worker(rx, tx)) {
                Ok(_) => spawned += 1,
                Err(e) => tracing::warn!(error = %e, "failed to spawn normalizer"),
            }
        }

        if spawned == 0 {
            for p in postings {
                let _ = in_tx.send(p);
            }
            drop(in_tx);
            self.normalize_worker(in_rx, out_tx);
            return out_rx;
        }
        drop(in_rx);
        drop(out_tx);

        let feed = thread::Builder::new().name("normalizer-feed".into()).spawn(move || {
            for p in postings {
                if in_tx.send(p).is_err() {
                    break;
                }
            }
        });
        if let Err(e) = feed {
            tracing::warn!(error = %e, "failed to spawn normalizer distributor");
        }
        out_rx
    }

    fn normalize_worker(&self, input: Receiver<Posting>, output: Sender<Posting>) {
        let mut local_sites: HashMap<SiteId, u32> = HashMap::new();
        let mut forwarded = 0usize;
        for p in input.iter() {
            *local_sites.entry(p.doc_id.site()).or_insert(0) += 1;
            self.include(&p);
            if output.send(p).is_err() {
                break;
            }
            forwarded += 1;
        }
        let mut stats = self.stats.lock();
        for (site, count) in local_sites {
            let c = stats.sites.entry(site).or_insert(0);
            *c += count;
            let c = *c;
            stats.max_site_count = stats.max_site_count.max(c);
        }
        drop(stats);
        tracing::trace!(forwarded, "normalizer worker finished");
    }

    fn include(&self, p: &Posting) {
        let mut stats = self.stats.lock();
        match stats.range.as_mut() {
            Some(r) => r.include(&p.features),
            None => stats.range = Some(FeatureRange::new(&p.features)),
        }
    }

    /// Snapshot of the feature range collected so far.
    pub fn range(&self) -> Option<FeatureRange> { self.stats.lock().range }

    pub fn authority(&self, site: &SiteId) -> SiteAuthority {
        let stats = self.stats.lock();
        SiteAuthority { count: stats.sites.get(site).copied().unwrap_or(0), max: stats.max_site_count }
    }

    /// Score a posting against the current statistics. `None` until at
    /// least one posting has been normalized.
    pub fn cardinal(&self, p: &Posting) -> Option<i64> {
        let (range, authority) = {
            let stats = self.stats.lock();
            let range = stats.range?;
            let count = stats.sites.get(&p.doc_id.site()).copied().unwrap_or(0);
            (range, SiteAuthority { count, max: stats.max_site_count })
        };
        Some(score(p, &range, authority, &self.profile, self.language))
    }
}

fn normalized(value: f64, min: f64, max: f64) -> i64 {
    if max <= min {
        return 0;
    }
    (256.0 * (value - min) / (max - min)).round() as i64
}

/// Composite ranking score of `p`. Higher is better.
pub fn score(p: &Posting, range: &FeatureRange, authority: SiteAuthority, profile: &RankingProfile, language: Option<Language>) -> i64 {
    let (v, lo, hi) = (p.features.dimensions(), range.min.dimensions(), range.max.dimensions());
    let shift = |c: C| u32::from(profile.get(c));
    let direct = |i: usize, c: C| {
        let n = normalized(v[i], lo[i], hi[i]);
        n << shift(c)
    };
    let inverted = |i: usize, c: C| {
        if hi[i] <= lo[i] {
            return 0;
        }
        (256 - normalized(v[i], lo[i], hi[i])) << shift(c)
    };

    let mut r: i64 = (256 - i64::from(p.doc_id.dom_length_normalized())) << shift(C::DomLength);
    if profile.get(C::Authority) > 12 {
        r += ((i64::from(authority.count) << 8) / (1 + i64::from(authority.max))) << shift(C::Authority);
    }

    // dimension order as in Features::dimensions
    r += direct(0, C::HitCount);
    r += direct(1, C::LLocal);
    r += direct(2, C::LOther);
    r += direct(3, C::Date);
    r += direct(4, C::WordsInText);
    r += direct(5, C::PhrasesInText);
    r += inverted(6, C::PosInText);
    r += inverted(7, C::PosInPhrase);
    r += inverted(8, C::PosOfPhrase);
    r += inverted(9, C::UrlLength);
    r += inverted(10, C::UrlComps);
    r += direct(11, C::WordsInTitle);
    r += inverted(12, C::WordDistance);
    r += direct(13, C::TermFrequency);

    for (flag, c) in [
        (Flags::APP_DC_IDENTIFIER, C::AppUrl),
        (Flags::APP_DC_TITLE, C::AppDcTitle),
        (Flags::APP_DC_CREATOR, C::AppDcCreator),
        (Flags::APP_DC_SUBJECT, C::AppDcSubject),
        (Flags::APP_DC_DESCRIPTION, C::AppDcDescription),
        (Flags::APP_EMPHASIZED, C::AppEmphasized),
        (Flags::INDEX_OF, C::CatIndexOf),
        (Flags::HAS_IMAGE, C::CatHasImage),
        (Flags::HAS_AUDIO, C::CatHasAudio),
        (Flags::HAS_VIDEO, C::CatHasVideo),
        (Flags::HAS_APP, C::CatHasApp),
    ] {
        if p.flags.contains(flag) {
            r += 255i64 << shift(c);
        }
    }
    if language.is_some_and(|l| l == p.language) {
        r += 255i64 << shift(C::Language);
    }
    if p.doc_id.is_probably_root() {
        r += 15i64 << shift(C::UrlLength);
    }
    r.max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docid::{DocumentId, WordHash};
    use crate::posting::Features;
    use url::Url;

    fn posting(url: &str, f: Features) -> Posting {
        Posting::new(DocumentId::from_url(&Url::parse(url).unwrap()), WordHash::of("rust"), f)
    }

    #[test]
    fn score_needs_a_range() {
        let order = ReferenceOrder::new(RankingProfile::default(), None);
        let p = posting("http://a.com/x", Features::default());
        assert_eq!(order.cardinal(&p), None);
    }

    #[test]
    fn normalize_forwards_every_posting_and_counts_sites() {
        let order = Arc::new(ReferenceOrder::new(RankingProfile::default(), None));
        let batch: Vec<Posting> = (0..50)
            .map(|i| posting(&format!("http://site{}.com/p{i}", i % 3), Features { hitcount: i, ..Default::default() }))
            .collect();
        let out: Vec<Posting> = order.normalize(batch).iter().collect();
        assert_eq!(out.len(), 50);
        let range = order.range().unwrap();
        assert_eq!(range.min.hitcount, 0);
        assert_eq!(range.max.hitcount, 49);
        for p in &out {
            assert!(range.contains(&p.features));
        }
        let a = order.authority(&out[0].doc_id.site());
        assert!(a.count >= 16 && a.max == 17);
    }

    #[test]
    fn degenerate_dimensions_contribute_nothing() {
        let f = Features { hitcount: 5, url_length: 20, ..Default::default() };
        let p = posting("http://a.com/x/y", f);
        let range = FeatureRange::new(&p.features);
        let zero = RankingProfile::zero();
        assert_eq!(score(&p, &range, SiteAuthority::default(), &zero, None), 256 - i64::from(p.doc_id.dom_length_normalized()));
    }

    #[test]
    fn inverted_dimension_prefers_short_urls() {
        let short = posting("http://a.com/x/y", Features { url_length: 10, ..Default::default() });
        let long = posting("http://a.com/x/z", Features { url_length: 90, ..Default::default() });
        let mut range = FeatureRange::new(&short.features);
        range.include(&long.features);
        let profile = RankingProfile::zero().with(C::UrlLength, 4);
        let s = score(&short, &range, SiteAuthority::default(), &profile, None);
        let l = score(&long, &range, SiteAuthority::default(), &profile, None);
        assert!(s > l);
    }

    #[test]
    fn authority_is_opt_in() {
        let p = posting("http://a.com/x/y", Features::default());
        let range = FeatureRange::new(&p.features);
        let auth = SiteAuthority { count: 4, max: 4 };
        let low = RankingProfile::zero().with(C::Authority, 12);
        let high = RankingProfile::zero().with(C::Authority, 13);
        let base = score(&p, &range, SiteAuthority::default(), &low, None);
        assert_eq!(score(&p, &range, auth, &low, None), base);
        assert_eq!(score(&p, &range, auth, &high, None), base + (((4 << 8) / 5) << 13));
    }

    #[test]
    fn flag_and_language_bonuses() {
        let en = Language::new("en");
        let p = posting("http://a.com/x/y", Features::default()).with_flags(Flags::APP_DC_TITLE).with_language(en);
        let range = FeatureRange::new(&p.features);
        let profile = RankingProfile::zero().with(C::AppDcTitle, 3).with(C::Language, 2);
        let base = 256 - i64::from(p.doc_id.dom_length_normalized());
        assert_eq!(score(&p, &range, SiteAuthority::default(), &profile, Some(en)), base + (255 << 3) + (255 << 2));
        assert_eq!(score(&p, &range, SiteAuthority::default(), &profile, Some(Language::new("de"))), base + (255 << 3));
    }
}
