use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

/// Media kind a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ContentDomain {
    All,
    #[default]
    Text,
    Image,
    Audio,
    Video,
    App,
}

impl ContentDomain {
    pub fn is_media(self) -> bool { matches!(self, ContentDomain::Image | ContentDomain::Audio | ContentDomain::Video | ContentDomain::App) }
}

/// A ranking weight. Each is a left-shift applied to an 8-bit normalized sub-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString, EnumIter, EnumCount)]
pub enum Coefficient {
    #[strum(serialize = "appemph")]
    AppEmphasized,
    #[strum(serialize = "appurl")]
    AppUrl,
    #[strum(serialize = "appauthor")]
    AppDcCreator,
    #[strum(serialize = "appref")]
    AppDcDescription,
    #[strum(serialize = "apptags")]
    AppDcSubject,
    #[strum(serialize = "appdescr")]
    AppDcTitle,
    #[strum(serialize = "authority")]
    Authority,
    #[strum(serialize = "cathasapp")]
    CatHasApp,
    #[strum(serialize = "cathasaudio")]
    CatHasAudio,
    #[strum(serialize = "cathasimage")]
    CatHasImage,
    #[strum(serialize = "cathasvideo")]
    CatHasVideo,
    #[strum(serialize = "catindexof")]
    CatIndexOf,
    #[strum(serialize = "date")]
    Date,
    #[strum(serialize = "domlength")]
    DomLength,
    #[strum(serialize = "hitcount")]
    HitCount,
    #[strum(serialize = "language")]
    Language,
    #[strum(serialize = "llocal")]
    LLocal,
    #[strum(serialize = "lother")]
    LOther,
    #[strum(serialize = "phrasesintext")]
    PhrasesInText,
    #[strum(serialize = "posinphrase")]
    PosInPhrase,
    #[strum(serialize = "posintext")]
    PosInText,
    #[strum(serialize = "posofphrase")]
    PosOfPhrase,
    #[strum(serialize = "tf")]
    TermFrequency,
    #[strum(serialize = "urlcomps")]
    UrlComps,
    #[strum(serialize = "urllength")]
    UrlLength,
    #[strum(serialize = "worddistance")]
    WordDistance,
    #[strum(serialize = "wordsintext")]
    WordsInText,
    #[strum(serialize = "wordsintitle")]
    WordsInTitle,
    #[strum(serialize = "urlcompintoplist")]
    UrlCompInToplist,
    #[strum(serialize = "descrcompintoplist")]
    DescrCompInToplist,
    #[strum(serialize = "prefer")]
    Prefer,
}

/// Set of ranking weights, each in `0..=15`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RankingProfile {
    coeff: [u8; Coefficient::COUNT],
}

impl RankingProfile {
    pub const COEFF_MAX: u8 = 15;

    pub fn for_domain(domain: ContentDomain) -> Self {
        use Coefficient::*;
        let media = |d: ContentDomain| if domain == d { 15 } else { 0 };
        let mut p = RankingProfile { coeff: [0; Coefficient::COUNT] };
        for (c, v) in [
            (AppEmphasized, 5),
            (AppUrl, 12),
            (AppDcCreator, 1),
            (AppDcDescription, 10),
            (AppDcSubject, 2),
            (AppDcTitle, 14),
            (Authority, 5),
            (CatHasApp, media(ContentDomain::App)),
            (CatHasAudio, media(ContentDomain::Audio)),
            (CatHasImage, media(ContentDomain::Image)),
            (CatHasVideo, media(ContentDomain::Video)),
            (CatIndexOf, if domain == ContentDomain::Text { 0 } else { 15 }),
            (Date, 9),
            (DomLength, 10),
            (HitCount, 1),
            (Language, 2),
            (LLocal, 0),
            (LOther, 7),
            (PhrasesInText, 0),
            (PosInPhrase, 0),
            (PosInText, 4),
            (PosOfPhrase, 0),
            (TermFrequency, 8),
            (UrlComps, 7),
            (UrlLength, 6),
            (WordDistance, 10),
            (WordsInText, 3),
            (WordsInTitle, 2),
            (UrlCompInToplist, 2),
            (DescrCompInToplist, 2),
            (Prefer, 0),
        ] {
            p.set(c, v);
        }
        p
    }

    /// Every weight zero.
    pub fn zero() -> Self { RankingProfile { coeff: [0; Coefficient::COUNT] } }

    pub fn get(&self, c: Coefficient) -> u8 { self.coeff[c as usize] }

    pub fn set(&mut self, c: Coefficient, value: u8) { self.coeff[c as usize] = value.min(Self::COEFF_MAX); }

    pub fn with(mut self, c: Coefficient, value: u8) -> Self {
        self.set(c, value);
        self
    }

    /// Parse `key=value` pairs separated by `,` or `&`, optionally wrapped in
    /// braces. Missing keys keep their text-domain default, unknown keys are ignored.
    pub fn parse_external(profile: &str) -> Result<Self> {
        let mut p = RankingProfile::for_domain(ContentDomain::Text);
        let mut s = profile.trim();
        if s.starts_with('{') && s.ends_with('}') && s.len() >= 2 {
            s = &s[1..s.len() - 1];
        }
        let s = s.trim();
        if s.is_empty() {
            return Ok(p);
        }
        let sep = if s.find('&').is_some_and(|i| i > 0) { '&' } else { ',' };
        for elt in s.split(sep).map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = elt
                .split_once('=')
                .ok_or_else(|| SearchError::Profile(elt.to_string()))?;
            let Ok(c) = Coefficient::from_str(key.trim()) else {
                tracing::debug!(key, "ignoring unknown ranking coefficient");
                continue;
            };
            let v: i64 = value.trim().parse().map_err(|_| SearchError::Profile(elt.to_string()))?;
            p.set(c, v.clamp(0, i64::from(Self::COEFF_MAX)) as u8);
        }
        Ok(p)
    }

    pub fn to_external_string(&self) -> String {
        let parts: Vec<String> = Coefficient::iter().map(|c| format!("{}={}", c.as_ref(), self.get(c))).collect();
        format!("{{{}}}", parts.join(","))
    }
}

impl Default for RankingProfile {
    fn default() -> Self { RankingProfile::for_domain(ContentDomain::Text) }
}

impl fmt::Debug for RankingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_external_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_depend_on_domain() {
        let text = RankingProfile::for_domain(ContentDomain::Text);
        let image = RankingProfile::for_domain(ContentDomain::Image);
        assert_eq!(text.get(Coefficient::CatIndexOf), 0);
        assert_eq!(image.get(Coefficient::CatIndexOf), 15);
        assert_eq!(text.get(Coefficient::CatHasImage), 0);
        assert_eq!(image.get(Coefficient::CatHasImage), 15);
        assert_eq!(text.get(Coefficient::TermFrequency), 8);
    }

    #[test]
    fn parses_external_form() {
        let p = RankingProfile::parse_external("{tf=12&date=0&bogus=3}").unwrap();
        assert_eq!(p.get(Coefficient::TermFrequency), 12);
        assert_eq!(p.get(Coefficient::Date), 0);
        assert_eq!(p.get(Coefficient::UrlLength), 6);
        let p = RankingProfile::parse_external("authority=99, appurl=1").unwrap();
        assert_eq!(p.get(Coefficient::Authority), 15);
        assert_eq!(p.get(Coefficient::AppUrl), 1);
        assert!(RankingProfile::parse_external("tf=high").is_err());
        assert!(RankingProfile::parse_external("tf").is_err());
    }

    #[test]
    fn external_string_round_trips() {
        let p = RankingProfile::default().with(Coefficient::Prefer, 7);
        let back = RankingProfile::parse_external(&p.to_external_string()).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn content_domain_parses_case_insensitively() {
        assert_eq!("IMAGE".parse::<ContentDomain>().unwrap(), ContentDomain::Image);
        assert_eq!(ContentDomain::Audio.to_string(), "audio");
        assert!("pdf".parse::<ContentDomain>().is_err());
    }
}
