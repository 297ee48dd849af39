use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use qdc_storage::PolitenessDelay;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    KrxIndex,
    KrxEtf,
    KofiaFunds,
    SeibroSettlement,
}

/// Where collection starts when the store holds nothing for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultStart {
    Date(NaiveDate),
    DaysBack(u32),
}

impl DefaultStart {
    /// Always strictly before `today`.
    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        let yesterday = today.pred_opt().unwrap_or(today);
        match *self {
            Self::Date(date) => date.min(yesterday),
            Self::DaysBack(days) => today
                .checked_sub_days(Days::new(u64::from(days.max(1))))
                .unwrap_or(yesterday),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolitenessRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PolitenessRange {
    pub fn delay(&self) -> PolitenessDelay {
        PolitenessDelay::from_millis(self.min_ms, self.max_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSettings {
    #[serde(default = "default_universe_limit")]
    pub limit: usize,
    #[serde(default)]
    pub exclude_name_keywords: Vec<String>,
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            limit: default_universe_limit(),
            exclude_name_keywords: Vec::new(),
        }
    }
}

fn default_universe_limit() -> usize {
    600
}

fn default_enabled() -> bool {
    true
}

/// One tabular source as declared in `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub source_id: String,
    pub kind: SourceKind,
    pub collection: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub max_span_days: u32,
    pub default_start: DefaultStart,
    #[serde(default)]
    pub politeness: PolitenessRange,
    #[serde(default)]
    pub universe: Option<UniverseSettings>,
    /// Source column holding the per-row instrument code, for sources that
    /// return many instruments per date.
    #[serde(default)]
    pub instrument_field: Option<String>,
}

impl SourceProfile {
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn default_start_is_strictly_before_today() {
        let today = d(2024, 6, 3);
        assert_eq!(DefaultStart::Date(d(2020, 1, 1)).resolve(today), d(2020, 1, 1));
        assert_eq!(DefaultStart::Date(d(2030, 1, 1)).resolve(today), d(2024, 6, 2));
        assert_eq!(DefaultStart::DaysBack(10).resolve(today), d(2024, 5, 24));
        assert_eq!(DefaultStart::DaysBack(0).resolve(today), d(2024, 6, 2));
    }

    #[test]
    fn profiles_deserialize_from_yaml() {
        let yaml = r#"
source_id: seibro
kind: seibro-settlement
collection: us_stock_settlement_in_korea
endpoint: https://seibro.or.kr/websquare/engine/proworks/callServletService.jsp
headers:
  content-type: application/xml; charset=UTF-8
max_span_days: 1
default_start:
  days_back: 10
politeness:
  min_ms: 2500
  max_ms: 10000
instrument_field: ISIN
"#;
        let profile: SourceProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.kind, SourceKind::SeibroSettlement);
        assert!(profile.enabled);
        assert_eq!(profile.default_start, DefaultStart::DaysBack(10));
        assert_eq!(profile.politeness.max_ms, 10_000);
        assert_eq!(profile.header_pairs().count(), 1);
        assert!(profile.universe.is_none());
    }
}
