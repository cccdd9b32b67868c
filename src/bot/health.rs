//! Public-health case counts from a disease.sh-compatible API.

use serde::Deserialize;
use tracing::info;

use crate::bot::error::{BotError, Result};

pub const DEFAULT_API_BASE: &str = "https://disease.sh/v3/covid-19";

/// Case counts for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseCounts {
    pub label: String,
    pub cases: i64,
    pub today_cases: Option<i64>,
    pub deaths: i64,
    pub today_deaths: Option<i64>,
    pub recovered: Option<i64>,
    pub active: Option<i64>,
    /// Epoch millis or an API-supplied date string.
    pub updated: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTotals {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    cases: i64,
    #[serde(default)]
    today_cases: Option<i64>,
    #[serde(default)]
    deaths: i64,
    #[serde(default)]
    today_deaths: Option<i64>,
    #[serde(default)]
    recovered: Option<i64>,
    #[serde(default)]
    active: Option<i64>,
    #[serde(default)]
    updated: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiProvince {
    country: String,
    province: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    stats: ApiProvinceStats,
}

#[derive(Deserialize)]
struct ApiProvinceStats {
    #[serde(default)]
    confirmed: i64,
    #[serde(default)]
    deaths: i64,
    #[serde(default)]
    recovered: Option<i64>,
}

impl ApiTotals {
    fn into_counts(self, fallback_label: &str) -> CaseCounts {
        CaseCounts {
            label: self
                .country
                .or(self.state)
                .unwrap_or_else(|| fallback_label.to_string()),
            cases: self.cases,
            today_cases: self.today_cases,
            deaths: self.deaths,
            today_deaths: self.today_deaths,
            recovered: self.recovered,
            active: self.active,
            updated: self.updated.map(|u| u.to_string()),
        }
    }
}

pub struct HealthClient {
    base: String,
    http: reqwest::Client,
}

impl HealthClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base, path);
        info!("Fetching case counts from {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::Provider(format!("HTTP error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Provider(format!("stats API {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| BotError::Provider(format!("unexpected stats payload: {e}")))
    }

    pub async fn global(&self) -> Result<CaseCounts> {
        let totals: ApiTotals = self.get("all").await?;
        Ok(totals.into_counts("World"))
    }

    pub async fn country(&self, name: &str) -> Result<CaseCounts> {
        let path = format!("countries/{}?strict=false", urlencoding::encode(name.trim()));
        let totals: ApiTotals = self.get(&path).await?;
        Ok(totals.into_counts(name))
    }

    /// US state.
    pub async fn state(&self, name: &str) -> Result<CaseCounts> {
        let path = format!("states/{}", urlencoding::encode(name.trim()));
        let totals: ApiTotals = self.get(&path).await?;
        Ok(totals.into_counts(name))
    }

    pub async fn province(&self, name: &str) -> Result<CaseCounts> {
        let provinces: Vec<ApiProvince> = self.get("jhucsse").await?;
        find_province(provinces, name)
            .ok_or_else(|| BotError::Validation(format!("I don't have numbers for \"{}\".", name.trim())))
    }
}

fn find_province(provinces: Vec<ApiProvince>, name: &str) -> Option<CaseCounts> {
    let wanted = name.trim().to_lowercase();
    provinces
        .into_iter()
        .find(|p| p.province.as_deref().is_some_and(|prov| prov.to_lowercase() == wanted))
        .map(|p| CaseCounts {
            label: format!("{}, {}", p.province.unwrap_or_default(), p.country),
            cases: p.stats.confirmed,
            today_cases: None,
            deaths: p.stats.deaths,
            today_deaths: None,
            recovered: p.stats.recovered,
            active: None,
            updated: p.updated_at,
        })
}

/// 1234567 -> "1,234,567"
fn group_digits(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 { format!("-{out}") } else { out }
}

/// Chat-ready summary.
pub fn format_counts(c: &CaseCounts) -> String {
    let mut lines = vec![format!("Case counts for {}:", c.label)];
    match c.today_cases {
        Some(today) => lines.push(format!("Cases: {} (+{} today)", group_digits(c.cases), group_digits(today))),
        None => lines.push(format!("Cases: {}", group_digits(c.cases))),
    }
    match c.today_deaths {
        Some(today) => lines.push(format!("Deaths: {} (+{} today)", group_digits(c.deaths), group_digits(today))),
        None => lines.push(format!("Deaths: {}", group_digits(c.deaths))),
    }
    if let Some(recovered) = c.recovered {
        lines.push(format!("Recovered: {}", group_digits(recovered)));
    }
    if let Some(active) = c.active {
        lines.push(format!("Active: {}", group_digits(active)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits(0), "0");
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(1000), "1,000");
        assert_eq!(group_digits(1234567), "1,234,567");
        assert_eq!(group_digits(-45000), "-45,000");
    }

    #[test]
    fn test_country_payload() {
        let json = r#"{"updated":1700000000000,"country":"Iceland","cases":209137,"todayCases":0,
            "deaths":263,"todayDeaths":0,"recovered":29981,"active":178893,"population":345393}"#;
        let totals: ApiTotals = serde_json::from_str(json).unwrap();
        let counts = totals.into_counts("iceland");
        assert_eq!(counts.label, "Iceland");
        assert_eq!(counts.cases, 209137);
        assert_eq!(counts.active, Some(178893));
        assert_eq!(counts.updated.as_deref(), Some("1700000000000"));
    }

    #[test]
    fn test_global_payload_uses_fallback_label() {
        let json = r#"{"cases":10,"deaths":1}"#;
        let totals: ApiTotals = serde_json::from_str(json).unwrap();
        let counts = totals.into_counts("World");
        assert_eq!(counts.label, "World");
        assert_eq!(counts.today_cases, None);
    }

    #[test]
    fn test_find_province() {
        let json = r#"[
            {"country":"Canada","province":"Ontario","updatedAt":"2023-03-10","stats":{"confirmed":1000,"deaths":10,"recovered":null}},
            {"country":"France","province":null,"stats":{"confirmed":5,"deaths":0}}
        ]"#;
        let provinces: Vec<ApiProvince> = serde_json::from_str(json).unwrap();
        let counts = find_province(provinces, " ontario ").unwrap();
        assert_eq!(counts.label, "Ontario, Canada");
        assert_eq!(counts.cases, 1000);
        assert_eq!(counts.updated.as_deref(), Some("2023-03-10"));
    }

    #[test]
    fn test_format_counts() {
        let counts = CaseCounts {
            label: "World".into(),
            cases: 1500,
            today_cases: Some(20),
            deaths: 30,
            today_deaths: None,
            recovered: None,
            active: Some(100),
            updated: None,
        };
        let text = format_counts(&counts);
        assert!(text.starts_with("Case counts for World:"));
        assert!(text.contains("Cases: 1,500 (+20 today)"));
        assert!(text.contains("Deaths: 30\n"));
        assert!(text.contains("Active: 100"));
        assert!(!text.contains("Recovered"));
    }
}
