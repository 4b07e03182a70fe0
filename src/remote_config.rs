use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Master configuration row, keyed by `config_key` (§6).
#[derive(Debug, Deserialize)]
pub struct MasterRecord {
    pub config_key: String,
    pub strategy: String,
    pub cooldown_secs: Option<u64>,
    pub enabled: bool,
}

/// Detail configuration row, keyed by `(config_key, symbol)` (§6).
#[derive(Debug, Deserialize)]
pub struct DetailRecord {
    pub config_key: String,
    pub symbol: String,
    pub order_quantity: Decimal,
    pub max_position: Decimal,
    pub long_threshold_floor: Decimal,
    pub short_threshold_floor: Decimal,
    pub z_score_multiplier: Decimal,
}

/// Thin REST client over a PostgREST-style endpoint, generalized from the
/// observed two near-duplicate `supabase_helper` variants into one client
/// parameterized by table name (§9's re-architecture point). Read-only,
/// queried once at startup; the engine never watches for changes.
pub struct RemoteConfigClient {
    client: reqwest::Client,
    rest_url: String,
    api_key: String,
}

impl RemoteConfigClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url: format!("{base_url}/rest/v1"),
            api_key,
        }
    }

    async fn get_rows<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.rest_url, table);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(filters)
            .send()
            .await
            .with_context(|| format!("requesting {table} from remote config"))?;

        if !resp.status().is_success() {
            return Err(anyhow!("remote config {table} returned status {}", resp.status()));
        }

        resp.json::<Vec<T>>()
            .await
            .with_context(|| format!("parsing {table} response"))
    }

    pub async fn get_master(&self, config_key: &str) -> Result<MasterRecord> {
        let key_filter = format!("eq.{config_key}");
        let rows: Vec<MasterRecord> = self
            .get_rows("maker_taker_master", &[("config_key", key_filter.as_str())])
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("no master row for config_key={config_key}"))
    }

    pub async fn get_detail(&self, config_key: &str, symbol: &str) -> Result<DetailRecord> {
        let key_filter = format!("eq.{config_key}");
        let symbol_filter = format!("eq.{symbol}");
        let rows: Vec<DetailRecord> = self
            .get_rows(
                "maker_taker_detail",
                &[
                    ("config_key", key_filter.as_str()),
                    ("symbol", symbol_filter.as_str()),
                ],
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("no detail row for config_key={config_key}, symbol={symbol}"))
    }
}
