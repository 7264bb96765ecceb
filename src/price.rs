// BTC/USD price quote from CoinMarketCap with a 5 minute cache

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const PRICE_CACHE_DURATION: Duration = Duration::from_secs(300);
const FALLBACK_BTC_USD: f64 = 64_000.0;
const DEFAULT_CMC_URL: &str = "https://pro-api.coinmarketcap.com";
const SATS_PER_BTC: f64 = 100_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fresh: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CmcResponse {
    data: CmcData,
}

#[derive(Debug, Deserialize)]
struct CmcData {
    #[serde(rename = "BTC")]
    btc: CmcAsset,
}

#[derive(Debug, Deserialize)]
struct CmcAsset {
    quote: CmcQuote,
}

#[derive(Debug, Deserialize)]
struct CmcQuote {
    #[serde(rename = "USD")]
    usd: CmcUsd,
}

#[derive(Debug, Deserialize)]
struct CmcUsd {
    price: f64,
}

/// Convert sats to USD at `btc_usd`
pub fn sats_to_usd(sats: i64, btc_usd: f64) -> f64 {
    sats as f64 / SATS_PER_BTC * btc_usd
}

#[derive(Debug, Clone)]
pub struct PriceService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: Arc<Mutex<Option<(f64, Instant)>>>,
}

impl PriceService {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_CMC_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Current price, from cache when fresh enough. Never fails: on fetch
    /// errors an expired cached price or the fallback price is returned.
    pub async fn btc_usd(&self) -> PriceQuote {
        let stale = {
            let cache = self.cache.lock().await;
            match *cache {
                Some((price, at)) if at.elapsed() < PRICE_CACHE_DURATION => {
                    debug!(price, "Using cached Bitcoin price");
                    return PriceQuote {
                        price,
                        fresh: false,
                        cached: false,
                        fallback: false,
                        error: None,
                    };
                }
                Some((price, _)) => Some(price),
                None => None,
            }
        };

        match self.fetch().await {
            Ok(price) => {
                *self.cache.lock().await = Some((price, Instant::now()));
                PriceQuote {
                    price,
                    fresh: true,
                    cached: false,
                    fallback: false,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Failed to fetch Bitcoin price: {}", e);
                match stale {
                    Some(price) => PriceQuote {
                        price,
                        fresh: false,
                        cached: true,
                        fallback: false,
                        error: Some(format!("Failed to fetch current price: {}", e)),
                    },
                    None => PriceQuote {
                        price: FALLBACK_BTC_USD,
                        fresh: false,
                        cached: false,
                        fallback: true,
                        error: Some(format!("Failed to fetch price: {}", e)),
                    },
                }
            }
        }
    }

    async fn fetch(&self) -> anyhow::Result<f64> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("COINMARKETCAP_API_KEY not configured"))?;

        let url = format!(
            "{}/v1/cryptocurrency/quotes/latest?symbol=BTC&convert=USD",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .header("X-CMC_PRO_API_KEY", api_key)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("API request failed with status {}", status.as_u16());
        }
        let body: CmcResponse = response.json().await?;
        Ok(body.data.btc.quote.usd.price)
    }

    #[cfg(test)]
    async fn seed(&self, price: f64, age: Duration) {
        let at = Instant::now()
            .checked_sub(age)
            .unwrap_or_else(Instant::now);
        *self.cache.lock().await = Some((price, at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sats_to_usd() {
        assert!((sats_to_usd(100_000_000, 64_000.0) - 64_000.0).abs() < 1e-9);
        assert!((sats_to_usd(1_000, 50_000.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_cmc_response() {
        let body: CmcResponse = serde_json::from_str(
            r#"{"status":{},"data":{"BTC":{"id":1,"quote":{"USD":{"price":67123.45,"volume_24h":1}}}}}"#,
        )
        .unwrap();
        assert_eq!(body.data.btc.quote.usd.price, 67123.45);
    }

    #[tokio::test]
    async fn test_fallback_without_api_key() {
        let service = PriceService::new(None);
        let quote = service.btc_usd().await;
        assert!(quote.fallback);
        assert_eq!(quote.price, FALLBACK_BTC_USD);
        assert!(quote.error.is_some());
    }

    #[tokio::test]
    async fn test_fresh_cache_is_served() {
        let service = PriceService::new(None);
        service.seed(70_000.0, Duration::from_secs(10)).await;
        let quote = service.btc_usd().await;
        assert_eq!(quote.price, 70_000.0);
        assert!(!quote.cached && !quote.fallback);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_fetch_fails() {
        let service = PriceService::new(None);
        service.seed(70_000.0, Duration::from_secs(600)).await;
        let quote = service.btc_usd().await;
        assert_eq!(quote.price, 70_000.0);
        assert!(quote.cached);
        assert!(!quote.fallback);

        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["cached"], true);
        assert!(json.get("fallback").is_none());
    }
}
