use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::backfill::CloseSource;
use crate::batch::chunk;
use crate::config::{BinanceConfig, PriceFetchMode};
use crate::discovery::InstrumentSource;
use crate::error::{TrackerError, TrackerResult};
use crate::prices::PriceSource;
use crate::time::LookbackWindow;

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Fan-out bound for per-symbol ticker calls; klines batching is configured
/// separately by the backfill.
const PER_SYMBOL_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct BinanceClient {
    base_url: String,
    fetch_mode: PriceFetchMode,
    http: reqwest::Client,
}

impl BinanceClient {
    pub fn from_config(cfg: &BinanceConfig) -> TrackerResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let value = HeaderValue::from_str(key).map_err(|e| {
                TrackerError::Config(format!("binance.api_key is not a valid header value: {e}"))
            })?;
            headers.insert(API_KEY_HEADER, value);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_s))
            .default_headers(headers);

        if let Some(proxy) = cfg.proxy_url.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TrackerError::Config(format!("binance.proxy_url invalid: {e}")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            fetch_mode: cfg.price_fetch_mode,
            http: builder.build()?,
        })
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> TrackerResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }

        let resp = request.send().await?;
        let resp = error_for_response(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| TrackerError::Malformed(format!("{path}: {e}")))
    }

    async fn bulk_prices(&self, symbols: &[String]) -> TrackerResult<HashMap<String, f64>> {
        let tickers: Vec<TickerPrice> = self.get_json("/api/v3/ticker/price", &[]).await?;
        let requested: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        Ok(tickers
            .into_iter()
            .filter(|t| requested.contains(t.symbol.as_str()))
            .map(|t| (t.symbol, t.price))
            .collect())
    }

    async fn per_symbol_prices(&self, symbols: &[String]) -> TrackerResult<HashMap<String, f64>> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for batch in chunk(symbols.to_vec(), PER_SYMBOL_BATCH) {
            let results = join_all(batch.iter().map(|symbol| self.single_price(symbol))).await;
            for (symbol, result) in batch.iter().zip(results) {
                match result {
                    Ok(price) => {
                        prices.insert(symbol.clone(), price);
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "binance",
                            symbol = %symbol,
                            error = %err,
                            "ticker fetch failed; price unavailable"
                        );
                    }
                }
            }
        }
        Ok(prices)
    }

    async fn single_price(&self, symbol: &str) -> TrackerResult<f64> {
        let ticker: TickerPrice = self
            .get_json(
                "/api/v3/ticker/price",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        Ok(ticker.price)
    }
}

#[async_trait]
impl InstrumentSource for BinanceClient {
    async fn fetch_symbols(&self) -> TrackerResult<Vec<String>> {
        // A payload without `symbols` fails deserialization and surfaces as
        // Malformed; an empty list is a valid zero-instrument answer.
        let info: ExchangeInfo = self.get_json("/api/v3/exchangeInfo", &[]).await?;
        Ok(info.symbols.into_iter().map(|s| s.symbol).collect())
    }
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn live_prices(&self, symbols: &[String]) -> TrackerResult<HashMap<String, f64>> {
        match self.fetch_mode {
            PriceFetchMode::Bulk => self.bulk_prices(symbols).await,
            PriceFetchMode::PerSymbol => self.per_symbol_prices(symbols).await,
        }
    }
}

#[async_trait]
impl CloseSource for BinanceClient {
    async fn close_price(
        &self,
        symbol: &str,
        window: LookbackWindow,
    ) -> TrackerResult<Option<f64>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", "1d".to_string()),
            ("startTime", window.start_ms.to_string()),
            ("endTime", window.end_ms.to_string()),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get_json("/api/v3/klines", &query).await?;
        close_from_klines(&rows)
    }
}

async fn error_for_response(resp: reqwest::Response) -> TrackerResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    // 418 is Binance's ban escalation of repeated 429s; both back off.
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(TrackerError::RateLimited { retry_after });
    }

    let body = resp.text().await.unwrap_or_default();
    Err(TrackerError::Status {
        status: status.as_u16(),
        body: body.chars().take(256).collect(),
    })
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
struct SymbolDescriptor {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    #[serde(deserialize_with = "de_f64")]
    price: f64,
}

/// Closing price is the 5th field of the first (and with `limit=1`, only)
/// candle record.
fn close_from_klines(rows: &[Vec<Value>]) -> TrackerResult<Option<f64>> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let close = first.get(4).ok_or_else(|| {
        TrackerError::Malformed(format!(
            "kline record has {} fields, expected close at index 4",
            first.len()
        ))
    })?;

    match close {
        Value::String(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|e| TrackerError::Malformed(format!("non-numeric close '{s}': {e}"))),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| TrackerError::Malformed(format!("non-numeric close {n}"))),
        other => Err(TrackerError::Malformed(format!(
            "unexpected close value {other}"
        ))),
    }
}

fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(num) => num
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("invalid f64")),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid f64: {e}"))),
        other => Err(serde::de::Error::custom(format!(
            "unexpected value for f64: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_info_parses_symbol_listing() {
        let raw = r#"{"timezone":"UTC","symbols":[{"symbol":"AAAUSDT","status":"TRADING"},{"symbol":"AAABTC","status":"TRADING"}]}"#;
        let info: ExchangeInfo = serde_json::from_str(raw).expect("parse exchangeInfo");
        let symbols: Vec<&str> = info.symbols.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAAUSDT", "AAABTC"]);
    }

    #[test]
    fn exchange_info_without_symbols_key_is_a_parse_failure() {
        let raw = r#"{"code":-1003,"msg":"Too many requests"}"#;
        assert!(serde_json::from_str::<ExchangeInfo>(raw).is_err());
    }

    #[test]
    fn ticker_price_accepts_string_and_numeric_prices() {
        let raw = r#"{"symbol":"AAAUSDT","price":"1.2300"}"#;
        let ticker: TickerPrice = serde_json::from_str(raw).expect("parse ticker");
        assert_eq!(ticker.symbol, "AAAUSDT");
        assert!((ticker.price - 1.23).abs() < 1e-12);

        let raw = r#"{"symbol":"AAAUSDT","price":1.23}"#;
        let ticker: TickerPrice = serde_json::from_str(raw).expect("parse ticker");
        assert!((ticker.price - 1.23).abs() < 1e-12);
    }

    #[test]
    fn close_is_extracted_from_fifth_kline_field() {
        let raw = r#"[[1769299200000,"1.1900","1.2500","1.1800","1.2000","1000.0",1769385599999,"1200.0",42,"500.0","600.0","0"]]"#;
        let rows: Vec<Vec<Value>> = serde_json::from_str(raw).unwrap();
        assert_eq!(close_from_klines(&rows).unwrap(), Some(1.20));
    }

    #[test]
    fn empty_kline_array_yields_no_close() {
        assert_eq!(close_from_klines(&[]).unwrap(), None);
    }

    #[test]
    fn truncated_kline_record_is_malformed() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(r#"[[1769299200000,"1.19"]]"#).unwrap();
        let err = close_from_klines(&rows).unwrap_err();
        assert!(matches!(err, TrackerError::Malformed(_)));
    }

    #[test]
    fn non_numeric_close_is_malformed() {
        let rows: Vec<Vec<Value>> =
            serde_json::from_str(r#"[[0,"a","b","c","not-a-price","v"]]"#).unwrap();
        let err = close_from_klines(&rows).unwrap_err();
        assert!(matches!(err, TrackerError::Malformed(_)));
    }

    #[test]
    fn client_builds_from_default_config() {
        let cfg = BinanceConfig::default();
        let client = BinanceClient::from_config(&cfg).unwrap();
        assert_eq!(client.base_url, "https://api.binance.us");
    }

    #[test]
    fn invalid_proxy_url_is_a_config_error() {
        let cfg = BinanceConfig {
            proxy_url: Some("::not a proxy::".to_string()),
            ..BinanceConfig::default()
        };
        let err = BinanceClient::from_config(&cfg).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }
}
