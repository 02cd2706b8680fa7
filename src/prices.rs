use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::TrackerResult;

/// Live-price lookup for a set of instruments. Implementations may answer
/// with a bulk call or per-instrument calls; either way the result only has
/// to cover the instruments the upstream actually returned.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn live_prices(&self, symbols: &[String]) -> TrackerResult<HashMap<String, f64>>;
}

/// Fetches live prices for `symbols`, degrading to an empty map on failure.
///
/// The returned map only holds instruments present in both `symbols` and the
/// upstream response; everything else is unavailable for this cycle.
pub async fn fetch_prices<S: PriceSource>(source: &S, symbols: &[String]) -> HashMap<String, f64> {
    if symbols.is_empty() {
        return HashMap::new();
    }

    match source.live_prices(symbols).await {
        Ok(prices) => restrict_to_requested(prices, symbols),
        Err(err) => {
            tracing::warn!(
                target: "prices",
                error = %err,
                "live price fetch failed; prices unavailable this cycle"
            );
            HashMap::new()
        }
    }
}

fn restrict_to_requested(
    mut prices: HashMap<String, f64>,
    symbols: &[String],
) -> HashMap<String, f64> {
    let requested: HashSet<&str> = symbols.iter().map(String::as_str).collect();
    prices.retain(|symbol, _| requested.contains(symbol.as_str()));
    prices
}

#[cfg(test)]
mod tests {
    use crate::error::TrackerError;

    use super::*;

    struct FixedPrices {
        prices: Option<HashMap<String, f64>>,
    }

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn live_prices(&self, _symbols: &[String]) -> TrackerResult<HashMap<String, f64>> {
            self.prices
                .clone()
                .ok_or_else(|| TrackerError::Other("feed down".to_string()))
        }
    }

    fn symbols(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn result_is_intersection_of_request_and_response() {
        let source = FixedPrices {
            prices: Some(HashMap::from([
                ("AAAUSDT".to_string(), 1.23),
                ("ZZZUSDT".to_string(), 9.99),
            ])),
        };

        let prices = fetch_prices(&source, &symbols(&["AAAUSDT", "BBBUSDT"])).await;

        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get("AAAUSDT"), Some(&1.23));
        assert!(!prices.contains_key("ZZZUSDT"));
        assert!(!prices.contains_key("BBBUSDT"));
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_empty_map() {
        let source = FixedPrices { prices: None };
        let prices = fetch_prices(&source, &symbols(&["AAAUSDT"])).await;
        assert!(prices.is_empty());
    }

    #[tokio::test]
    async fn empty_instrument_list_skips_the_call() {
        let source = FixedPrices {
            prices: Some(HashMap::from([("AAAUSDT".to_string(), 1.23)])),
        };
        let prices = fetch_prices(&source, &[]).await;
        assert!(prices.is_empty());
    }
}
