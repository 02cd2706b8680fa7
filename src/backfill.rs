use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::batch::chunk;
use crate::error::TrackerResult;
use crate::time::LookbackWindow;

/// Prior-period closing-price lookup for a single instrument.
///
/// `Ok(None)` means the upstream had no candle in the window; an `Err` is a
/// transport or parse failure. Both degrade to unavailable for that
/// instrument only.
#[async_trait]
pub trait CloseSource: Send + Sync {
    async fn close_price(&self, symbol: &str, window: LookbackWindow)
        -> TrackerResult<Option<f64>>;
}

/// Fetches one prior-period close per instrument in sequential batches of
/// `batch_size` concurrent requests. Batch N+1 is not issued until every
/// request of batch N has resolved.
pub async fn fetch_closes<S: CloseSource>(
    source: &S,
    symbols: &[String],
    batch_size: usize,
    window: LookbackWindow,
) -> HashMap<String, f64> {
    let mut closes = HashMap::with_capacity(symbols.len());

    for batch in chunk(symbols.to_vec(), batch_size.max(1)) {
        let results = join_all(batch.iter().map(|symbol| source.close_price(symbol, window))).await;

        for (symbol, result) in batch.iter().zip(results) {
            match result {
                Ok(Some(close)) => {
                    closes.insert(symbol.clone(), close);
                }
                Ok(None) => {
                    tracing::warn!(
                        target: "backfill",
                        symbol = %symbol,
                        "no candle in lookback window; close unavailable"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        target: "backfill",
                        symbol = %symbol,
                        error = %err,
                        "historical close fetch failed; close unavailable"
                    );
                }
            }
        }
    }

    closes
}
