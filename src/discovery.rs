use async_trait::async_trait;

use crate::error::TrackerResult;
use crate::retry::RetryPolicy;

/// Upstream exchange-metadata lookup. Returns every listed symbol; the
/// quote-suffix filter is applied here, not in the client.
#[async_trait]
pub trait InstrumentSource: Send + Sync {
    async fn fetch_symbols(&self) -> TrackerResult<Vec<String>>;
}

/// One discovery pass under the retry policy.
///
/// An `Err` means the metadata call kept failing until the policy gave up;
/// the caller must skip the cycle. An empty `Ok` list is a legitimate
/// zero-instrument result and is the caller's signal to skip publishing.
pub async fn discover_instruments<S: InstrumentSource>(
    source: &S,
    policy: &RetryPolicy,
    quote_suffix: &str,
) -> TrackerResult<Vec<String>> {
    let symbols = policy
        .run("exchange_info", move || source.fetch_symbols())
        .await?;
    let instruments = filter_by_suffix(symbols, quote_suffix);
    tracing::info!(
        target: "discovery",
        count = instruments.len(),
        suffix = quote_suffix,
        "instrument discovery complete"
    );
    Ok(instruments)
}

fn filter_by_suffix(symbols: Vec<String>, suffix: &str) -> Vec<String> {
    symbols.into_iter().filter(|s| s.ends_with(suffix)).collect()
}
