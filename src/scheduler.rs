use std::time::Duration;

use crate::backfill::{self, CloseSource};
use crate::config::PollerConfig;
use crate::discovery::{self, InstrumentSource};
use crate::ops::shutdown::Shutdown;
use crate::ops::OpsState;
use crate::prices::{self, PriceSource};
use crate::publish::{SheetPublisher, SheetWriter};
use crate::report;
use crate::retry::RetryPolicy;
use crate::time::{format_sheet_timestamp, now_ms, now_s, LookbackWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { rows: usize, chunks_failed: usize },
    SkippedNoInstruments,
    SkippedDiscoveryFailed,
}

/// Periodic discover → fetch → backfill → merge → publish loop.
///
/// Every entity built here is cycle-scoped; the instrument set is replaced
/// wholesale each pass and nothing is carried across cycles but the timer.
pub struct PollLoop<M, W> {
    market: M,
    publisher: SheetPublisher<W>,
    quote_suffix: String,
    cfg: PollerConfig,
    policy: RetryPolicy,
    ops: OpsState,
}

impl<M, W> PollLoop<M, W>
where
    M: InstrumentSource + PriceSource + CloseSource,
    W: SheetWriter,
{
    pub fn new(
        market: M,
        publisher: SheetPublisher<W>,
        quote_suffix: String,
        cfg: PollerConfig,
        ops: OpsState,
    ) -> Self {
        let policy = RetryPolicy::new(
            cfg.retry_max_attempts,
            Duration::from_millis(cfg.retry_base_delay_ms),
            Duration::from_millis(cfg.retry_max_delay_ms),
        );
        Self {
            market,
            publisher,
            quote_suffix,
            cfg,
            policy,
            ops,
        }
    }

    /// Runs cycles on the configured interval until shutdown fires.
    pub async fn run(self, shutdown: Shutdown) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.cfg.interval_s));
        // An overrunning cycle is followed by a full interval, not an
        // immediate catch-up tick.
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.clone().wait() => {
                    tracing::info!(target: "scheduler", "poll loop received shutdown");
                    return;
                }
                _ = tick.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        self.ops.health.cycle_started();
        let started = std::time::Instant::now();

        let outcome = self.cycle().await;

        self.ops
            .metrics
            .cycle_duration_ms
            .observe(started.elapsed().as_millis() as f64);

        match outcome {
            CycleOutcome::Published {
                rows,
                chunks_failed,
            } => {
                self.ops.health.mark_published(rows, now_ms());
                self.ops.metrics.cycles_total.inc();
                self.ops.metrics.rows_published_total.inc_by(rows as u64);
                self.ops
                    .metrics
                    .publish_chunk_failures_total
                    .inc_by(chunks_failed as u64);
                tracing::info!(target: "scheduler", rows, chunks_failed, "cycle published");
            }
            CycleOutcome::SkippedNoInstruments => {
                self.ops.health.mark_skipped();
                self.ops.metrics.cycles_skipped_total.inc();
                tracing::info!(
                    target: "scheduler",
                    "no instruments discovered; skipping publish"
                );
            }
            CycleOutcome::SkippedDiscoveryFailed => {
                self.ops.health.mark_skipped();
                self.ops.metrics.cycles_skipped_total.inc();
            }
        }

        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        let instruments =
            match discovery::discover_instruments(&self.market, &self.policy, &self.quote_suffix)
                .await
            {
                Ok(instruments) => instruments,
                Err(err) => {
                    tracing::warn!(
                        target: "scheduler",
                        error = %err,
                        "discovery failed; skipping cycle"
                    );
                    return CycleOutcome::SkippedDiscoveryFailed;
                }
            };

        if instruments.is_empty() {
            return CycleOutcome::SkippedNoInstruments;
        }
        self.ops
            .metrics
            .instruments_discovered
            .set(instruments.len() as i64);

        let window = LookbackWindow::ending_at(now_ms(), self.cfg.backfill_lookback_hours);
        let (live, closes) = tokio::join!(
            prices::fetch_prices(&self.market, &instruments),
            backfill::fetch_closes(
                &self.market,
                &instruments,
                self.cfg.backfill_batch_size,
                window
            ),
        );

        let updated_at = format_sheet_timestamp(now_s());
        let rows = report::build_report(&instruments, &live, &closes, &updated_at);
        let publish = self.publisher.publish(report::report_values(&rows)).await;

        CycleOutcome::Published {
            rows: rows.len(),
            chunks_failed: publish.chunks_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::config::AppConfig;
    use crate::error::{TrackerError, TrackerResult};
    use crate::publish::StartCell;
    use crate::time::LookbackWindow;

    use super::*;

    struct FakeMarket {
        symbols: Option<Vec<String>>,
        prices: HashMap<String, f64>,
        closes: HashMap<String, f64>,
        failing_closes: HashSet<String>,
    }

    impl FakeMarket {
        fn listing(symbols: &[&str]) -> Self {
            Self {
                symbols: Some(symbols.iter().map(|s| s.to_string()).collect()),
                prices: HashMap::new(),
                closes: HashMap::new(),
                failing_closes: HashSet::new(),
            }
        }

        fn unreachable_exchange() -> Self {
            Self {
                symbols: None,
                prices: HashMap::new(),
                closes: HashMap::new(),
                failing_closes: HashSet::new(),
            }
        }
    }

    #[async_trait]
    impl InstrumentSource for FakeMarket {
        async fn fetch_symbols(&self) -> TrackerResult<Vec<String>> {
            self.symbols
                .clone()
                .ok_or_else(|| TrackerError::Other("exchange unreachable".to_string()))
        }
    }

    #[async_trait]
    impl PriceSource for FakeMarket {
        async fn live_prices(&self, _symbols: &[String]) -> TrackerResult<HashMap<String, f64>> {
            Ok(self.prices.clone())
        }
    }

    #[async_trait]
    impl CloseSource for FakeMarket {
        async fn close_price(
            &self,
            symbol: &str,
            _window: LookbackWindow,
        ) -> TrackerResult<Option<f64>> {
            if self.failing_closes.contains(symbol) {
                return Err(TrackerError::Other("transport reset".to_string()));
            }
            Ok(self.closes.get(symbol).copied())
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        calls: Mutex<Vec<(String, Vec<Vec<Value>>)>>,
    }

    #[async_trait]
    impl<'a> SheetWriter for &'a RecordingWriter {
        async fn write_range(&self, range: &str, values: &[Vec<Value>]) -> TrackerResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((range.to_string(), values.to_vec()));
            Ok(())
        }
    }

    fn poll_loop<'a>(
        market: FakeMarket,
        writer: &'a RecordingWriter,
    ) -> PollLoop<FakeMarket, &'a RecordingWriter> {
        let cfg = AppConfig::default();
        let publisher = SheetPublisher::new(
            writer,
            StartCell::parse("A1").unwrap(),
            cfg.sheet.chunk_rows,
            Duration::from_secs(cfg.sheet.chunk_retry_delay_s),
        );
        PollLoop::new(
            market,
            publisher,
            "USDT".to_string(),
            cfg.poller.clone(),
            OpsState::new(&cfg),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn empty_discovery_skips_the_publish() {
        let writer = RecordingWriter::default();
        // Listing only holds a non-matching quote currency.
        let poller = poll_loop(FakeMarket::listing(&["AAABTC"]), &writer);

        let outcome = poller.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::SkippedNoInstruments);
        assert!(writer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_discovery_skips_the_publish() {
        let writer = RecordingWriter::default();
        let poller = poll_loop(FakeMarket::unreachable_exchange(), &writer);

        let outcome = poller.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::SkippedDiscoveryFailed);
        assert!(writer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_merges_partial_results_with_fault_isolation() {
        let writer = RecordingWriter::default();
        let mut market = FakeMarket::listing(&["AAAUSDT", "BBBUSDT"]);
        market.prices = HashMap::from([("AAAUSDT".to_string(), 1.23)]);
        market.closes = HashMap::from([("AAAUSDT".to_string(), 1.20)]);
        market.failing_closes = HashSet::from(["BBBUSDT".to_string()]);
        let poller = poll_loop(market, &writer);

        let outcome = poller.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Published {
                rows: 2,
                chunks_failed: 0
            }
        );

        let calls = writer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (range, values) = &calls[0];
        assert_eq!(range, "A1");
        assert_eq!(values.len(), 3);
        assert_eq!(
            values[0],
            vec![
                json!("Symbol"),
                json!("Price"),
                json!("Last Close"),
                json!("Updated At")
            ]
        );
        assert_eq!(values[1][..3], [json!("AAAUSDT"), json!(1.23), json!(1.20)]);
        assert_eq!(values[2][..3], [json!("BBBUSDT"), json!("N/A"), json!("N/A")]);
        // Both rows carry the same cycle timestamp.
        assert!(values[1][3].is_string());
        assert_eq!(values[1][3], values[2][3]);
    }

    #[tokio::test(start_paused = true)]
    async fn rows_follow_discovery_order() {
        let writer = RecordingWriter::default();
        let poller = poll_loop(
            FakeMarket::listing(&["CCCUSDT", "AAAUSDT", "BBBUSDT"]),
            &writer,
        );

        poller.run_cycle().await;

        let calls = writer.calls.lock().unwrap();
        let symbols: Vec<&Value> = calls[0].1[1..].iter().map(|row| &row[0]).collect();
        assert_eq!(
            symbols,
            vec![&json!("CCCUSDT"), &json!("AAAUSDT"), &json!("BBBUSDT")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_shutdown_fires() {
        let writer = RecordingWriter::default();
        let poller = poll_loop(FakeMarket::listing(&[]), &writer);

        let (trigger, shutdown) = crate::ops::shutdown::channel();
        trigger.trigger();
        poller.run(shutdown).await;
    }
}
