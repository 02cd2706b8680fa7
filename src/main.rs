mod backfill;
mod batch;
mod clients;
mod config;
mod discovery;
mod error;
mod ops;
mod prices;
mod publish;
mod report;
mod retry;
mod scheduler;
mod time;

use std::time::Duration;

use crate::error::TrackerResult;

#[tokio::main]
async fn main() -> TrackerResult<()> {
    let cfg = config::load_config()?;
    ops::logging::init_with_default(&cfg.infra.log_level);
    let ops_state = ops::OpsState::new(&cfg);
    let (_shutdown_trigger, shutdown) = ops::start_http_servers(&cfg, ops_state.clone());

    tracing::info!(
        target: "boot",
        spreadsheet = %cfg.sheet.spreadsheet_name,
        interval_s = cfg.poller.interval_s,
        quote_suffix = %cfg.binance.quote_suffix,
        "binance-sheet-tracker starting"
    );

    let binance = clients::binance::BinanceClient::from_config(&cfg.binance)?;
    let sheets = clients::sheets::SheetsClient::from_config(&cfg.sheet)?;
    let start_cell = publish::StartCell::parse(&cfg.sheet.start_cell)?;
    let publisher = publish::SheetPublisher::new(
        sheets,
        start_cell,
        cfg.sheet.chunk_rows,
        Duration::from_secs(cfg.sheet.chunk_retry_delay_s),
    );

    let poller = scheduler::PollLoop::new(
        binance,
        publisher,
        cfg.binance.quote_suffix.clone(),
        cfg.poller.clone(),
        ops_state,
    );
    poller.run(shutdown).await;

    tracing::info!(target: "shutdown", "poll loop stopped");
    Ok(())
}
