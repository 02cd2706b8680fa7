use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::batch::chunk;
use crate::error::{TrackerError, TrackerResult};

/// Boundary to the tabular store. The real implementation speaks the
/// spreadsheet API; tests substitute a recorder.
#[async_trait]
pub trait SheetWriter: Send + Sync {
    async fn write_range(&self, range: &str, values: &[Vec<Value>]) -> TrackerResult<()>;
}

/// `A1`-style anchor for the published region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCell {
    column: String,
    row: usize,
}

impl StartCell {
    pub fn parse(cell: &str) -> TrackerResult<Self> {
        let cell = cell.trim();
        let digits_at = cell
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| bad_start_cell(cell))?;
        let (column, digits) = cell.split_at(digits_at);
        if column.is_empty() || !column.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(bad_start_cell(cell));
        }
        let row: usize = digits.parse().map_err(|_| bad_start_cell(cell))?;
        if row == 0 {
            return Err(bad_start_cell(cell));
        }
        Ok(Self {
            column: column.to_string(),
            row,
        })
    }

    fn range_at(&self, row_offset: usize) -> String {
        format!("{}{}", self.column, self.row + row_offset)
    }
}

fn bad_start_cell(cell: &str) -> TrackerError {
    TrackerError::Config(format!(
        "sheet.start_cell '{cell}' must be a cell reference like A1"
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub rows: usize,
    pub chunks_written: usize,
    pub chunks_failed: usize,
}

/// Writes the report region in chunks so a single oversized update cannot
/// trip the sink's own rate limits. Each failed chunk gets one delayed
/// retry, then is abandoned; later chunks are still attempted.
pub struct SheetPublisher<W> {
    writer: W,
    start: StartCell,
    chunk_rows: usize,
    retry_delay: Duration,
}

impl<W: SheetWriter> SheetPublisher<W> {
    pub fn new(writer: W, start: StartCell, chunk_rows: usize, retry_delay: Duration) -> Self {
        Self {
            writer,
            start,
            chunk_rows: chunk_rows.max(1),
            retry_delay,
        }
    }

    pub async fn publish(&self, values: Vec<Vec<Value>>) -> PublishOutcome {
        let rows = values.len();
        let mut outcome = PublishOutcome {
            rows,
            chunks_written: 0,
            chunks_failed: 0,
        };

        let mut row_offset = 0usize;
        for chunk_values in chunk(values, self.chunk_rows) {
            let range = self.start.range_at(row_offset);
            row_offset += chunk_values.len();

            match self.write_chunk(&range, &chunk_values).await {
                Ok(()) => outcome.chunks_written += 1,
                Err(err) => {
                    outcome.chunks_failed += 1;
                    tracing::warn!(
                        target: "publish",
                        range = %range,
                        rows = chunk_values.len(),
                        error = %err,
                        "chunk write abandoned"
                    );
                }
            }
        }

        outcome
    }

    async fn write_chunk(&self, range: &str, values: &[Vec<Value>]) -> TrackerResult<()> {
        match self.writer.write_range(range, values).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(
                    target: "publish",
                    range = %range,
                    retry_delay_ms = self.retry_delay.as_millis() as u64,
                    error = %err,
                    "chunk write failed; retrying once"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.writer.write_range(range, values).await
            }
        }
    }
}
