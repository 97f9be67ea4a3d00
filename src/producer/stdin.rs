//! JSON-lines batch source.
//!
//! Each line is one batch: a JSON array of sample objects. Used to pipe an
//! external generator in:
//! `kpi-simulator | kpi-sentinel --stdin`

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

use super::{BatchSource, SourceEvent};
use crate::types::Batch;

/// Reads batches from any buffered async reader, one JSON array per line.
pub struct JsonLinesSource<R> {
    reader: R,
    line_buffer: Vec<u8>,
    lines_read: u64,
    name: &'static str,
}

/// [`JsonLinesSource`] over the process's stdin.
pub type StdinSource = JsonLinesSource<BufReader<Stdin>>;

impl StdinSource {
    pub fn stdin() -> Self {
        JsonLinesSource::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> JsonLinesSource<R> {
    pub fn new(reader: R, name: &'static str) -> Self {
        Self {
            reader,
            line_buffer: Vec::with_capacity(64 * 1024),
            lines_read: 0,
            name,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> BatchSource for JsonLinesSource<R> {
    async fn next_batch(&mut self) -> Result<SourceEvent> {
        loop {
            self.line_buffer.clear();
            // Raw bytes so a line of invalid UTF-8 is skipped like any other bad line
            let bytes = self.reader.read_until(b'\n', &mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            self.lines_read += 1;

            let line = self.line_buffer.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Batch>(line) {
                Ok(batch) if batch.is_empty() => {
                    tracing::debug!(
                        line = self.lines_read,
                        "[JsonLinesSource] Skipping empty batch"
                    );
                }
                Ok(batch) => return Ok(SourceEvent::Batch(batch)),
                Err(e) => {
                    // Skip malformed lines and keep reading
                    tracing::warn!(
                        line = self.lines_read,
                        "[JsonLinesSource] Failed to parse batch: {}",
                        e
                    );
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        self.name
    }
}
