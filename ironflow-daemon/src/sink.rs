//! Record sink -- writes the outgoing flow record stream as JSON lines.
//!
//! The sink is the daemon's only consumer of the pipeline's outgoing queue.
//! It runs until the queue is closed (pipeline stopped and drained), so
//! awaiting it after `stop()` guarantees every record was written.

use ironflow_core::types::FlowMessage;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Write every record from `records` to `writer`, one JSON object per line.
///
/// Flushes whenever the queue is momentarily empty, so a slow trickle of
/// records is not held back by buffering.
///
/// Returns the number of records written.
///
/// # Errors
///
/// Returns the first serialization or write error; remaining records are
/// left in the queue.
pub async fn write_records<W>(
    mut records: mpsc::Receiver<FlowMessage>,
    writer: &mut W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let mut line = Vec::with_capacity(512);

    while let Some(record) = records.recv().await {
        encode(&record, &mut line)?;
        writer.write_all(&line).await?;
        written += 1;

        if records.is_empty() {
            writer.flush().await?;
        }
    }

    writer.flush().await?;
    tracing::debug!(records = written, "record sink finished");
    Ok(written)
}

fn encode(record: &FlowMessage, line: &mut Vec<u8>) -> std::io::Result<()> {
    line.clear();
    serde_json::to_writer(&mut *line, record)?;
    line.push(b'\n');
    Ok(())
}
