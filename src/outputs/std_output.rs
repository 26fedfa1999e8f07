use std::io::Write;

use async_trait::async_trait;

use super::OutputSink;
use crate::errors::SinkError;
use crate::message::JoinedBatch;

/// Write each joined batch to standard out as one line of JSON.
///
/// Writes block the engine's task, so this is meant for tests, demos
/// and piping into another process. Buffering is up to the writer;
/// it is flushed on [`OutputSink::complete`].
pub struct StdOutput<W = std::io::Stdout> {
    writer: W,
    complete: bool,
}

impl StdOutput {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl Default for StdOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdOutput<W>
where
    W: Write + Send,
{
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer,
            complete: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> OutputSink for StdOutput<W>
where
    W: Write + Send,
{
    async fn send(&mut self, batch: JoinedBatch) -> Result<(), SinkError> {
        if self.complete {
            return Err(SinkError::Completed);
        }
        let line = match serde_json::to_string(&batch) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!("Unable to encode joined batch {}: {err}", batch.offset);
                return Err(SinkError::Closed);
            }
        };
        writeln!(self.writer, "{line}").map_err(|err| {
            tracing::error!("Unable to write joined batch: {err}");
            SinkError::Closed
        })
    }

    fn complete(&mut self) {
        if !self.complete {
            self.complete = true;
            if let Err(err) = self.writer.flush() {
                tracing::warn!("Unable to flush output: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn writes_json_lines() {
        let t = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let mut out = StdOutput::with_writer(Vec::new());
        for seq in 0..2 {
            out.send(JoinedBatch {
                enqueued_time_utc: t,
                offset: seq.to_string(),
                partition_id: "p0".to_string(),
                sequence_number: seq,
                messages: vec![vec![Message::new("a", t, vec![])]],
            })
            .await
            .unwrap();
        }
        out.complete();

        let written = String::from_utf8(out.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["sequence_number"], 1);
    }

    #[tokio::test]
    async fn complete_flushes_buffered_writer() {
        let t = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let mut out = StdOutput::with_writer(std::io::BufWriter::new(Vec::new()));
        out.send(JoinedBatch {
            enqueued_time_utc: t,
            offset: "0".to_string(),
            partition_id: "p0".to_string(),
            sequence_number: 0,
            messages: vec![],
        })
        .await
        .unwrap();
        assert!(out.writer.get_ref().is_empty());

        out.complete();
        assert!(!out.writer.get_ref().is_empty());
        assert!(out.writer.buffer().is_empty());
        assert_eq!(
            out.send(JoinedBatch {
                enqueued_time_utc: t,
                offset: "1".to_string(),
                partition_id: "p0".to_string(),
                sequence_number: 1,
                messages: vec![],
            })
            .await,
            Err(SinkError::Completed)
        );
    }
}
