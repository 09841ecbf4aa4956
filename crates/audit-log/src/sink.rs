use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// Errors raised while opening the JSON-lines file.
#[derive(Debug, thiserror::Error)]
pub enum JsonLinesError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open log file: {0}")]
    OpenFile(std::io::Error),
}

/// The background writer has stopped; the record was not accepted.
#[derive(Debug, thiserror::Error)]
#[error("json-lines sink is closed")]
pub struct SinkClosed;

/// A cheap, cloneable handle used to submit records into a background
/// JSON-lines writer.
///
/// `JsonLinesSink` is `Clone + Send + Sync` so it can be shared freely across
/// tasks and components.
pub struct JsonLinesSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for JsonLinesSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for JsonLinesSink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> JsonLinesSink<T>
where
    T: Serialize + Send + 'static,
{
    /// Spawn the background writer task and return a `(sink, join_handle)` pair.
    ///
    /// The writer opens (or creates) the file at `path` in append mode and
    /// begins draining records from the internal channel. The background task
    /// will:
    ///
    /// * Write each record as one newline-terminated JSON object.
    /// * Flush periodically (every ~1 second of channel inactivity).
    /// * Flush once more when the last sink clone is dropped and the channel
    ///   closes, then exit cleanly.
    ///
    /// Serialization and I/O errors are logged via `tracing::error` and the
    /// record is skipped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), JsonLinesError> {
        let (tx, rx) = mpsc::channel::<T>(CHANNEL_BUFFER);

        let file = open_append(path.as_ref()).await?;

        let handle = tokio::spawn(run_writer_loop(file, rx));

        Ok((Self { tx }, handle))
    }

    /// Send a record to the background writer.
    ///
    /// Waits asynchronously while the channel is full. Fails only if the
    /// background task has already exited.
    pub async fn send(&self, record: T) -> Result<(), SinkClosed> {
        self.tx.send(record).await.map_err(|_| SinkClosed)
    }

    /// Like [`send`](Self::send), but a closed sink only logs a warning.
    pub async fn log(&self, record: T) {
        if self.send(record).await.is_err() {
            tracing::warn!("json-lines sink channel closed; record dropped");
        }
    }
}

/// Open (or create) `path` in append mode, creating parent directories.
async fn open_append(path: &Path) -> Result<tokio::fs::File, JsonLinesError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(JsonLinesError::CreateDir)?;
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(JsonLinesError::OpenFile)
}

/// Serialise a record into one newline-terminated JSON line.
fn encode_line<T: Serialize>(record: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// Core loop executed inside the background task.
///
/// Reads records from the channel and appends them to the file. When the
/// channel has no records ready for [`FLUSH_INTERVAL_SECS`] the file is
/// flushed. On channel close a final flush is performed.
async fn run_writer_loop<T: Serialize>(mut file: tokio::fs::File, mut rx: mpsc::Receiver<T>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        let maybe_record = tokio::time::timeout(flush_interval, rx.recv()).await;

        match maybe_record {
            Ok(Some(record)) => {
                let line = match encode_line(&record) {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::error!(%err, "failed to serialize json-lines record");
                        continue;
                    }
                };
                if let Err(err) = file.write_all(&line).await {
                    tracing::error!(%err, "failed to write json-lines record");
                } else {
                    dirty = true;
                }
            }
            // Channel closed: final flush and exit.
            Ok(None) => {
                if dirty {
                    if let Err(err) = file.flush().await {
                        tracing::error!(%err, "failed to flush json-lines file on shutdown");
                    }
                }
                tracing::debug!("json-lines writer task shutting down");
                return;
            }
            Err(_) => {
                if dirty {
                    if let Err(err) = file.flush().await {
                        tracing::error!(%err, "periodic json-lines flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_written_as_json_lines() {
        let path = std::env::temp_dir()
            .join(format!("rulegate-sink-{}", uuid::Uuid::new_v4()))
            .join("out.jsonl");

        let (sink, handle) = JsonLinesSink::<serde_json::Value>::start(&path)
            .await
            .unwrap();
        sink.log(serde_json::json!({"n": 1})).await;
        sink.send(serde_json::json!({"n": 2})).await.unwrap();
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})]);

        if let Some(dir) = path.parent() {
            tokio::fs::remove_dir_all(dir).await.ok();
        }
    }

    #[tokio::test]
    async fn records_need_not_be_sync() {
        // `Cell` is `Send` but not `Sync`.
        let path = std::env::temp_dir().join(format!("rulegate-sink-{}.jsonl", uuid::Uuid::new_v4()));
        let (sink, handle) = JsonLinesSink::<std::cell::Cell<u32>>::start(&path)
            .await
            .unwrap();
        sink.send(std::cell::Cell::new(7)).await.unwrap();
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.ok();
        assert_eq!(contents, "7\n");
    }

    #[tokio::test]
    async fn send_fails_after_writer_exits() {
        let path = std::env::temp_dir().join(format!("rulegate-sink-{}.jsonl", uuid::Uuid::new_v4()));
        let (sink, handle) = JsonLinesSink::<serde_json::Value>::start(&path)
            .await
            .unwrap();
        handle.abort();
        let _ = handle.await;

        let result = sink.send(serde_json::json!({})).await;
        assert!(result.is_err());
        tokio::fs::remove_file(&path).await.ok();
    }
}
