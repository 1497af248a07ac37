//! Line-delimited JSON front end for the worker channel
//!
//! Each input line is one request; each request that expects a reply gets
//! exactly one output line, in order. Unparseable lines get an
//! `{"error": ...}` line so the peer can keep its replies aligned.

use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

use super::{FlushAck, FlushReply, QueueSizeReply, WorkerClient, WorkerReply, WorkerRequest};

/// Serve requests from `reader` until EOF. Returns the number of requests
/// handed to the worker.
pub async fn serve_lines<R, W>(client: &WorkerClient, reader: R, mut writer: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: WorkerRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed worker request");
                let reply = json!({ "error": format!("invalid request: {}", e) });
                write_line(&mut writer, &reply).await?;
                continue;
            }
        };
        served += 1;

        match request {
            WorkerRequest::GetQueueSize => {
                let size = client.queue_size().await;
                write_line(&mut writer, &WorkerReply::QueueSize(QueueSizeReply { size })).await?;
            }
            WorkerRequest::FlushAnalytics => {
                let reply = match client.flush().await {
                    FlushAck::Confirmed(reply) => reply,
                    FlushAck::Unconfirmed => FlushReply {
                        success: false,
                        delivered: 0,
                        attempted: 0,
                    },
                };
                write_line(&mut writer, &WorkerReply::Flush(reply)).await?;
            }
            request @ WorkerRequest::TrackEvent(_) => {
                // Waits for channel room so a burst of input is not dropped
                if let Err(e) = client.request(request).await {
                    tracing::warn!(error = %e, "TRACK_EVENT not handed to worker");
                }
            }
        }
    }

    writer.flush().await?;
    Ok(served)
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::db::QueueHandle;
    use crate::delivery::{Endpoint, FlushEngine, Transport};
    use crate::identity::IdentityProvider;
    use crate::tracker::Tracker;
    use crate::types::EventRecord;
    use crate::worker::BackgroundWorker;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    struct AcceptAll;

    #[async_trait]
    impl Transport for AcceptAll {
        async fn send(&self, _endpoint: Endpoint, _events: &[EventRecord]) -> Result<()> {
            Ok(())
        }

        fn send_beacon(&self) {}
    }

    fn replies(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serves_requests_in_order() {
        let queue = QueueHandle::in_memory().unwrap();
        let tracker = Tracker::new(queue.clone(), IdentityProvider::new(IdentityConfig::default()));
        let worker = BackgroundWorker::new(FlushEngine::new(queue.clone(), Arc::new(AcceptAll)), tracker);
        let (client, _task) = worker.spawn(8, Duration::from_secs(5));

        tracker_event(&queue).await;

        let input = concat!(
            "{\"type\":\"GET_QUEUE_SIZE\"}\n",
            "not json\n",
            "\n",
            "{\"type\":\"FLUSH_ANALYTICS\"}\n",
            "{\"type\":\"GET_QUEUE_SIZE\"}\n",
        );
        let mut output = Vec::new();
        let served = serve_lines(&client, BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        assert_eq!(served, 3);
        let replies = replies(&output);
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0], json!({ "size": 1 }));
        assert!(replies[1]["error"].as_str().unwrap().starts_with("invalid request"));
        assert_eq!(
            replies[2],
            json!({ "success": true, "delivered": 1, "attempted": 1 })
        );
        assert_eq!(replies[3], json!({ "size": 0 }));
    }

    async fn tracker_event(queue: &QueueHandle) {
        let tracker = Tracker::new(queue.clone(), IdentityProvider::new(IdentityConfig::default()));
        tracker.track_error("boom", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_fallback_replies_when_worker_is_silent() {
        let (tx, _inbox) = mpsc::channel(4);
        let client = WorkerClient::new(tx, Duration::from_millis(30));

        let input = "{\"type\":\"GET_QUEUE_SIZE\"}\n{\"type\":\"FLUSH_ANALYTICS\"}\n";
        let mut output = Vec::new();
        serve_lines(&client, BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let replies = replies(&output);
        assert_eq!(replies[0], json!({ "size": 0 }));
        assert_eq!(replies[1]["success"], false);
    }

    #[tokio::test]
    async fn test_track_events_beyond_channel_capacity_are_kept() {
        let queue = QueueHandle::in_memory().unwrap();
        let tracker = Tracker::new(queue.clone(), IdentityProvider::new(IdentityConfig::default()));
        let worker = BackgroundWorker::new(FlushEngine::new(queue.clone(), Arc::new(AcceptAll)), tracker);
        let (client, _task) = worker.spawn(4, Duration::from_secs(5));

        let line = "{\"type\":\"TRACK_EVENT\",\"data\":{\"type\":\"feature_usage\",\"data\":{\"feature\":\"search\"}}}\n";
        let input = line.repeat(50);
        let mut output = Vec::new();
        let served = serve_lines(&client, BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        assert_eq!(served, 50);
        assert!(output.is_empty());

        let mut queued = 0;
        for _ in 0..200 {
            queued = queue.count_unsynced().await.unwrap();
            if queued == 50 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queued, 50);
    }
}
