//! Enrichment queue event stream.
//!
//! The backend pushes enrichment status changes as server-sent events. [`SseParser`]
//! turns raw body chunks into events; [`ApiClient::watch_enrichment`] drives it until
//! the stream ends or the caller cancels.

use crate::ApiClient;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use shelf_core::models::{EnrichmentQueueUpdate, ENRICHMENT_CONNECTED_EVENT, ENRICHMENT_UPDATE_EVENT};
use shelf_core::{UploadError, UploadResult};
use tokio_util::sync::CancellationToken;

const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental server-sent events parser.
///
/// Partial lines are kept across calls to [`SseParser::feed`], so chunk boundaries may
/// fall anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            // comment / keep-alive
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseEvent {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
        })
    }
}

impl ApiClient {
    /// Listen to enrichment updates of a list until `token` fires or the stream ends.
    ///
    /// Undecodable update payloads are logged and skipped.
    #[tracing::instrument(skip(self, token, on_update))]
    pub async fn watch_enrichment<F>(
        &self,
        list_id: &str,
        token: CancellationToken,
        mut on_update: F,
    ) -> UploadResult<()>
    where
        F: FnMut(EnrichmentQueueUpdate),
    {
        if list_id.trim().is_empty() {
            return Err(UploadError::InvalidInput(
                "List ID must not be empty".to_string(),
            ));
        }

        let url = self.build_public_url("/enrichment-queue-sse");
        let request = self.apply_auth(
            self.stream_client
                .get(&url)
                .query(&[("listId", list_id)])
                .header(ACCEPT, "text/event-stream"),
        );

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            response = request.send() => {
                response.map_err(|e| UploadError::BackendUnreachable(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(UploadError::Backend(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                chunk = stream.next() => chunk,
            };
            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(UploadError::BackendUnreachable(e.to_string())),
                None => break,
            };

            for event in parser.feed(&bytes) {
                match event.event.as_str() {
                    ENRICHMENT_CONNECTED_EVENT => {
                        tracing::info!(list_id = %list_id, "Enrichment stream connected")
                    }
                    ENRICHMENT_UPDATE_EVENT => {
                        match serde_json::from_str::<EnrichmentQueueUpdate>(&event.data) {
                            Ok(update) => on_update(update),
                            Err(e) => tracing::warn!(
                                error = %e,
                                "Failed to decode enrichment update"
                            ),
                        }
                    }
                    other => tracing::debug!(event = %other, "Ignoring stream event"),
                }
            }
        }

        tracing::info!(list_id = %list_id, "Enrichment stream closed");
        Ok(())
    }
}
