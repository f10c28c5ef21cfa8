// SPDX-License-Identifier: GPL-3.0

//! Streaming grounded search against the Gemini API.
//!
//! Consumes the server-sent-events stream of a streamGenerateContent call
//! and folds it into a growing sequence of result snapshots: cumulative text
//! plus the deduplicated web references the model cited so far. Failures
//! never escape this module; every failure path degrades to one final
//! descriptive snapshot so the consumer only ever handles snapshots.

use crate::gemini::{Content, GenerateRequest, GenerateResponse, Part};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// SSE payload marker; lines without it are noise.
const DATA_PREFIX: &str = "data: ";

/// End-of-stream sentinel some servers append. Discarded, not an error.
const DONE_SENTINEL: &str = "[DONE]";

/// Placeholder text when the stream closes without yielding anything.
const NO_RESULT_TEXT: &str = "Unable to retrieve search results.";

/// A web source the model cited for generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Source page title; may be empty.
    pub title: String,
    /// Source URL; the dedup key, unique within a snapshot.
    pub url: String,
}

/// One self-consistent view of the search result, emitted per decoded chunk.
///
/// Snapshots are append-only: each snapshot's text extends the previous one,
/// and references keep their first-seen position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSnapshot {
    /// Cumulative generated text.
    pub text: String,
    /// Cited web sources, deduplicated by URL, in first-appearance order.
    pub references: Vec<Reference>,
}

impl SearchSnapshot {
    /// Terminal snapshot carrying a failure description.
    fn message(text: String) -> Self {
        Self {
            text,
            references: Vec::new(),
        }
    }
}

/// Running state of one search invocation, folded one stream line at a time.
///
/// Owning the state explicitly (rather than capturing buffers in the
/// transport loop) keeps the whole accumulation testable without a network.
#[derive(Debug, Default)]
pub struct Accumulator {
    text: String,
    references: Vec<Reference>,
    emitted: usize,
}

impl Accumulator {
    /// Fold one raw stream line into the state.
    ///
    /// Returns a snapshot for every successfully decoded chunk, even one
    /// that contributed no new text or references. Noise lines, the
    /// `[DONE]` sentinel, and undecodable payloads return `None`; a single
    /// malformed chunk never aborts the stream.
    pub fn step(&mut self, line: &str) -> Option<SearchSnapshot> {
        let payload = line.strip_prefix(DATA_PREFIX)?;
        if payload == DONE_SENTINEL {
            return None;
        }

        let chunk: GenerateResponse = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "skipping malformed search chunk");
                return None;
            }
        };

        self.absorb(chunk);
        self.emitted += 1;
        Some(SearchSnapshot {
            text: self.text.clone(),
            references: self.references.clone(),
        })
    }

    /// Merge one decoded chunk. Missing fields mean nothing to extract.
    fn absorb(&mut self, chunk: GenerateResponse) {
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return;
        };

        if let Some(metadata) = candidate.grounding_metadata {
            for grounding in metadata.grounding_chunks {
                let Some(web) = grounding.web else { continue };
                let Some(url) = web.uri else { continue };
                if url.is_empty() || self.references.iter().any(|r| r.url == url) {
                    continue;
                }
                self.references.push(Reference {
                    title: web.title.unwrap_or_default(),
                    url,
                });
            }
        }

        if let Some(content) = candidate.content
            && let Some(part) = content.parts.first()
            && let Some(text) = &part.text
        {
            self.text.push_str(text);
        }
    }

    /// Fallback snapshot for a stream that closed without a single emission.
    pub fn finish(self) -> Option<SearchSnapshot> {
        (self.emitted == 0).then(|| SearchSnapshot::message(NO_RESULT_TEXT.to_string()))
    }
}

/// Client for streaming grounded search requests.
pub struct SearchClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl SearchClient {
    /// Create a search client against the production API host.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, crate::gemini::GEMINI_API_BASE)
    }

    /// Create a search client against a custom host (self-hosted proxy, tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Run a grounded search, streaming result snapshots as they build up.
    ///
    /// The caller guarantees a non-empty query. The returned receiver yields
    /// one snapshot per decoded chunk; the channel closes when the stream
    /// ends. Dropping the receiver cancels the search and closes the
    /// connection.
    pub async fn streaming_search(&self, query: &str) -> mpsc::Receiver<SearchSnapshot> {
        let (tx, rx) = mpsc::channel(32);

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            self.model,
            urlencoding::encode(&self.api_key)
        );
        let request = GenerateRequest::grounded(vec![Content {
            parts: vec![Part::text(query)],
            role: None,
        }]);
        let http = self.http.clone();

        tokio::spawn(async move {
            let response = match http.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx
                        .send(SearchSnapshot::message(format!("Search error: {}", e)))
                        .await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(SearchSnapshot::message(format!(
                        "Search failed: HTTP {} - {}",
                        status, body
                    )))
                    .await;
                return;
            }

            debug!(%status, "search stream opened");

            let mut stream = response.bytes_stream();
            let mut accumulator = Accumulator::default();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(SearchSnapshot::message(format!("Search error: {}", e)))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                // Decode complete lines only; a read boundary can split one.
                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    if let Some(snapshot) = accumulator.step(line.trim_end())
                        && tx.send(snapshot).await.is_err()
                    {
                        return; // Receiver dropped
                    }
                }
            }

            // Trailing line without a final newline
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).to_string();
                if let Some(snapshot) = accumulator.step(line.trim_end())
                    && tx.send(snapshot).await.is_err()
                {
                    return;
                }
            }

            if let Some(fallback) = accumulator.finish() {
                let _ = tx.send(fallback).await;
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CHUNK_HELLO: &str = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hello"}]},"groundingMetadata":{"groundingChunks":[{"web":{"title":"Ex","uri":"https://ex.com"}}]}}]}"#;
    const CHUNK_WORLD: &str = r#"data: {"candidates":[{"content":{"parts":[{"text":" world"}]}}]}"#;

    #[test]
    fn text_grows_monotonically() {
        let mut accumulator = Accumulator::default();

        let first = accumulator.step(CHUNK_HELLO).unwrap();
        let second = accumulator.step(CHUNK_WORLD).unwrap();

        assert_eq!(first.text, "Hello");
        assert_eq!(second.text, "Hello world");
        assert!(second.text.starts_with(&first.text));
    }

    #[test]
    fn references_dedup_and_keep_first_seen_order() {
        let mut accumulator = Accumulator::default();

        let repeat = r#"data: {"candidates":[{"groundingMetadata":{"groundingChunks":[{"web":{"title":"Ex again","uri":"https://ex.com"}},{"web":{"title":"Other","uri":"https://other.com"}}]}}]}"#;

        let first = accumulator.step(CHUNK_HELLO).unwrap();
        let second = accumulator.step(repeat).unwrap();

        assert_eq!(first.references.len(), 1);
        assert_eq!(second.references.len(), 2);
        // First-seen entry keeps its index and its original title
        assert_eq!(second.references[0].url, "https://ex.com");
        assert_eq!(second.references[0].title, "Ex");
        assert_eq!(second.references[1].url, "https://other.com");
    }

    #[test]
    fn reference_without_url_is_dropped() {
        let mut accumulator = Accumulator::default();

        let line = r#"data: {"candidates":[{"groundingMetadata":{"groundingChunks":[{"web":{"title":"No link","uri":""}},{"web":{"title":"No uri at all"}}]}}]}"#;
        let snapshot = accumulator.step(line).unwrap();

        assert!(snapshot.references.is_empty());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let mut accumulator = Accumulator::default();

        assert!(accumulator.step(CHUNK_HELLO).is_some());
        assert!(accumulator.step("data: {not json").is_none());
        let last = accumulator.step(CHUNK_WORLD).unwrap();

        assert_eq!(last.text, "Hello world");
    }

    #[test]
    fn noise_lines_and_done_sentinel_are_ignored() {
        let mut accumulator = Accumulator::default();

        assert!(accumulator.step("").is_none());
        assert!(accumulator.step(": keep-alive").is_none());
        assert!(accumulator.step("event: message").is_none());
        assert!(accumulator.step("data: [DONE]").is_none());
    }

    #[test]
    fn chunk_with_nothing_to_extract_still_emits() {
        let mut accumulator = Accumulator::default();

        accumulator.step(CHUNK_HELLO).unwrap();
        let snapshot = accumulator.step(r#"data: {"candidates":[{}]}"#).unwrap();

        // Accumulators unchanged, but the snapshot is still produced
        assert_eq!(snapshot.text, "Hello");
        assert_eq!(snapshot.references.len(), 1);
    }

    #[test]
    fn finish_yields_placeholder_only_when_nothing_was_emitted() {
        let empty = Accumulator::default();
        let fallback = empty.finish().unwrap();
        assert_eq!(fallback.text, NO_RESULT_TEXT);
        assert!(fallback.references.is_empty());

        let mut used = Accumulator::default();
        used.step(CHUNK_HELLO).unwrap();
        assert!(used.finish().is_none());
    }

    // Serve exactly one connection with a canned HTTP response, then close.
    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    // Read the request headers plus a Content-Length body so the client is
    // never mid-write when the response goes out.
    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0);
        while request.len() < header_end + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
    }

    fn sse_response(lines: &[&str]) -> String {
        let body: String = lines.iter().map(|line| format!("{}\n\n", line)).collect();
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{}",
            body
        )
    }

    async fn collect(mut rx: mpsc::Receiver<SearchSnapshot>) -> Vec<SearchSnapshot> {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = rx.recv().await {
            snapshots.push(snapshot);
        }
        snapshots
    }

    #[tokio::test]
    async fn streams_snapshots_end_to_end() {
        let base_url = serve_once(sse_response(&[CHUNK_HELLO, CHUNK_WORLD, "data: [DONE]"])).await;
        let client = SearchClient::with_base_url("test-key", "test-model", base_url);

        let snapshots = collect(client.streaming_search("hello world").await).await;

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].text, "Hello");
        assert_eq!(
            snapshots[0].references,
            vec![Reference {
                title: "Ex".to_string(),
                url: "https://ex.com".to_string(),
            }]
        );
        assert_eq!(snapshots[1].text, "Hello world");
        assert_eq!(snapshots[1].references, snapshots[0].references);
    }

    #[tokio::test]
    async fn http_error_becomes_single_terminal_snapshot() {
        let base_url = serve_once(
            "HTTP/1.1 429 Too Many Requests\r\ncontent-type: text/plain\r\ncontent-length: 12\r\nconnection: close\r\n\r\nrate limited"
                .to_string(),
        )
        .await;
        let client = SearchClient::with_base_url("test-key", "test-model", base_url);

        let snapshots = collect(client.streaming_search("anything").await).await;

        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].text.contains("429"));
        assert!(snapshots[0].text.contains("rate limited"));
        assert!(snapshots[0].references.is_empty());
    }

    #[tokio::test]
    async fn empty_stream_yields_one_placeholder() {
        let base_url = serve_once(sse_response(&[])).await;
        let client = SearchClient::with_base_url("test-key", "test-model", base_url);

        let snapshots = collect(client.streaming_search("anything").await).await;

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].text, NO_RESULT_TEXT);
        assert!(snapshots[0].references.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_becomes_terminal_snapshot() {
        // Bind then drop the listener so the port refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = SearchClient::with_base_url("test-key", "test-model", base_url);
        let snapshots = collect(client.streaming_search("anything").await).await;

        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].text.starts_with("Search error:"));
    }
}
