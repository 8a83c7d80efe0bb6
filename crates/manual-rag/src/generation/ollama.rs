//! Ollama client for embeddings and streaming answer generation

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::providers::llm::FragmentStream;

/// Instruction sent with every page image
const VISION_PROMPT: &str = "Analyze this technical diagram or image. Describe the components, \
connections, labels, and specific values visible. Be concise but detailed for a search engine.";

/// Ollama API client with automatic retry for embeddings
pub struct OllamaClient {
    /// HTTP client for request/response calls, bounded by a total timeout
    client: Client,
    /// HTTP client for streamed answers, bounded per read
    stream_client: Client,
    /// Configuration
    config: LlmConfig,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// One NDJSON line of a streaming `/api/generate` response
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct VisionRequest {
    model: String,
    prompt: &'static str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        // A long answer may stream for longer than `timeout`; only a stall fails it
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            config: config.clone(),
        })
    }

    /// Generation model name
    pub fn generate_model(&self) -> &str {
        &self.config.generate_model
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.config.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        let delay = Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::embedding("Unknown error")))
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding using Ollama with retry
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);
        let model = self.config.embed_model.clone();

        self.retry_request(|| {
            let request = self.authorize(self.client.post(&url)).json(&EmbedRequest {
                model: model.clone(),
                prompt: text.to_string(),
            });

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;

                if !response.status().is_success() {
                    return Err(Error::embedding(format!(
                        "Embedding failed: HTTP {}",
                        response.status()
                    )));
                }

                let embed_response: EmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::embedding(format!("Failed to parse embedding response: {}", e)))?;

                Ok(embed_response.embedding)
            }
        })
        .await
    }

    /// Describe one encoded image (JPEG or PNG) with the vision model
    pub async fn describe_image(&self, image: &[u8]) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = VisionRequest {
            model: self.config.vision_model.clone(),
            prompt: VISION_PROMPT,
            images: vec![BASE64.encode(image)],
            stream: false,
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::generation(format!("Vision request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::generation(format!(
                "Vision failed: HTTP {} - {}",
                status, body
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::generation(format!("Failed to parse vision response: {}", e)))?;

        let description = generated.response.trim();
        if description.is_empty() {
            return Err(Error::generation("Vision model returned an empty description"));
        }
        Ok(description.to_string())
    }

    /// Stream a completion for `prompt`.
    ///
    /// Nothing is sent until the returned stream is first polled. Dropping the
    /// stream drops the response body, which closes the connection.
    pub fn generate_stream(&self, prompt: String) -> FragmentStream {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = self.authorize(self.stream_client.post(&url)).json(&GenerateRequest {
            model: self.config.generate_model.clone(),
            prompt,
            stream: true,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        });
        let model = self.config.generate_model.clone();

        let connect = async move {
            tracing::info!("Generating answer with model: {}", model);

            let response = request
                .send()
                .await
                .map_err(|e| Error::generation(format!("Stream request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::generation(format!(
                    "Stream failed: HTTP {} - {}",
                    status, body
                )));
            }

            Ok(ndjson_fragments(response.bytes_stream()))
        };

        stream::once(connect).try_flatten().boxed()
    }
}

/// Incremental decoder for Ollama's NDJSON stream.
///
/// Byte chunks may split a line anywhere, so complete lines are parsed only
/// once their terminating newline has arrived.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the backend signalled completion (or an error)
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk; returns the fragments of every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while !self.done {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut out);
        }
        out
    }

    /// Flush a final line that arrived without a trailing newline
    pub fn finish(&mut self) -> Vec<Result<String>> {
        let mut out = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut out);
        }
        out
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Result<String>>) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match serde_json::from_str::<StreamChunk>(text) {
            Ok(chunk) => {
                if let Some(error) = chunk.error {
                    self.done = true;
                    out.push(Err(Error::generation(error)));
                    return;
                }
                if !chunk.response.is_empty() {
                    out.push(Ok(chunk.response));
                }
                if chunk.done {
                    self.done = true;
                }
            }
            Err(e) => {
                self.done = true;
                out.push(Err(Error::generation(format!("Malformed stream line: {}", e))));
            }
        }
    }
}

struct NdjsonState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

/// Turn a response body into a fragment stream
fn ndjson_fragments<S>(bytes: S) -> FragmentStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = NdjsonState {
        bytes: Box::pin(bytes),
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend(state.decoder.push(&chunk));
                    state.finished = state.decoder.is_done();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(Error::generation(format!("Stream error: {}", e))));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: Vec<Result<String>>) -> Vec<String> {
        items.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = NdjsonDecoder::new();
        let first = decoder.push(b"{\"response\":\"The pump\",\"done\":false}\n{\"respo");
        assert_eq!(texts(first), vec!["The pump"]);

        let second = decoder.push(b"nse\":\" runs [Page 3]\",\"done\":false}\n");
        assert_eq!(texts(second), vec![" runs [Page 3]"]);

        let last = decoder.push(b"{\"response\":\"\",\"done\":true}\n");
        assert!(last.is_empty());
        assert!(decoder.is_done());
    }

    #[test]
    fn test_decoder_surfaces_backend_error() {
        let mut decoder = NdjsonDecoder::new();
        let items = decoder.push(b"{\"error\":\"model not found\"}\n");
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(Error::Generation(msg)) if msg == "model not found"));
        assert!(decoder.is_done());
    }

    #[test]
    fn test_decoder_flushes_unterminated_line() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"response\":\"tail\",\"done\":true}").is_empty());
        assert_eq!(texts(decoder.finish()), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_ndjson_fragments_ends_with_body() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from_static(
            b"{\"response\":\"partial\",\"done\":false}\n",
        ))];
        let fragments: Vec<Result<String>> = ndjson_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "partial");
    }

    /// Local stand-in for Ollama's `/api/generate`: describes images, or
    /// streams four NDJSON lines 400 ms apart
    async fn fake_generate(
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> axum::response::Response {
        use axum::response::IntoResponse;

        if let Some(images) = body["images"].as_array() {
            let decoded = images
                .iter()
                .filter_map(|i| i.as_str())
                .filter_map(|i| BASE64.decode(i).ok())
                .map(|bytes| bytes.len().to_string())
                .collect::<Vec<_>>()
                .join(",");
            let text = format!("  model {} saw {} bytes  ", body["model"].as_str().unwrap_or(""), decoded);
            return axum::Json(serde_json::json!({ "response": text, "done": true })).into_response();
        }

        let lines = stream::unfold(0u32, |i| async move {
            if i == 4 {
                return None;
            }
            if i > 0 {
                sleep(Duration::from_millis(400)).await;
            }
            let line = format!("{{\"response\":\"part{} \",\"done\":{}}}\n", i, i == 3);
            Some((Ok::<_, std::convert::Infallible>(line), i + 1))
        });
        axum::body::Body::from_stream(lines).into_response()
    }

    async fn spawn_backend() -> String {
        let app = axum::Router::new().route("/api/generate", axum::routing::post(fake_generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    fn client_for(base_url: String) -> OllamaClient {
        OllamaClient::new(&LlmConfig {
            base_url,
            vision_model: "llava".to_string(),
            timeout_secs: 1,
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_outlasting_timeout_completes() {
        let client = client_for(spawn_backend().await);

        let fragments: Vec<Result<String>> =
            client.generate_stream("prompt".to_string()).collect().await;

        assert_eq!(texts(fragments).concat(), "part0 part1 part2 part3 ");
    }

    #[tokio::test]
    async fn test_describe_image_sends_base64_and_trims() {
        let client = client_for(spawn_backend().await);

        let description = client.describe_image(b"\xFF\xD8\xFFjpeg").await.unwrap();

        assert_eq!(description, "model llava saw 7 bytes");
    }

    #[tokio::test]
    async fn test_describe_image_unreachable_backend_fails() {
        let client = client_for("http://127.0.0.1:9".to_string());
        assert!(client.describe_image(b"jpeg").await.is_err());
    }
}
