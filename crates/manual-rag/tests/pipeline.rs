//! End-to-end tests of retrieval, reranking, answer streaming and the HTTP API

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use manual_rag::config::{RagConfig, RetrievalConfig};
use manual_rag::providers::{
    EmbeddingProvider, FragmentStream, LexicalScorer, LlmProvider, LocalSimilarityIndex,
    RelevanceScorer, SimilarityIndex,
};
use manual_rag::server::{build_router, state::AppState};
use manual_rag::{
    AnswerGenerator, AnswerPipeline, Error, PassageRecord, QueryResponse, Result,
    RetrievalCoordinator,
};

const KEYWORDS: &[&str] = &["pump", "valve", "filter"];

/// One dimension per keyword occurrence count
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(KEYWORDS
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect())
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Answers from a script and records every prompt it receives
struct ScriptedLlm {
    fragments: Vec<Result<String>>,
    prompts: Mutex<Vec<String>>,
    produced: Arc<AtomicUsize>,
}

impl ScriptedLlm {
    fn new(fragments: Vec<Result<String>>) -> Self {
        Self {
            fragments,
            prompts: Mutex::new(Vec::new()),
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn answering(parts: &[&str]) -> Self {
        Self::new(parts.iter().map(|p| Ok(p.to_string())).collect())
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn stream_completion(&self, prompt: String) -> FragmentStream {
        self.prompts.lock().push(prompt);

        let items: Vec<Result<String>> = self
            .fragments
            .iter()
            .map(|f| match f {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::generation(e.to_string())),
            })
            .collect();
        let produced = Arc::clone(&self.produced);

        stream::iter(items)
            .inspect(move |_| {
                produced.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }
}

/// Scorer that always fails
struct BrokenScorer;

impl RelevanceScorer for BrokenScorer {
    fn score(&self, _query: &str, _passage: &str) -> Result<f32> {
        Err(Error::reranking("weights missing"))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

/// Index whose backend is down
struct OfflineIndex;

#[async_trait]
impl SimilarityIndex for OfflineIndex {
    async fn query(&self, _text: &str, _k: usize) -> Result<Vec<PassageRecord>> {
        Err(Error::retrieval("connection refused"))
    }

    async fn insert(&self, _records: Vec<PassageRecord>) -> Result<usize> {
        Err(Error::retrieval("connection refused"))
    }

    async fn len(&self) -> Result<usize> {
        Err(Error::retrieval("connection refused"))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

const PAGE_1: &str = "pump pump pump overview and specifications";
const PAGE_2: &str = "pump relief valve opens at 3 bar";
const PAGE_3: &str = "pump filter replacement interval";

async fn manual_index() -> Arc<LocalSimilarityIndex> {
    let index = LocalSimilarityIndex::in_memory(Arc::new(KeywordEmbedder));
    index
        .insert(vec![
            PassageRecord::new("pump.pdf", 1, PAGE_1),
            PassageRecord::new("pump.pdf", 2, PAGE_2),
            PassageRecord::new("pump.pdf", 3, PAGE_3),
        ])
        .await
        .unwrap();
    Arc::new(index)
}

fn widths(k_broad: usize, n_final: usize) -> RetrievalConfig {
    RetrievalConfig { k_broad, n_final }
}

fn answer_pipeline(
    index: Arc<dyn SimilarityIndex>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    llm: Arc<ScriptedLlm>,
    retrieval: RetrievalConfig,
) -> AnswerPipeline {
    let coordinator = RetrievalCoordinator::new(index, scorer, &retrieval).unwrap();
    AnswerPipeline::new(Arc::new(coordinator), Arc::new(AnswerGenerator::new(llm)))
}

#[tokio::test]
async fn test_reranker_selects_the_relevant_page() {
    let llm = Arc::new(ScriptedLlm::answering(&["It opens at 3 bar ", "[Page 2]."]));
    let pipeline = answer_pipeline(
        manual_index().await,
        Some(Arc::new(LexicalScorer::new())),
        Arc::clone(&llm),
        widths(3, 1),
    );

    let (context, stream) = pipeline.ask("pump relief").await.unwrap();
    assert_eq!(context.as_str(), format!("[Page 2] {}", PAGE_2));
    assert!(context.is_reranked());

    let (answer, degraded) = stream.collect_text().await;
    assert_eq!(answer, "It opens at 3 bar [Page 2].");
    assert!(!degraded);

    let prompts = llm.prompts.lock();
    assert!(prompts[0].contains(context.as_str()));
    assert!(prompts[0].contains("pump relief"));
}

#[tokio::test]
async fn test_empty_index_answers_not_found() {
    let llm = Arc::new(ScriptedLlm::answering(&["should not be used"]));
    let index = Arc::new(LocalSimilarityIndex::in_memory(Arc::new(KeywordEmbedder)));
    let pipeline = answer_pipeline(
        index,
        Some(Arc::new(LexicalScorer::new())),
        Arc::clone(&llm),
        widths(5, 2),
    );

    let (context, stream) = pipeline.ask("pump pressure").await.unwrap();
    assert!(context.is_empty());

    let (answer, _) = stream.collect_text().await;
    assert!(answer.contains("Data Not Found."));
    assert_eq!(llm.prompt_count(), 0);
}

#[tokio::test]
async fn test_failing_scorer_keeps_broad_order() {
    let llm = Arc::new(ScriptedLlm::answering(&["ok"]));
    let pipeline = answer_pipeline(
        manual_index().await,
        Some(Arc::new(BrokenScorer)),
        llm,
        widths(3, 2),
    );

    let (context, _) = pipeline.ask("pump relief").await.unwrap();
    assert!(!context.is_reranked());
    assert_eq!(context.len(), 2);
    assert_eq!(context.pages()[0], 1);
}

#[tokio::test]
async fn test_context_is_capped_and_annotated() {
    let llm = Arc::new(ScriptedLlm::answering(&["ok"]));
    let pipeline = answer_pipeline(
        manual_index().await,
        Some(Arc::new(LexicalScorer::new())),
        llm,
        widths(3, 2),
    );

    let (context, _) = pipeline.ask("pump valve").await.unwrap();
    assert_eq!(context.len(), 2);
    let entries: Vec<&str> = context.as_str().split("\n\n").collect();
    assert_eq!(entries.len(), 2);
    for (entry, page) in entries.iter().zip(context.pages()) {
        assert!(entry.starts_with(&format!("[Page {}] ", page)));
    }
}

#[tokio::test]
async fn test_repeated_query_selects_same_pages() {
    let llm = Arc::new(ScriptedLlm::answering(&["ok"]));
    let pipeline = answer_pipeline(
        manual_index().await,
        Some(Arc::new(LexicalScorer::new())),
        llm,
        widths(3, 2),
    );

    let (first, _) = pipeline.ask("filter interval").await.unwrap();
    let (second, _) = pipeline.ask("filter interval").await.unwrap();
    assert_eq!(first.pages(), second.pages());
    assert_eq!(first.as_str(), second.as_str());
}

#[tokio::test]
async fn test_dropping_stream_stops_generation() {
    let llm = Arc::new(ScriptedLlm::answering(&["one ", "two ", "three ", "four "]));
    let pipeline = answer_pipeline(manual_index().await, None, Arc::clone(&llm), widths(3, 1));

    let (_, mut stream) = pipeline.ask("pump").await.unwrap();
    assert_eq!(llm.produced.load(Ordering::SeqCst), 0);

    let first = stream.next_fragment().await.unwrap();
    assert_eq!(first.as_str(), "one ");
    drop(stream);

    assert_eq!(llm.produced.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generation_failure_ends_with_diagnostic() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok("The pump ".to_string()),
        Err(Error::generation("backend closed connection")),
        Ok("unreachable".to_string()),
    ]));
    let pipeline = answer_pipeline(manual_index().await, None, llm, widths(3, 1));

    let (_, stream) = pipeline.ask("pump").await.unwrap();
    let (answer, degraded) = stream.collect_text().await;

    assert!(degraded);
    assert!(answer.starts_with("The pump "));
    assert!(answer.contains("[Error: "));
    assert!(answer.contains("backend closed connection"));
    assert!(!answer.contains("unreachable"));
}

#[tokio::test]
async fn test_answer_collected_extracts_context_citations() {
    let llm = Arc::new(ScriptedLlm::answering(&[
        "Relief at 3 bar [Page 2]. ",
        "See also [Page 9].",
    ]));
    let pipeline = answer_pipeline(
        manual_index().await,
        Some(Arc::new(LexicalScorer::new())),
        llm,
        widths(3, 2),
    );

    let response = pipeline.answer_collected("pump relief").await.unwrap();
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].page_number, 2);
    assert_eq!(response.citations[0].source_id, "pump.pdf");
    assert!(response.reranked);
    assert!(!response.degraded);
}

fn app(index: Arc<dyn SimilarityIndex>, llm: Arc<ScriptedLlm>) -> axum::Router {
    let mut config = RagConfig::default();
    config.retrieval = widths(3, 1);
    let state =
        AppState::from_parts(config, index, Some(Arc::new(LexicalScorer::new())), llm, None)
            .unwrap();
    build_router(state, true)
}

fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_http_chat_streams_plain_text() {
    let llm = Arc::new(ScriptedLlm::answering(&["Opens at 3 bar ", "[Page 2]."]));
    let router = app(manual_index().await, llm);

    let response = router
        .oneshot(json_post("/api/chat", r#"{"message":"pump relief"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(response.headers()["x-context-pages"], "2");
    assert_eq!(body_text(response).await, "Opens at 3 bar [Page 2].");
}

#[tokio::test]
async fn test_http_chat_rejects_blank_message() {
    let router = app(manual_index().await, Arc::new(ScriptedLlm::answering(&["x"])));
    let response = router
        .oneshot(json_post("/api/chat", r#"{"message":"   "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_chat_reports_unreachable_index() {
    let llm = Arc::new(ScriptedLlm::answering(&["x"]));
    let router = app(Arc::new(OfflineIndex), Arc::clone(&llm));

    let response = router
        .oneshot(json_post("/api/chat", r#"{"message":"pump"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_text(response).await.contains("retrieval_error"));
    assert_eq!(llm.prompt_count(), 0);
}

#[tokio::test]
async fn test_http_query_returns_citations() {
    let llm = Arc::new(ScriptedLlm::answering(&["3 bar [Page 2]."]));
    let router = app(manual_index().await, llm);

    let response = router
        .oneshot(json_post("/api/query", r#"{"message":"pump relief"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: QueryResponse = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body.answer, "3 bar [Page 2].");
    assert_eq!(body.pages, vec![2]);
    assert_eq!(body.citations[0].page_number, 2);
}

#[tokio::test]
async fn test_http_health_and_info() {
    let router = app(manual_index().await, Arc::new(ScriptedLlm::answering(&["x"])));

    let health = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let info = router
        .oneshot(Request::get("/api/info").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let info: serde_json::Value = serde_json::from_str(&body_text(info).await).unwrap();
    assert_eq!(info["retrieval"]["k_broad"], 3);
    assert_eq!(info["retrieval"]["indexed_pages"], 3);
    assert_eq!(info["retrieval"]["scorer"], "lexical");
}

#[tokio::test]
async fn test_http_ready_follows_state() {
    let mut config = RagConfig::default();
    config.retrieval = widths(3, 1);
    let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::answering(&["x"]));
    let state = AppState::from_parts(config, manual_index().await, None, llm, None).unwrap();
    let router = build_router(state.clone(), false);

    let ready = router
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    state.set_ready(false);
    let draining = router
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);
}
