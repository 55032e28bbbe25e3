//! The real embedding and completion clients, driven over HTTP against an
//! in-process upstream that replays canned responses and counts attempts.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::Router;
use docchat::completion::{CompletionService, GeminiCompletion, OpenAICompletion};
use docchat::config::{EmbeddingConfig, LlmConfig, Provider};
use docchat::credentials::ApiKey;
use docchat::embedding::{create_embedder, Embedder, GeminiEmbedder};
use docchat::http::ServiceError;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ─── Helpers ────────────────────────────────────────────────────────

struct Recorded {
    path: String,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone)]
struct Upstream {
    replies: Arc<Vec<(u16, String)>>,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Upstream {
    fn attempts(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn request(&self, n: usize) -> (String, HeaderMap, Value) {
        let requests = self.requests.lock().unwrap();
        let r = &requests[n];
        (r.path.clone(), r.headers.clone(), r.body.clone())
    }
}

/// Serves `replies` in order; the last one repeats.
async fn replay(
    State(up): State<Upstream>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let n = up.hits.fetch_add(1, Ordering::SeqCst);
    up.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    let (status, text) = up.replies[n.min(up.replies.len() - 1)].clone();
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        text,
    )
}

async fn start_upstream(replies: &[(u16, &str)]) -> (String, Upstream) {
    let up = Upstream {
        replies: Arc::new(replies.iter().map(|(s, b)| (*s, b.to_string())).collect()),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new().fallback(replay).with_state(up.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), up)
}

fn key() -> ApiKey {
    ApiKey::new("TEST_KEY", "secret")
}

fn gemini_llm(base: &str, max_retries: u32) -> GeminiCompletion {
    let config = LlmConfig {
        endpoint: Some(base.to_string()),
        max_retries,
        ..LlmConfig::default()
    };
    GeminiCompletion::new(&config, &key()).unwrap()
}

fn openai_embeddings(base: &str, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: Provider::OpenAI,
        model: "text-embedding-3-small".to_string(),
        endpoint: Some(base.to_string()),
        max_retries,
        ..EmbeddingConfig::default()
    }
}

fn status_of(err: &anyhow::Error) -> Option<u16> {
    match err.downcast_ref::<ServiceError>() {
        Some(ServiceError::Status { status, .. }) => Some(status.as_u16()),
        _ => None,
    }
}

const GEMINI_ANSWER: &str =
    r#"{"candidates":[{"content":{"parts":[{"text":"By erosion."}]},"finishReason":"STOP"}]}"#;

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gemini_embeddings_request_shape() {
    let (base, up) = start_upstream(&[(
        200,
        r#"{"embeddings":[{"values":[1.0,0.0]},{"values":[0.0,1.0]}]}"#,
    )])
    .await;
    let embedder = GeminiEmbedder::new(
        &EmbeddingConfig {
            endpoint: Some(base.clone()),
            ..EmbeddingConfig::default()
        },
        &key(),
    )
    .unwrap();

    let vectors = embedder
        .embed_documents(&["one".to_string(), "two".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

    let (path, headers, body) = up.request(0);
    assert_eq!(path, "/v1beta/models/embedding-001:batchEmbedContents");
    assert_eq!(headers["x-goog-api-key"], "secret");
    assert_eq!(body["requests"][1]["content"]["parts"][0]["text"], "two");
    assert_eq!(body["requests"][0]["taskType"], "RETRIEVAL_DOCUMENT");
    assert_eq!(embedder.endpoint(), base);
}

#[tokio::test]
async fn test_no_retries_means_a_single_attempt() {
    let (base, up) = start_upstream(&[(503, "overloaded"), (200, GEMINI_ANSWER)]).await;
    let err = gemini_llm(&base, 0).complete("prompt").await.unwrap_err();

    assert_eq!(status_of(&err), Some(503));
    assert!(err.to_string().contains("overloaded"), "{}", err);
    assert_eq!(up.attempts(), 1);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let (base, up) = start_upstream(&[(429, "slow down"), (200, GEMINI_ANSWER)]).await;
    let answer = gemini_llm(&base, 2).complete("prompt").await.unwrap();

    assert_eq!(answer, "By erosion.");
    assert_eq!(up.attempts(), 2);
    let (path, _, body) = up.request(1);
    assert_eq!(path, "/v1beta/models/gemini-1.5-flash:generateContent");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "prompt");
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let (base, up) = start_upstream(&[
        (502, "bad gateway"),
        (200, r#"{"data":[{"index":0,"embedding":[0.5,0.5]}]}"#),
    ])
    .await;
    let embedder = create_embedder(&openai_embeddings(&base, 1), &key()).unwrap();

    let vector = embedder.embed_query("where?").await.unwrap();
    assert_eq!(vector, vec![0.5, 0.5]);
    assert_eq!(up.attempts(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (base, up) = start_upstream(&[(
        400,
        r#"{"error":{"message":"bad request","type":"invalid_request_error"}}"#,
    )])
    .await;
    let config = LlmConfig {
        provider: Provider::OpenAI,
        model: "gpt-4o-mini".to_string(),
        endpoint: Some(base),
        max_retries: 3,
        ..LlmConfig::default()
    };
    let err = OpenAICompletion::new(&config, &key())
        .unwrap()
        .complete("prompt")
        .await
        .unwrap_err();

    assert_eq!(status_of(&err), Some(400));
    assert_eq!(up.attempts(), 1);
    let (path, headers, _) = up.request(0);
    assert_eq!(path, "/v1/chat/completions");
    assert_eq!(headers["authorization"], "Bearer secret");
}

#[tokio::test]
async fn test_short_embedding_batch_is_rejected() {
    let (base, up) = start_upstream(&[(200, r#"{"data":[{"index":0,"embedding":[1.0]}]}"#)]).await;
    let embedder = create_embedder(&openai_embeddings(&base, 2), &key()).unwrap();

    let err = embedder
        .embed_documents(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("1 vectors for 2 inputs"), "{}", err);
    assert_eq!(up.attempts(), 1);
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_error() {
    let (base, up) = start_upstream(&[(200, "not json")]).await;
    let err = gemini_llm(&base, 2).complete("prompt").await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Decode { .. })
    ));
    assert_eq!(up.attempts(), 1);
}
