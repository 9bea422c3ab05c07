pub mod llm;

use anyhow::Result;
use axum::{extract::{Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use llm::{LlmClient, LlmConfig};
use ragcore::{IndexError, IndexHandle, RetrievalHit, Retriever};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const SYSTEM_PROMPT: &str = "You are a concise assistant. Include sources if context is provided.";
const MAX_SEARCH_K: i64 = 100;
const SNIPPET_BEFORE: usize = 100;
const SNIPPET_AFTER: usize = 200;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub index_path: PathBuf,
    /// Documents retrieved per chat message.
    pub top_k: usize,
    pub llm: LlmConfig,
    pub admin_token: Option<String>,
    /// Comma-separated origins; any origin when unset or unparsable.
    pub cors_allow_origin: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<IndexHandle>,
    pub llm: Arc<LlmClient>,
    pub top_k: usize,
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: i64,
}
fn default_k() -> i64 { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_docs: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub id: String,
    pub score: f64,
    pub snippet: Option<String>,
}

pub fn build_app(config: AppConfig) -> Result<Router> {
    let llm = LlmClient::new(config.llm)?;
    if !llm.has_credentials() {
        tracing::warn!("no language-model API key configured, chat answers will echo the prompt");
    }
    let state = AppState {
        index: Arc::new(IndexHandle::new(config.index_path)),
        llm: Arc::new(llm),
        top_k: config.top_k,
        admin_token: config.admin_token,
    };
    Ok(router(state)
        .layer(cors_layer(config.cors_allow_origin.as_deref()))
        .layer(TraceLayer::new_for_http()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({ "ok": true })) }))
        .route("/chat", post(chat_handler))
        .route("/search", get(search_handler))
        .route("/index/reload", post(reload_handler))
        .with_state(state)
}

fn cors_layer(allow_origin: Option<&str>) -> CorsLayer {
    let origins: Vec<_> = allow_origin
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
    }
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let hits = retrieve_context(&state, &req.message).await;
    let sources: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
    let user = if hits.is_empty() {
        req.message.clone()
    } else {
        let context = hits.iter().map(|h| h.text.as_str()).collect::<Vec<_>>().join("\n\n");
        format!("Context:\n{context}\n\nQuestion: {}", req.message)
    };

    let answer = state
        .llm
        .complete(SYSTEM_PROMPT, &user)
        .await
        .map_err(|e| {
            let status = if e.is_timeout() { StatusCode::GATEWAY_TIMEOUT } else { StatusCode::BAD_GATEWAY };
            (status, format!("language model call failed: {e}"))
        })?;
    Ok(Json(ChatResponse { answer, sources }))
}

/// Retrieval only enriches the prompt; when the index is unavailable the
/// question is answered without context.
async fn retrieve_context(state: &AppState, message: &str) -> Vec<RetrievalHit> {
    match with_index(state, IndexHandle::get).await {
        Ok(Ok(retriever)) => retriever.top_k(message, state.top_k),
        Ok(Err(err @ (IndexError::NotFound { .. } | IndexError::Corrupt { .. } | IndexError::Io { .. }))) => {
            tracing::warn!(error = %err, "index unavailable, answering without retrieved context");
            Vec::new()
        }
        Ok(Err(err @ (IndexError::Inconsistent(_) | IndexError::Encode(_)))) => {
            tracing::error!(error = %err, "unexpected retrieval failure, answering without retrieved context");
            Vec::new()
        }
        Err(err) => {
            tracing::error!(error = %err, "index load task failed, answering without retrieved context");
            Vec::new()
        }
    }
}

/// Run an index operation that may read and decode the artifact on the
/// blocking pool, keeping the async workers free while it holds the lock.
async fn with_index<F>(state: &AppState, op: F) -> Result<Result<Arc<Retriever>, IndexError>, tokio::task::JoinError>
where
    F: FnOnce(&IndexHandle) -> Result<Arc<Retriever>, IndexError> + Send + 'static,
{
    let index = Arc::clone(&state.index);
    tokio::task::spawn_blocking(move || op(&index)).await
}

fn unavailable(result: Result<Result<Arc<Retriever>, IndexError>, tokio::task::JoinError>) -> Result<Arc<Retriever>, (StatusCode, String)> {
    match result {
        Ok(Ok(retriever)) => Ok(retriever),
        Ok(Err(err)) => Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string())),
        Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, format!("index task failed: {err}"))),
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let retriever = unavailable(with_index(&state, IndexHandle::get).await)?;
    let k = params.k.clamp(0, MAX_SEARCH_K) as usize;

    let raw_terms: Vec<String> = params.q.split_whitespace().map(|s| s.to_string()).collect();
    let results = retriever
        .search(&params.q, k)
        .into_iter()
        .map(|hit| SearchHit { snippet: snippet(&hit.text, &raw_terms), doc_id: hit.doc_id, id: hit.id, score: hit.score })
        .collect();

    Ok(Json(SearchResponse {
        query: params.q,
        took_s: start.elapsed().as_secs_f64(),
        total_docs: retriever.len(),
        results,
    }))
}

pub async fn reload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let retriever = unavailable(with_index(&state, IndexHandle::reload).await)?;
    Ok(Json(serde_json::json!({ "num_docs": retriever.len() })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

fn terms_pattern(terms: &[String]) -> Option<regex::Regex> {
    let alternatives: Vec<String> = terms.iter().filter(|t| !t.trim().is_empty()).map(|t| regex::escape(t)).collect();
    if alternatives.is_empty() {
        return None;
    }
    RegexBuilder::new(&alternatives.join("|")).case_insensitive(true).build().ok()
}

fn snippet(text: &str, raw_terms: &[String]) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let pattern = terms_pattern(raw_terms);
    let first_idx = pattern.as_ref().and_then(|re| re.find(text)).map(|m| m.start());
    let window = match first_idx {
        Some(idx) => {
            let start = floor_char_boundary(text, idx.saturating_sub(SNIPPET_BEFORE));
            let end = floor_char_boundary(text, (idx + SNIPPET_AFTER).min(text.len()));
            &text[start..end]
        }
        None => {
            let end = text.char_indices().nth(SNIPPET_AFTER).map_or(text.len(), |(i, _)| i);
            &text[..end]
        }
    };
    Some(match &pattern {
        Some(re) => re.replace_all(window, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).into_owned(),
        None => window.to_string(),
    })
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
