use crate::corpus::Corpus;
use crate::error::IndexError;
use crate::index::Bm25Index;
use crate::persist::{load_artifact, validate};
use crate::tokenizer::tokenize;
use crate::DocId;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredHit {
    pub doc_id: DocId,
    pub id: String,
    pub text: String,
    pub score: f64,
}

/// A loaded corpus and its scoring structure. Immutable, so any number of
/// callers can query it at once.
#[derive(Debug)]
pub struct Retriever {
    corpus: Corpus,
    index: Bm25Index,
}

impl Retriever {
    pub fn new(corpus: Corpus, index: Bm25Index) -> Result<Self, IndexError> {
        validate(&corpus, &index).map_err(IndexError::Inconsistent)?;
        Ok(Self { corpus, index })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let (corpus, index) = load_artifact(path)?;
        Ok(Self { corpus, index })
    }

    pub fn corpus(&self) -> &Corpus { &self.corpus }

    pub fn index(&self) -> &Bm25Index { &self.index }

    pub fn len(&self) -> usize { self.corpus.len() }

    pub fn is_empty(&self) -> bool { self.corpus.is_empty() }

    /// Rank every document against `query` and keep the best `k`.
    ///
    /// Scores are non-increasing; equal scores keep corpus order.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredHit> {
        if k == 0 || self.corpus.is_empty() {
            return Vec::new();
        }
        let scores = self.index.scores(&tokenize(query));
        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        // stable
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);

        let docs = self.corpus.documents();
        ranked
            .into_iter()
            .map(|(i, score)| ScoredHit { doc_id: i as DocId, id: docs[i].id.clone(), text: docs[i].text.clone(), score })
            .collect()
    }

    pub fn top_k(&self, query: &str, k: usize) -> Vec<RetrievalHit> {
        self.search(query, k)
            .into_iter()
            .map(|h| RetrievalHit { id: h.id, text: h.text })
            .collect()
    }
}

/// Owns the artifact path and the retriever loaded from it.
///
/// Nothing is read until the first [`IndexHandle::get`]. A failed load is not
/// cached, so an artifact written later is picked up by the next call.
#[derive(Debug)]
pub struct IndexHandle {
    path: PathBuf,
    current: RwLock<Option<Arc<Retriever>>>,
}

impl IndexHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), current: RwLock::new(None) }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn is_loaded(&self) -> bool { self.current.read().is_some() }

    /// Current retriever, loading it on first use. The load reads and decodes
    /// the artifact while holding the write lock, so async callers should run
    /// this on a blocking thread.
    pub fn get(&self) -> Result<Arc<Retriever>, IndexError> {
        if let Some(r) = self.current.read().as_ref() {
            return Ok(Arc::clone(r));
        }
        let mut slot = self.current.write();
        if let Some(r) = slot.as_ref() {
            return Ok(Arc::clone(r));
        }
        let loaded = Arc::new(Retriever::load(&self.path)?);
        tracing::info!(path = %self.path.display(), num_docs = loaded.len(), "index loaded");
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Re-read the artifact and swap it in. On failure the previously loaded
    /// retriever, if any, keeps serving.
    pub fn reload(&self) -> Result<Arc<Retriever>, IndexError> {
        let loaded = Arc::new(Retriever::load(&self.path)?);
        *self.current.write() = Some(Arc::clone(&loaded));
        tracing::info!(path = %self.path.display(), num_docs = loaded.len(), "index reloaded");
        Ok(loaded)
    }

    pub fn top_k(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        Ok(self.get()?.top_k(query, k))
    }
}
