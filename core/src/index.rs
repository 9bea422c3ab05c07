use crate::corpus::Corpus;
use crate::tokenizer::tokenize;
use crate::{DocId, TermId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// BM25 tuning constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length-normalization strength, 0 disables it.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.5, b: 0.75 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
}

/// Per-term statistics over a whole corpus, enough to BM25-score any query
/// against every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bm25Index {
    pub params: Bm25Params,
    pub dictionary: HashMap<String, TermId>,
    /// Document frequency, indexed by term id.
    pub df: Vec<u32>,
    /// Postings indexed by term id, each list sorted by doc id.
    pub postings: Vec<Vec<Posting>>,
    /// Token count per document, in corpus order.
    pub doc_lengths: Vec<u32>,
    pub num_docs: u32,
    pub avgdl: f64,
}

impl Bm25Index {
    /// Tokenize every document and build the statistics in one pass.
    ///
    /// Term ids are handed out in first-seen order, so identical corpora
    /// produce identical indexes.
    pub fn build(corpus: &Corpus, params: Bm25Params) -> Self {
        let mut index = Self { params, ..Self::default() };
        let mut total_len: u64 = 0;

        for (doc_id, doc) in corpus.iter().enumerate() {
            let doc_id = doc_id as DocId;
            let tokens = tokenize(&doc.text);
            index.doc_lengths.push(tokens.len() as u32);
            total_len += tokens.len() as u64;

            let mut tf_counts: HashMap<TermId, u32> = HashMap::new();
            for term in tokens {
                let tid = match index.dictionary.get(&term) {
                    Some(&tid) => tid,
                    None => {
                        let tid = index.dictionary.len() as TermId;
                        index.dictionary.insert(term, tid);
                        index.df.push(0);
                        index.postings.push(Vec::new());
                        tid
                    }
                };
                *tf_counts.entry(tid).or_insert(0) += 1;
            }
            // Documents are visited in order, so every postings list stays sorted by doc id.
            for (tid, tf) in tf_counts {
                index.df[tid as usize] += 1;
                index.postings[tid as usize].push(Posting { doc_id, tf });
            }
        }

        index.num_docs = corpus.len() as u32;
        index.avgdl = if index.num_docs == 0 { 0.0 } else { total_len as f64 / index.num_docs as f64 };
        tracing::debug!(num_docs = index.num_docs, num_terms = index.dictionary.len(), avgdl = index.avgdl, "built bm25 index");
        index
    }

    pub fn num_docs(&self) -> usize { self.num_docs as usize }

    pub fn num_terms(&self) -> usize { self.dictionary.len() }

    pub fn avgdl(&self) -> f64 { self.avgdl }

    /// Smoothed inverse document frequency of `term`, `None` if it never occurs.
    pub fn idf(&self, term: &str) -> Option<f64> {
        let tid = *self.dictionary.get(term)?;
        Some(self.idf_from_df(self.df[tid as usize]))
    }

    fn idf_from_df(&self, df: u32) -> f64 {
        let n = self.num_docs as f64;
        let df = df as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document against `query_tokens`, returned in corpus order.
    ///
    /// Tokens missing from the dictionary add nothing. A token repeated in the
    /// query is counted once per occurrence.
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.num_docs as usize];
        let Bm25Params { k1, b } = self.params;

        for token in query_tokens {
            let Some(&tid) = self.dictionary.get(token) else { continue };
            let idf = self.idf_from_df(self.df[tid as usize]);
            for posting in &self.postings[tid as usize] {
                let tf = posting.tf as f64;
                let dl = self.doc_lengths[posting.doc_id as usize] as f64;
                let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / self.avgdl));
                scores[posting.doc_id as usize] += idf * tf_norm;
            }
        }
        scores
    }
}
