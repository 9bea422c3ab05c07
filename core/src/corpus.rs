use crate::DocId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// File extensions picked up by [`collect`].
pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Source path of the document, used as its stable identity.
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}

/// Ordered set of documents. A document's position is its [`DocId`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Corpus {
    docs: Vec<Document>,
}

impl Corpus {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, doc: Document) { self.docs.push(doc); }

    pub fn len(&self) -> usize { self.docs.len() }

    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    pub fn get(&self, doc_id: DocId) -> Option<&Document> { self.docs.get(doc_id as usize) }

    pub fn documents(&self) -> &[Document] { &self.docs }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> { self.docs.iter() }
}

impl From<Vec<Document>> for Corpus {
    fn from(docs: Vec<Document>) -> Self { Self { docs } }
}

impl FromIterator<Document> for Corpus {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        Self { docs: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a Corpus {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;
    fn into_iter(self) -> Self::IntoIter { self.docs.iter() }
}

/// Collect every `.md` and `.txt` file below `dir`.
pub fn collect(dir: impl AsRef<Path>) -> Corpus {
    collect_with_extensions(dir, DEFAULT_EXTENSIONS)
}

/// Recursively collect the files below `dir` whose extension matches one of
/// `extensions` (case-insensitive).
///
/// Files are decoded as UTF-8 with invalid byte sequences dropped. A file that
/// cannot be read is logged and skipped; the walk always runs to completion.
/// A missing directory or one without matching files yields an empty corpus.
pub fn collect_with_extensions<S: AsRef<str>>(dir: impl AsRef<Path>, extensions: &[S]) -> Corpus {
    let dir = dir.as_ref();
    let mut corpus = Corpus::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                skipped += 1;
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, extensions) {
            continue;
        }
        match read_document(path) {
            Some(doc) => corpus.push(doc),
            None => skipped += 1,
        }
    }

    tracing::info!(dir = %dir.display(), num_docs = corpus.len(), skipped, "collected documents");
    corpus
}

/// Read one file into a document keyed by its path, `None` (logged) when it
/// cannot be read.
fn read_document(path: &Path) -> Option<Document> {
    match fs::read(path) {
        Ok(bytes) => Some(Document { id: path.display().to_string(), text: decode_utf8_dropping_invalid(&bytes) }),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read document, skipping");
            None
        }
    }
}

/// Invalid sequences are removed rather than replaced with U+FFFD, which
/// would otherwise glue onto the neighbouring token.
fn decode_utf8_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                text.push_str(valid);
                return text;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let bad = err.error_len().unwrap_or(rest.len());
                bytes = &rest[bad..];
            }
        }
    }
}

fn has_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => extensions.iter().any(|e| e.as_ref().eq_ignore_ascii_case(ext)),
        None => false,
    }
}
