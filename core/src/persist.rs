//! Single-file index artifact.
//!
//! Layout: `[bincode(ArtifactFile)][magic "RAG1"][CRC32 of payload, BE]`.
//! Writes go to a sibling `.tmp` file that is fsynced and renamed over the
//! target, so a reader only ever sees a complete artifact or the previous one.

use crate::corpus::Corpus;
use crate::error::IndexError;
use crate::index::Bm25Index;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const ARTIFACT_MAGIC: &[u8; 4] = b"RAG1";
const FOOTER_LEN: usize = 8;
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub version: u32,
    pub created_at: String,
    pub corpus: Corpus,
    pub index: Bm25Index,
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    version: u32,
    created_at: String,
    corpus: &'a Corpus,
    index: &'a Bm25Index,
}

/// Serialize `corpus` and `index` into one artifact at `path`, replacing any
/// existing artifact atomically.
pub fn save_artifact(corpus: &Corpus, index: &Bm25Index, path: impl AsRef<Path>) -> Result<(), IndexError> {
    let path = path.as_ref();
    let artifact = ArtifactRef {
        version: ARTIFACT_VERSION,
        created_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        corpus,
        index,
    };
    let payload = bincode::serialize(&artifact).map_err(|e| IndexError::Encode(e.to_string()))?;
    let crc = crc32fast::hash(&payload);

    let mut bytes = Vec::with_capacity(payload.len() + FOOTER_LEN);
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(ARTIFACT_MAGIC);
    bytes.extend_from_slice(&crc.to_be_bytes());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IndexError::Io { path: parent.to_path_buf(), source })?;
    }
    let tmp = tmp_path(path);
    if let Err(source) = write_synced(&tmp, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(IndexError::Io { path: tmp, source });
    }
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(IndexError::Io { path: path.to_path_buf(), source });
    }

    tracing::info!(path = %path.display(), num_docs = corpus.len(), bytes = bytes.len(), crc, "saved index artifact");
    Ok(())
}

/// Read an artifact back, verifying its checksum and that the corpus and
/// scoring structure describe the same documents.
pub fn load_artifact(path: impl AsRef<Path>) -> Result<(Corpus, Bm25Index), IndexError> {
    let path = path.as_ref();
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IndexError::NotFound { path: path.to_path_buf() })
        }
        Err(source) => return Err(IndexError::Io { path: path.to_path_buf(), source }),
    };
    let corrupt = |reason: String| IndexError::Corrupt { path: path.to_path_buf(), reason };

    if raw.len() < FOOTER_LEN || &raw[raw.len() - FOOTER_LEN..raw.len() - 4] != ARTIFACT_MAGIC {
        return Err(corrupt("missing checksum footer".into()));
    }
    let (payload, footer) = raw.split_at(raw.len() - FOOTER_LEN);
    let stored_crc = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(corrupt(format!("checksum mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}")));
    }

    let artifact: ArtifactFile = bincode::deserialize(payload).map_err(|e| corrupt(e.to_string()))?;
    if artifact.version != ARTIFACT_VERSION {
        return Err(corrupt(format!("unsupported artifact version {}", artifact.version)));
    }
    validate(&artifact.corpus, &artifact.index).map_err(corrupt)?;

    tracing::info!(
        path = %path.display(),
        num_docs = artifact.corpus.len(),
        num_terms = artifact.index.num_terms(),
        created_at = %artifact.created_at,
        "loaded index artifact"
    );
    Ok((artifact.corpus, artifact.index))
}

/// Check that `index` was built over exactly the documents of `corpus`.
pub fn validate(corpus: &Corpus, index: &Bm25Index) -> Result<(), String> {
    let n = corpus.len();
    if index.num_docs as usize != n {
        return Err(format!("corpus has {n} documents but scoring structure covers {}", index.num_docs));
    }
    if index.doc_lengths.len() != n {
        return Err(format!("corpus has {n} documents but {} document lengths are recorded", index.doc_lengths.len()));
    }
    let num_terms = index.dictionary.len();
    if index.df.len() != num_terms || index.postings.len() != num_terms {
        return Err(format!(
            "dictionary has {num_terms} terms but df has {} and postings has {}",
            index.df.len(),
            index.postings.len()
        ));
    }
    let mut seen = vec![false; num_terms];
    for (term, &tid) in &index.dictionary {
        match seen.get_mut(tid as usize) {
            None => return Err(format!("term {term:?} has out-of-range id {tid}")),
            Some(true) => return Err(format!("term id {tid} is assigned to more than one term")),
            Some(slot) => *slot = true,
        }
    }
    let mut tf_totals = vec![0u64; n];
    for (tid, plist) in index.postings.iter().enumerate() {
        if plist.len() != index.df[tid] as usize {
            return Err(format!("term id {tid} has df {} but {} postings", index.df[tid], plist.len()));
        }
        for p in plist {
            match tf_totals.get_mut(p.doc_id as usize) {
                Some(total) => *total += p.tf as u64,
                None => return Err(format!("posting for term id {tid} references document {} of {n}", p.doc_id)),
            }
        }
    }
    if let Some((doc, total)) = tf_totals.iter().enumerate().find(|&(doc, &total)| total != index.doc_lengths[doc] as u64) {
        return Err(format!("document {doc} has length {} but its postings sum to {total}", index.doc_lengths[doc]));
    }
    let total_len: u64 = index.doc_lengths.iter().map(|&l| l as u64).sum();
    let expected_avgdl = if n == 0 { 0.0 } else { total_len as f64 / n as f64 };
    if !index.avgdl.is_finite() || (index.avgdl - expected_avgdl).abs() > 1e-9 * expected_avgdl.max(1.0) {
        return Err(format!("average document length {} does not match document lengths (expected {expected_avgdl})", index.avgdl));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut f = File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;
    use crate::index::Bm25Params;
    use tempfile::tempdir;

    fn sample() -> (Corpus, Bm25Index) {
        let corpus: Corpus = vec![Document::new("a.txt", "cat dog"), Document::new("b.txt", "dog dog fish")].into();
        let index = Bm25Index::build(&corpus, Bm25Params::default());
        (corpus, index)
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/index.bin");
        let (corpus, index) = sample();
        save_artifact(&corpus, &index, &path).unwrap();

        let (c2, i2) = load_artifact(&path).unwrap();
        assert_eq!(c2, corpus);
        assert_eq!(i2, index);
        assert!(!dir.path().join("nested/index.bin.tmp").exists());
    }

    #[test]
    fn save_overwrites_existing_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let (corpus, index) = sample();
        save_artifact(&corpus, &index, &path).unwrap();

        let smaller: Corpus = vec![Document::new("c.txt", "bird")].into();
        let smaller_index = Bm25Index::build(&smaller, Bm25Params::default());
        save_artifact(&smaller, &smaller_index, &path).unwrap();

        let (c2, _) = load_artifact(&path).unwrap();
        assert_eq!(c2, smaller);
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let dir = tempdir().unwrap();
        let err = load_artifact(dir.path().join("missing.idx")).unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }), "got {err:?}");
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        fs::write(&path, b"definitely not an index").unwrap();
        assert!(matches!(load_artifact(&path).unwrap_err(), IndexError::Corrupt { .. }));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let (corpus, index) = sample();
        save_artifact(&corpus, &index, &path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[3] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        match load_artifact(&path).unwrap_err() {
            IndexError::Corrupt { reason, .. } => assert!(reason.contains("checksum"), "{reason}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn truncated_artifact_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let (corpus, index) = sample();
        save_artifact(&corpus, &index, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(load_artifact(&path).unwrap_err(), IndexError::Corrupt { .. }));
    }

    #[test]
    fn cardinality_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let two: Corpus = vec![Document::new("a", "x"), Document::new("b", "y")].into();
        let index = Bm25Index::build(&two, Bm25Params::default());
        let three: Corpus = vec![Document::new("a", "x"), Document::new("b", "y"), Document::new("c", "z")].into();
        save_artifact(&three, &index, &path).unwrap();

        match load_artifact(&path).unwrap_err() {
            IndexError::Corrupt { reason, .. } => assert!(reason.contains("3 documents"), "{reason}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_dangling_postings() {
        let (corpus, mut index) = sample();
        index.postings[0][0].doc_id = 9;
        assert!(validate(&corpus, &index).is_err());
    }

    #[test]
    fn validate_accepts_built_indexes() {
        let (corpus, index) = sample();
        assert_eq!(validate(&corpus, &index), Ok(()));
        let empty = Corpus::new();
        assert_eq!(validate(&empty, &Bm25Index::build(&empty, Bm25Params::default())), Ok(()));
    }

    #[test]
    fn validate_rejects_wrong_average_length() {
        let (corpus, mut index) = sample();
        index.avgdl = 0.0;
        let reason = validate(&corpus, &index).unwrap_err();
        assert!(reason.contains("average document length"), "{reason}");

        index.avgdl = 2.0;
        assert!(validate(&corpus, &index).is_err());
        index.avgdl = f64::NAN;
        assert!(validate(&corpus, &index).is_err());
    }

    #[test]
    fn validate_rejects_lengths_that_disagree_with_postings() {
        let (corpus, mut index) = sample();
        // Zeroed lengths with a matching zero average would divide by zero when scoring.
        index.doc_lengths = vec![0, 0];
        index.avgdl = 0.0;
        let reason = validate(&corpus, &index).unwrap_err();
        assert!(reason.contains("postings sum"), "{reason}");
    }

    #[test]
    fn validate_rejects_duplicate_term_ids() {
        let (corpus, mut index) = sample();
        let dog = index.dictionary["dog"];
        *index.dictionary.get_mut("cat").unwrap() = dog;
        let reason = validate(&corpus, &index).unwrap_err();
        assert!(reason.contains("more than one term"), "{reason}");
    }

    #[test]
    fn tampered_average_length_loads_as_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let (corpus, mut index) = sample();
        index.avgdl = 0.0;
        save_artifact(&corpus, &index, &path).unwrap();
        match load_artifact(&path).unwrap_err() {
            IndexError::Corrupt { reason, .. } => assert!(reason.contains("average document length"), "{reason}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
