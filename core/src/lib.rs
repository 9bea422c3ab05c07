pub mod corpus;
pub mod error;
pub mod index;
pub mod persist;
pub mod retriever;
pub mod tokenizer;

pub use corpus::{collect, collect_with_extensions, Corpus, Document, DEFAULT_EXTENSIONS};
pub use error::IndexError;
pub use index::{Bm25Index, Bm25Params, Posting};
pub use persist::{load_artifact, save_artifact};
pub use retriever::{IndexHandle, RetrievalHit, Retriever, ScoredHit};

pub type TermId = u32;
pub type DocId = u32;
