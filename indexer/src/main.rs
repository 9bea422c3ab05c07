use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragcore::{collect_with_extensions, save_artifact, Bm25Index, Bm25Params, Retriever};
use tracing_subscriber::{fmt, EnvFilter};

use std::path::Path;

const PREVIEW_CHARS: usize = 400;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and query the BM25 document index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index artifact from a directory of text documents
    Build {
        /// Directory scanned recursively for documents
        #[arg(long, env = "DOCS_DIR", default_value = "./data/docs")]
        docs: String,
        /// Artifact file to write
        #[arg(long, env = "INDEX_PATH", default_value = "./data/bm25_index.bin")]
        output: String,
        /// Accepted file extensions (repeatable)
        #[arg(long = "ext", default_values_t = ["md".to_string(), "txt".to_string()])]
        extensions: Vec<String>,
        /// BM25 term-frequency saturation
        #[arg(long, default_value_t = 1.5)]
        k1: f64,
        /// BM25 length normalization
        #[arg(long, default_value_t = 0.75)]
        b: f64,
    },
    /// Print the top documents for a query
    Query {
        /// Artifact file to read
        #[arg(long, env = "INDEX_PATH", default_value = "./data/bm25_index.bin")]
        index: String,
        /// Number of hits
        #[arg(short, long, env = "TOP_K", default_value_t = 4)]
        k: usize,
        /// Query words
        #[arg(required = true)]
        query: Vec<String>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { docs, output, extensions, k1, b } => {
            build_index(Path::new(&docs), Path::new(&output), &extensions, Bm25Params { k1, b }).map(|_| ())
        }
        Commands::Query { index, k, query } => run_query(Path::new(&index), &query.join(" "), k),
    }
}

/// Returns the number of documents indexed. Nothing is written when the
/// directory holds no matching documents.
fn build_index(docs: &Path, output: &Path, extensions: &[String], params: Bm25Params) -> Result<usize> {
    let corpus = collect_with_extensions(docs, extensions);
    if corpus.is_empty() {
        tracing::warn!(docs = %docs.display(), ?extensions, "no documents found, index not written");
        return Ok(0);
    }

    let index = Bm25Index::build(&corpus, params);
    tracing::info!(num_docs = corpus.len(), num_terms = index.num_terms(), avgdl = index.avgdl(), "built index");

    save_artifact(&corpus, &index, output)
        .with_context(|| format!("writing index artifact to {}", output.display()))?;
    tracing::info!(output = %output.display(), "index build complete");
    Ok(corpus.len())
}

fn run_query(index: &Path, query: &str, k: usize) -> Result<()> {
    let retriever = Retriever::load(index).context("run `indexer build` first")?;
    for (i, hit) in retriever.search(query, k).iter().enumerate() {
        let preview: String = hit.text.chars().take(PREVIEW_CHARS).collect();
        println!("[{}] {} (score {:.4})", i + 1, hit.id, hit.score);
        println!("{preview} ...\n");
    }
    Ok(())
}
