//! Query command handler.

use clap::Args;
use libris_core::{config::AppConfig, AppResult};
use libris_index::RetrievalResult;

use crate::context::Library;

/// Retrieve the passages most relevant to a question
#[derive(Args, Debug)]
pub struct QueryCommand {
    /// Query text
    pub query: String,

    /// Number of chunks to retrieve (defaults to TOP_K)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Minimum cosine similarity (defaults to SCORE_THRESHOLD)
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing query command");

        let library = Library::open(config).await?;
        let settings = library.retrieval.settings();
        let k = self.top_k.unwrap_or(settings.top_k);
        let min_score = self.min_score.unwrap_or(settings.min_score);

        let result = library.retrieval.retrieve(&self.query, k, min_score).await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_result(&result);
        }

        Ok(())
    }
}

fn print_result(result: &RetrievalResult) {
    match result {
        RetrievalResult::NotFound { reason } => {
            println!("NOT_FOUND: {}", reason);
        }
        RetrievalResult::Found { chunks } => {
            for (i, hit) in chunks.iter().enumerate() {
                println!(
                    "[{}] {} #{} (chars {}-{}) score {:.3}",
                    i + 1,
                    hit.chunk.file_name,
                    hit.chunk.position,
                    hit.chunk.start,
                    hit.chunk.end,
                    hit.score
                );
                println!("{}\n", preview(&hit.chunk.text, 300));
            }
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
