//! Catalog command handler.

use clap::Args;
use libris_core::{config::AppConfig, AppError, AppResult};
use libris_index::Catalog;

use crate::context::Library;

/// List the books in the active index
#[derive(Args, Debug)]
pub struct CatalogCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl CatalogCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let library = Library::open(config).await?;
        let snapshot = library.active.current().ok_or_else(|| {
            AppError::Knowledge(format!(
                "No active index at {:?}. Run 'libris ingest' first.",
                config.paths.index_path
            ))
        })?;

        let catalog = Catalog::from_snapshot(&snapshot);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        } else {
            print!("{}", catalog.render_text());
        }
        Ok(())
    }
}
