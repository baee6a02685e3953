//! Library catalog built from a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::vector_index::Snapshot;

/// One book in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub book_id: String,
    pub file_name: String,
    pub chunks: u32,
    pub characters: u64,
}

/// Books served by a snapshot, in ingestion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub books: Vec<CatalogEntry>,
    pub total_chunks: u64,
    pub total_characters: u64,
}

impl Catalog {
    /// Character counts cover each book's chunked span once, so overlap
    /// between neighbouring chunks is not counted twice.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut books: Vec<CatalogEntry> = Vec::new();
        // Furthest character offset already counted, per book
        let mut covered: Vec<usize> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut total_characters = 0u64;

        for chunk in snapshot.chunks() {
            let index = *positions.entry(chunk.file_name.as_str()).or_insert_with(|| {
                books.push(CatalogEntry {
                    book_id: chunk.book_id.clone(),
                    file_name: chunk.file_name.clone(),
                    chunks: 0,
                    characters: 0,
                });
                covered.push(0);
                books.len() - 1
            });

            let from = chunk.start.max(covered[index]);
            let characters = chunk.end.saturating_sub(from) as u64;
            covered[index] = covered[index].max(chunk.end);
            total_characters += characters;

            let entry = &mut books[index];
            entry.chunks += 1;
            entry.characters += characters;
        }

        Self {
            model: snapshot.model().to_string(),
            dimensions: snapshot.dimensions(),
            created_at: snapshot.created_at(),
            total_chunks: snapshot.len() as u64,
            total_characters,
            books,
        }
    }

    /// Plain-text listing for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Library: {} books, {} chunks, {} characters",
            self.books.len(),
            self.total_chunks,
            self.total_characters
        );
        let _ = writeln!(
            out,
            "Index: model {} ({} dimensions), built {}",
            self.model,
            self.dimensions,
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        out.push('\n');

        for (i, book) in self.books.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {} ({}) - {} chunks, {} characters",
                i + 1,
                book.book_id,
                book.file_name,
                book.chunks,
                book.characters
            );
        }
        out
    }
}
