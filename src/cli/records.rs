//! Record inspection commands
//!
//! `glasswing records list [--json]` — list persisted canvas objects
//! `glasswing records show <id>`     — print one object as JSON

use crate::config::AppConfig;
use anyhow::{Context, Result};
use clap::Subcommand;
use glasswing_canvas::{CanvasObjectRecord, DocumentStore, SqliteDocumentStore};
use uuid::Uuid;

#[derive(Subcommand, Debug)]
pub enum RecordsCommands {
    /// List canvas objects
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one canvas object
    Show {
        /// Object id
        id: Uuid,
    },
}

pub async fn run(cmd: RecordsCommands, config: &AppConfig) -> Result<()> {
    let url = config.store.resolve_url()?;
    let store = SqliteDocumentStore::connect(&url)
        .await
        .with_context(|| format!("Failed to open document store at {url}"))?;

    match cmd {
        RecordsCommands::List { json } => list(&store, json).await,
        RecordsCommands::Show { id } => show(&store, id).await,
    }
}

async fn list(store: &SqliteDocumentStore, json: bool) -> Result<()> {
    let records = store.list_objects().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No canvas objects.");
        return Ok(());
    }
    println!("{:<38} {:<12} {:<14} {}", "ID", "KIND", "SCROLL", "URL");
    for record in &records {
        println!("{}", summary_line(record));
    }
    println!("\n{} object(s)", records.len());
    Ok(())
}

async fn show(store: &SqliteDocumentStore, id: Uuid) -> Result<()> {
    let record = store
        .get_object(id)
        .await?
        .with_context(|| format!("No canvas object {id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub(crate) fn summary_line(record: &CanvasObjectRecord) -> String {
    let scroll = record.scroll_offset();
    format!(
        "{:<38} {:<12} {:<14} {}",
        record.id,
        record.kind.as_str(),
        format!("{:.0},{:.0}", scroll.x, scroll.y),
        record.url()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glasswing_canvas::{Bounds, LiveProps, ObjectKind, Position};

    #[test]
    fn test_summary_line() {
        let record = CanvasObjectRecord::new(
            ObjectKind::LiveSurface,
            Position::default(),
            LiveProps::new("https://a.example/", Bounds::default()),
        );
        let line = summary_line(&record);
        assert!(line.starts_with(&record.id.to_string()));
        assert!(line.contains("0,0"));
        assert!(line.ends_with("https://a.example/"));
    }
}
