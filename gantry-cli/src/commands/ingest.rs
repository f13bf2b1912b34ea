use anyhow::{bail, Context, Result};
use std::io::Read;

use gantry::ingest::Document;

use crate::backends::Services;

/// Parse newline-delimited JSON objects. Blank lines are skipped.
pub fn parse_documents(content: &str) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).with_context(|| format!("line {}: invalid JSON", i + 1))?;
        match value {
            serde_json::Value::Object(document) => documents.push(document),
            other => bail!("line {}: expected a JSON object, got {}", i + 1, other),
        }
    }
    Ok(documents)
}

async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin().read_to_string(&mut content)?;
        return Ok(content);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("cannot read {}", input))
}

pub async fn run_ingest(
    services: &Services,
    index: &str,
    input: &str,
    batch_size: usize,
) -> Result<()> {
    let documents = parse_documents(&read_input(input).await?)?;
    if documents.is_empty() {
        tracing::warn!("no documents in {}", input);
        return Ok(());
    }

    services.resolver.refresh().await;
    let processor = services.ingest_processor();
    let total = documents.len();
    let mut batches = 0;
    for batch in documents.chunks(batch_size.max(1)) {
        processor.ingest(index, batch.to_vec()).await?;
        batches += 1;
    }
    tracing::info!("ingested {} documents into [{}] in {} batches", total, index, batches);

    if let Some(recorder) = &services.recorder {
        for statement in recorder.statements() {
            println!("{};", statement.sql);
        }
    }
    Ok(())
}
