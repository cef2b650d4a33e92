use sha2::{Digest, Sha256};

use coterie_store::Store;

use crate::error::MemoryResult;

#[derive(Debug, Clone)]
pub struct MarkdownChunk {
    pub chunk_id: String,
    pub heading: String,
    pub chunk_text: String,
}

/// Splits on `#`/`##`/`###` heading boundaries rather than a fixed token
/// window: durable memory and daily logs are already heading-structured, so
/// chunking along that structure keeps each chunk topically coherent.
/// `chunk_id` is the first 16 hex characters of the section's SHA-256,
/// giving content-addressed, order-independent identity for dedup.
pub fn chunk_markdown(text: &str) -> Vec<MarkdownChunk> {
    let mut chunks = Vec::new();
    let mut boundaries = vec![0];
    let bytes = text.as_bytes();
    for (i, _) in text.match_indices('\n') {
        let after = i + 1;
        if after < bytes.len() && bytes[after] == b'#' {
            boundaries.push(after);
        }
    }
    boundaries.push(text.len());
    boundaries.dedup();

    for window in boundaries.windows(2) {
        let section = text[window[0]..window[1]].trim();
        if section.is_empty() {
            continue;
        }
        let first_line = section.lines().next().unwrap_or("");
        let heading = if first_line.starts_with('#') {
            first_line.trim_start_matches('#').trim().to_string()
        } else {
            String::new()
        };
        let mut hasher = Sha256::new();
        hasher.update(section.as_bytes());
        let chunk_id = format!("{:x}", hasher.finalize())[..16].to_string();
        chunks.push(MarkdownChunk { chunk_id, heading, chunk_text: section.to_string() });
    }
    chunks
}

/// Chunks `text` and indexes every chunk not already present, by content
/// hash. Returns how many chunks were newly indexed.
pub async fn index_markdown(store: &Store, text: &str) -> MemoryResult<usize> {
    let mut new_count = 0;
    for chunk in chunk_markdown(text) {
        if store.insert_chunk_if_new(&chunk.chunk_id, &chunk.heading, &chunk.chunk_text).await? {
            new_count += 1;
        }
    }
    Ok(new_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_heading_boundaries_and_keeps_heading_text() {
        let text = "# Intro\nhello\n\n## Key Facts\nuser likes rust\n\n## Open Tasks\nship it\n";
        let chunks = chunk_markdown(text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].heading, "Key Facts");
        assert!(chunks[1].chunk_text.contains("user likes rust"));
    }

    #[test]
    fn identical_sections_produce_identical_chunk_ids() {
        let a = chunk_markdown("## Key Facts\nsame content\n");
        let b = chunk_markdown("## Key Facts\nsame content\n");
        assert_eq!(a[0].chunk_id, b[0].chunk_id);
        assert_eq!(a[0].chunk_id.len(), 16);
    }
}
