//! Loads a local corpus into indexable chunks.
//!
//! Accepts either a JSONL file of documents (`{id, title, url, text, categories}`)
//! or a directory of `.txt` files, where the parent directory name becomes the
//! category. Paragraphs above the token cap are split with overlap.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::DocumentChunk;

/// Rough token count used for chunking and context budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f32 / 0.75).ceil() as usize
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_percent: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 500, overlap_percent: 0.2 }
    }
}

#[derive(Debug, Deserialize)]
struct CorpusDocument {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    text: String,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Default)]
pub struct CorpusLoader {
    chunking_config: ChunkingConfig,
}

impl CorpusLoader {
    pub fn new() -> Self { Self::default() }

    pub fn with_chunking(chunking_config: ChunkingConfig) -> Self { Self { chunking_config } }

    pub fn load(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        if path.is_dir() {
            self.load_txt_dir(path)
        } else {
            self.load_jsonl(path)
        }
    }

    pub fn load_jsonl(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut all_chunks = Vec::new();
        let mut docs = 0usize;
        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() { continue; }
            let doc: CorpusDocument = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid document", path.display(), line_no + 1))?;
            all_chunks.extend(self.chunk_content(&doc.text, &doc.id, &doc.title, &doc.url, &doc.categories));
            docs += 1;
        }
        info!(documents = docs, chunks = all_chunks.len(), path = %path.display(), "loaded corpus");
        Ok(all_chunks)
    }

    pub fn load_txt_dir(&self, data_dir: &Path) -> Result<Vec<DocumentChunk>> {
        let files = self.list_txt_files(data_dir);
        if files.is_empty() {
            info!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(file = %file_path.display(), n = file_index + 1, total = files.len(), "processing file");
            let content = self.read_file_content(file_path)?;
            let doc_id = self.extract_doc_id(file_path);
            let category = self.get_category_from_path(file_path, data_dir);
            let url = format!("file://{}", file_path.display());
            all_chunks.extend(self.chunk_content(&content, &doc_id, &doc_id, &url, &[category]));
        }
        info!(files = files.len(), chunks = all_chunks.len(), "processed corpus directory");
        Ok(all_chunks)
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn extract_doc_id(&self, file_path: &Path) -> String {
        file_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| file_path.display().to_string())
    }

    fn get_category_from_path(&self, file_path: &Path, data_dir: &Path) -> String {
        let relative_path = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        relative_path
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "misc".to_string())
    }

    fn chunk_content(&self, content: &str, doc_id: &str, title: &str, url: &str, categories: &[String]) -> Vec<DocumentChunk> {
        let mut pieces = Vec::new();
        for paragraph in content.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() { continue; }
            if estimate_tokens(paragraph) <= self.chunking_config.max_tokens {
                pieces.push(paragraph.to_string());
            } else {
                pieces.extend(self.split_paragraph_with_overlap(paragraph));
            }
        }
        let total_chunks = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| DocumentChunk {
                id: format!("{}#{}", doc_id, chunk_index),
                doc_id: doc_id.to_string(),
                title: title.to_string(),
                url: url.to_string(),
                categories: categories.to_vec(),
                content,
                chunk_index,
                total_chunks,
            })
            .collect()
    }

    fn split_paragraph_with_overlap(&self, paragraph: &str) -> Vec<String> {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        let words_per_chunk = ((self.chunking_config.max_tokens as f32 * 0.75) as usize).max(1);
        let overlap_words = ((words_per_chunk as f32 * self.chunking_config.overlap_percent) as usize).min(words_per_chunk - 1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end >= words.len() { break; }
            start = end - overlap_words;
        }
        chunks
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("txt") { txt_files.push(path.to_path_buf()); }
        }
        txt_files.sort();
        txt_files
    }
}
