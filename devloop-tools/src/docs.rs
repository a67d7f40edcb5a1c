//! `query_docs`: keyword search over a directory of Markdown and text notes.
//!
//! Each file is one document. Documents and the query are mapped to TF-IDF
//! vectors over a shared vocabulary and ranked by cosine similarity. The index
//! is rebuilt per query, so edits to the knowledge base show up immediately.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use devloop::io::protocol::docs_replies;

const STOP_WORDS: [&str; 48] = [
    "the", "a", "an", "in", "on", "at", "to", "for", "of", "and", "or", "is", "are", "was", "be",
    "by", "it", "this", "that", "with", "use", "can", "will", "not", "from", "has", "have", "its",
    "as", "but", "if", "each", "all", "any", "both", "how", "what", "when", "where", "which",
    "using", "used", "also", "into", "than", "then", "so", "do",
];

const DOC_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Snippet bodies longer than this are cut at a char boundary.
const SNIPPET_CHARS: usize = 1_200;

struct Document {
    topic: String,
    content: String,
    terms: HashMap<String, usize>,
    len: usize,
}

pub struct DocsIndex {
    dir: PathBuf,
}

impl DocsIndex {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[instrument(skip_all, fields(dir = %self.dir.display(), limit = limit))]
    pub fn query(&self, query: &str, limit: usize) -> Result<String> {
        if !self.dir.is_dir() {
            bail!("knowledge base not found at {}", self.dir.display());
        }
        let docs = self.load()?;
        let df = document_frequencies(&docs);
        let query_terms = term_counts(&tokenize(query));
        if !query_terms.keys().any(|term| df.contains_key(term)) {
            return Ok(docs_replies::NO_KNOWN_TERMS.to_string());
        }

        let n_docs = docs.len();
        let query_vec = weights(&query_terms, tokenize(query).len(), &df, n_docs);
        let mut scored: Vec<(f64, &Document)> = docs
            .iter()
            .map(|doc| {
                let doc_vec = weights(&doc.terms, doc.len, &df, n_docs);
                (cosine(&query_vec, &doc_vec), doc)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.topic.cmp(&b.1.topic)));
        scored.truncate(limit);
        debug!(documents = n_docs, hits = scored.len(), "docs ranked");

        if scored.is_empty() {
            return Ok(docs_replies::NO_RELEVANT_DOCS.to_string());
        }
        let snippets: Vec<String> = scored
            .iter()
            .enumerate()
            .map(|(idx, (score, doc))| {
                format!(
                    "[Snippet {}: {} (score: {score:.3})]\n{}",
                    idx + 1,
                    doc.topic,
                    snippet(&doc.content)
                )
            })
            .collect();
        Ok(snippets.join("\n\n"))
    }

    fn load(&self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for entry in WalkDir::new(&self.dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", self.dir.display()))?;
            let path = entry.path();
            let wanted = entry.file_type().is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| DOC_EXTENSIONS.contains(&ext));
            if !wanted {
                continue;
            }
            let content =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            let tokens = tokenize(&content);
            let topic = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
                .unwrap_or_else(|| "general".to_string());
            docs.push(Document {
                topic,
                len: tokens.len(),
                terms: term_counts(&tokens),
                content: content.trim().to_string(),
            });
        }
        Ok(docs)
    }
}

/// Lowercase alphabetic words, minus stop words and short words.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .filter(|word| word.starts_with(|c: char| c.is_ascii_alphabetic()))
        .filter(|word| word.len() > 2 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

fn term_counts(tokens: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}

fn document_frequencies(docs: &[Document]) -> HashMap<String, usize> {
    let mut df = HashMap::new();
    for doc in docs {
        let unique: HashSet<&String> = doc.terms.keys().collect();
        for term in unique {
            *df.entry(term.clone()).or_insert(0) += 1;
        }
    }
    df
}

/// Smoothed TF-IDF weights for terms known to the corpus.
fn weights(
    counts: &HashMap<String, usize>,
    total: usize,
    df: &HashMap<String, usize>,
    n_docs: usize,
) -> HashMap<String, f64> {
    let total = total.max(1) as f64;
    counts
        .iter()
        .filter_map(|(term, count)| {
            let freq = *df.get(term)?;
            let idf = ((n_docs as f64 + 1.0) / (freq as f64 + 1.0)).ln() + 1.0;
            Some((term.clone(), *count as f64 / total * idf))
        })
        .collect()
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &HashMap<String, f64>| v.values().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 { 0.0 } else { dot / denom }
}

fn snippet(content: &str) -> String {
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
