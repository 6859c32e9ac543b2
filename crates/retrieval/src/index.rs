//! Okapi BM25 index over a JSON array of records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Term-frequency saturation.
pub const K1: f64 = 1.5;
/// Length normalization.
pub const B: f64 = 0.75;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

/// Lowercases `text` and extracts `[a-z0-9]+` runs that stand as whole
/// words. A run touching another word character (`_` or a non-ASCII
/// letter) is not a token, so `hba1c_level` and `café` yield nothing.
pub fn tokenize(text: &str) -> Vec<String> {
    let re = TOKEN_RE.get_or_init(|| Regex::new(r"\b[a-z0-9]+\b").expect("token pattern should compile"));
    let lowered = text.to_lowercase();
    re.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Which record fields feed the index, the returned text, and the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFields {
    /// Fields whose text is concatenated and indexed.
    pub search: Vec<String>,
    /// Field returned as the hit text.
    pub output: String,
    /// Integer id field; the record position is used when absent.
    pub id: String,
}

impl IndexFields {
    pub fn new<S: Into<String>>(
        search: impl IntoIterator<Item = S>,
        output: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            search: search.into_iter().map(Into::into).collect(),
            output: output.into(),
            id: id.into(),
        }
    }
}

impl Default for IndexFields {
    fn default() -> Self {
        Self::new(["observation"], "observation", "id")
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub text: String,
    /// BM25 score rounded to four decimals.
    pub score: f64,
}

#[derive(Debug, Default)]
struct IndexData {
    documents: Vec<Value>,
    ids: Vec<i64>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    /// term -> [(record index, term frequency)]
    postings: HashMap<String, Vec<(usize, u32)>>,
    id_to_index: HashMap<i64, usize>,
}

impl IndexData {
    fn build(documents: Vec<Value>, fields: &IndexFields) -> Self {
        let mut data = IndexData::default();
        let mut total_length = 0usize;

        for (idx, doc) in documents.iter().enumerate() {
            let id = doc
                .get(&fields.id)
                .and_then(Value::as_i64)
                .unwrap_or(idx as i64);
            data.ids.push(id);
            data.id_to_index.entry(id).or_insert(idx);

            let text = fields
                .search
                .iter()
                .map(|field| field_text(doc.get(field)))
                .collect::<Vec<_>>()
                .join(" ");
            let tokens = tokenize(&text);
            data.doc_lengths.push(tokens.len());
            total_length += tokens.len();

            let mut term_freq: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *term_freq.entry(token).or_insert(0) += 1;
            }
            for (term, freq) in term_freq {
                data.postings.entry(term).or_default().push((idx, freq));
            }
        }

        if !documents.is_empty() {
            data.avg_doc_length = total_length as f64 / documents.len() as f64;
        }
        data.documents = documents;
        data
    }

    fn score_all(&self, query_tokens: &[String]) -> Vec<f64> {
        let n = self.documents.len() as f64;
        let mut scores = vec![0.0; self.documents.len()];
        if self.avg_doc_length <= 0.0 {
            return scores;
        }
        for term in query_tokens {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for &(idx, tf) in postings {
                let tf = tf as f64;
                let norm = 1.0 - B + B * self.doc_lengths[idx] as f64 / self.avg_doc_length;
                scores[idx] += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }
        }
        scores
    }
}

/// Renders a JSON field as indexable text.
fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| field_text(Some(v)))
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| format!("{k} {}", field_text(Some(v))))
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
    }
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// BM25 index, safe to share across tasks.
///
/// Queries take a read lock; [`reload`](Self::reload) rebuilds off-lock and
/// swaps the result in.
#[derive(Debug)]
pub struct Bm25Index {
    source: Option<PathBuf>,
    fields: IndexFields,
    data: RwLock<IndexData>,
}

impl Bm25Index {
    /// Loads and indexes a JSON array file.
    ///
    /// A missing or malformed file yields an empty index.
    pub fn load(path: impl AsRef<Path>, fields: IndexFields) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = IndexData::build(read_records(&path), &fields);
        debug!(path = %path.display(), records = data.documents.len(), "BM25 index built");
        Self {
            source: Some(path),
            fields,
            data: RwLock::new(data),
        }
    }

    /// Indexes records held in memory.
    pub fn from_records(records: Vec<Value>, fields: IndexFields) -> Self {
        let data = IndexData::build(records, &fields);
        Self {
            source: None,
            fields,
            data: RwLock::new(data),
        }
    }

    pub fn fields(&self) -> &IndexFields {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.data.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `top_k` records with a positive score, best first.
    ///
    /// Ties keep record order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let data = self.data.read();
        let mut ranked: Vec<(usize, f64)> = data
            .score_all(&query_tokens)
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(idx, score)| SearchHit {
                id: data.ids[idx],
                text: field_text(data.documents[idx].get(&self.fields.output)),
                score: round4(score),
            })
            .collect()
    }

    /// Full record for `id`.
    pub fn get_by_id(&self, id: i64) -> Option<Value> {
        let data = self.data.read();
        data.id_to_index
            .get(&id)
            .map(|&idx| data.documents[idx].clone())
    }

    /// Rebuilds from the backing file. No-op for in-memory indexes.
    pub fn reload(&self) {
        let Some(path) = &self.source else {
            return;
        };
        let rebuilt = IndexData::build(read_records(path), &self.fields);
        debug!(path = %path.display(), records = rebuilt.documents.len(), "BM25 index reloaded");
        *self.data.write() = rebuilt;
    }
}

fn read_records(path: &Path) -> Vec<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read index source");
            return Vec::new();
        }
    };
    if content.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(records)) => records,
        Ok(Value::Object(record)) => vec![Value::Object(record)],
        Ok(_) => {
            warn!(path = %path.display(), "Index source is not a JSON array");
            Vec::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Index source is not valid JSON");
            Vec::new()
        }
    }
}
