//! Vector index of short "meanings" for files, functions, classes and import relations.
//!
//! The index only enriches prompts with related context. It is never consulted to decide whether
//! a file needs translating; that is the structural cache's job.

mod embed;
pub mod meaning;
mod store;

pub use embed::{EmbedError, Embedder, HashingEmbedder, OllamaEmbedder};
pub use store::{MemoryVectorStore, Payload, QueryFilter, ScoredPoint, VectorStore};

use python_analyzer::AnalysisRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the persisted index inside the state directory.
pub const INDEX_FILE: &str = "semantic_index.json";

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    File,
    /// Functions, methods and classes (as `class_<Name>`).
    Function,
    /// A dependency of a file on an imported module.
    Relation,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("vector has {actual} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("semantic index lock poisoned")]
    Poisoned,
    #[error("semantic index I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("semantic index serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    Hashing,
    Ollama,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// When false, no records are written and searches return nothing.
    pub enabled: bool,
    pub embedder: EmbedderKind,
    /// Dimension of the hashing embedder.
    pub dimension: usize,
    pub ollama_url: String,
    pub ollama_model: String,
    pub timeout_secs: u64,
    /// Keep the index on disk between runs.
    pub persist: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            enabled: true,
            embedder: EmbedderKind::Hashing,
            dimension: 256,
            ollama_url: "http://127.0.0.1:11434".into(),
            ollama_model: "nomic-embed-text".into(),
            timeout_secs: 30,
            persist: true,
        }
    }
}

impl Config {
    pub const FIELDS: &[&str] = &[
        "enabled",
        "embedder",
        "dimension",
        "ollama_url",
        "ollama_model",
        "timeout_secs",
        "persist",
    ];

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config {
            dimension: 64,
            persist: false,
            ..Config::default()
        }
    }

    pub fn validate(&self) {
        if self.embedder == EmbedderKind::Hashing && self.dimension == 0 {
            warn!("tools.semantic_index.dimension is 0; using 1, which makes every search result equally related");
        }
    }
}

/// One search result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SemanticMatch {
    pub meaning: String,
    pub score: f32,
    pub subject: SubjectType,
    pub source_path: PathBuf,
    pub name: Option<String>,
}

impl From<ScoredPoint> for SemanticMatch {
    fn from(point: ScoredPoint) -> SemanticMatch {
        SemanticMatch {
            meaning: point.payload.meaning,
            score: point.score,
            subject: point.payload.subject,
            source_path: point.payload.source_path,
            name: point.payload.name,
        }
    }
}

/// Counts of records written by [SemanticIndex::index_analysis].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
    pub relations: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStats {
    pub embedder: String,
    pub files: usize,
    pub functions: usize,
    pub relations: usize,
}

pub struct SemanticIndex {
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
    enabled: bool,
}

/// Stable record id, so re-indexing the same subject replaces it.
fn record_id(subject: SubjectType, path: &Path, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{subject:?}\0{}\0{name}", path.display()).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl SemanticIndex {
    pub fn new(embedder: Box<dyn Embedder>, store: Box<dyn VectorStore>) -> SemanticIndex {
        SemanticIndex {
            embedder,
            store,
            enabled: true,
        }
    }

    /// An index that stores nothing and finds nothing.
    pub fn disabled() -> SemanticIndex {
        let embedder = HashingEmbedder::new(1);
        let store = MemoryVectorStore::new(&embedder.name());
        SemanticIndex {
            embedder: Box::new(embedder),
            store: Box::new(store),
            enabled: false,
        }
    }

    /// Builds the configured index, loading any persisted records from `state_dir`.
    pub fn open(config: &Config, state_dir: &Path) -> SemanticIndex {
        if !config.enabled {
            return SemanticIndex::disabled();
        }
        let embedder: Box<dyn Embedder> = match config.embedder {
            EmbedderKind::Hashing => Box::new(HashingEmbedder::new(config.dimension)),
            EmbedderKind::Ollama => match OllamaEmbedder::new(
                &config.ollama_url,
                &config.ollama_model,
                Duration::from_secs(config.timeout_secs),
            ) {
                Ok(embedder) => Box::new(embedder),
                Err(e) => {
                    warn!("Cannot use Ollama embeddings ({e}); falling back to hashing");
                    Box::new(HashingEmbedder::new(config.dimension))
                }
            },
        };
        let name = embedder.name();
        let store = if config.persist {
            MemoryVectorStore::open(&state_dir.join(INDEX_FILE), &name)
        } else {
            MemoryVectorStore::new(&name)
        };
        info!("Semantic index using {name} embeddings");
        SemanticIndex::new(embedder, Box::new(store))
    }

    fn upsert(
        &self,
        subject: SubjectType,
        path: &Path,
        name: Option<&str>,
        meaning: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), IndexError> {
        if !self.enabled {
            return Ok(());
        }
        let vector = self.embedder.embed(meaning)?;
        let id = record_id(subject, path, name.unwrap_or(""));
        self.store.upsert(
            &id,
            vector,
            Payload {
                meaning: meaning.to_string(),
                subject,
                source_path: path.to_path_buf(),
                name: name.map(str::to_string),
                metadata,
            },
        )
    }

    pub fn index_file(
        &self,
        path: &Path,
        meaning: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), IndexError> {
        self.upsert(SubjectType::File, path, None, meaning, metadata)
    }

    pub fn index_function(
        &self,
        path: &Path,
        name: &str,
        meaning: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), IndexError> {
        self.upsert(SubjectType::Function, path, Some(name), meaning, metadata)
    }

    /// Records that the file at `path` depends on `module`.
    pub fn index_relation(&self, path: &Path, module: &str, meaning: &str) -> Result<(), IndexError> {
        self.upsert(
            SubjectType::Relation,
            path,
            Some(module),
            meaning,
            BTreeMap::new(),
        )
    }

    /// Removes every record derived from `path`.
    pub fn remove_file(&self, path: &Path) -> Result<usize, IndexError> {
        self.store.delete_by_path(path)
    }

    /// Removes the records of every indexed file not in `keep`, such as files deleted since the
    /// index was last persisted. Returns how many records were removed.
    pub fn prune(&self, keep: &HashSet<&Path>) -> Result<usize, IndexError> {
        let mut removed = 0;
        for path in self.store.source_paths()? {
            if !keep.contains(path.as_path()) {
                debug!("Dropping index records of {}", path.display());
                removed += self.store.delete_by_path(&path)?;
            }
        }
        Ok(removed)
    }

    /// Replaces the records for `path` with meanings generated from `record`.
    pub fn index_analysis(
        &self,
        path: &Path,
        stem: &str,
        record: &AnalysisRecord,
    ) -> Result<IndexSummary, IndexError> {
        if !self.enabled {
            return Ok(IndexSummary::default());
        }
        self.remove_file(path)?;
        let mut summary = IndexSummary::default();
        let domain = meaning::detect_domain(stem, record);
        let file_metadata = BTreeMap::from([("domain".to_string(), domain.to_string())]);
        self.index_file(path, &meaning::file_meaning(stem, record), file_metadata)?;
        summary.files += 1;
        for function in &record.functions {
            let metadata = BTreeMap::from([
                ("qualified_name".to_string(), function.qualified_name.clone()),
                ("line".to_string(), function.start_line.to_string()),
            ]);
            self.index_function(
                path,
                &function.qualified_name,
                &meaning::function_meaning(function),
                metadata,
            )?;
            summary.functions += 1;
        }
        for class in &record.classes {
            let metadata = BTreeMap::from([("line".to_string(), class.line.to_string())]);
            self.index_function(
                path,
                &format!("class_{}", class.name),
                &meaning::class_meaning(class),
                metadata,
            )?;
            summary.classes += 1;
        }
        for (module, meaning) in meaning::relation_meanings(stem, record) {
            self.index_relation(path, &module, &meaning)?;
            summary.relations += 1;
        }
        debug!(?summary, "Indexed {}", path.display());
        Ok(summary)
    }

    /// The `top_k` records most similar to `query`, by descending score.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SemanticMatch>, IndexError> {
        self.search_filtered(query, top_k, &QueryFilter::default())
    }

    pub fn search_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<SemanticMatch>, IndexError> {
        if !self.enabled || top_k == 0 {
            return Ok(vec![]);
        }
        let vector = self.embedder.embed(query)?;
        Ok(self
            .store
            .query(&vector, top_k, filter)?
            .into_iter()
            .map(SemanticMatch::from)
            .collect())
    }

    /// Context for translating `path`: matches for `query` from other files only. Errors are
    /// logged and produce no matches.
    pub fn related(&self, path: &Path, query: &str, top_k: usize) -> Vec<SemanticMatch> {
        let filter = QueryFilter {
            subject: None,
            exclude_path: Some(path.to_path_buf()),
        };
        self.search_filtered(query, top_k, &filter)
            .unwrap_or_else(|e| {
                warn!("Semantic search for {} failed: {e}", path.display());
                vec![]
            })
    }

    /// The stored meaning of the file at `path`, if indexed.
    pub fn file_meaning(&self, path: &Path) -> Option<String> {
        let id = record_id(SubjectType::File, path, "");
        self.store.get(&id).ok().flatten().map(|p| p.meaning)
    }

    pub fn clear(&self) -> Result<usize, IndexError> {
        self.store.clear()
    }

    pub fn stats(&self) -> IndexStats {
        let counts = self.store.counts().unwrap_or_default();
        let count = |subject: SubjectType| counts.get(&subject).copied().unwrap_or(0);
        IndexStats {
            embedder: self.embedder.name(),
            files: count(SubjectType::File),
            functions: count(SubjectType::Function),
            relations: count(SubjectType::Relation),
        }
    }

    /// Persists the index, if it is configured to.
    pub fn flush(&self) -> Result<(), IndexError> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests;
