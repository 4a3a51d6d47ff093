//! Vector stores holding embedded meanings.

use crate::{IndexError, SubjectType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// What is stored next to each vector.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Payload {
    pub meaning: String,
    pub subject: SubjectType,
    pub source_path: PathBuf,
    /// Function name, `class_<Name>`, or the imported module for relations.
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Restricts which records a query may return.
#[derive(Clone, Debug, Default)]
pub struct QueryFilter {
    pub subject: Option<SubjectType>,
    pub exclude_path: Option<PathBuf>,
}

impl QueryFilter {
    fn accepts(&self, payload: &Payload) -> bool {
        self.subject.is_none_or(|s| s == payload.subject)
            && self
                .exclude_path
                .as_ref()
                .is_none_or(|p| *p != payload.source_path)
    }
}

pub trait VectorStore: Send + Sync {
    /// Inserts or replaces the record with this id.
    fn upsert(&self, id: &str, vector: Vec<f32>, payload: Payload) -> Result<(), IndexError>;

    /// The `top_k` most similar records accepted by `filter`, by descending score.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    fn get(&self, id: &str) -> Result<Option<Payload>, IndexError>;

    /// Removes every record whose source is `path`. Returns how many were removed.
    fn delete_by_path(&self, path: &Path) -> Result<usize, IndexError>;

    /// Every distinct source path with at least one record.
    fn source_paths(&self) -> Result<BTreeSet<PathBuf>, IndexError>;

    fn clear(&self) -> Result<usize, IndexError>;

    /// Number of records, by subject type.
    fn counts(&self) -> Result<HashMap<SubjectType, usize>, IndexError>;

    /// Writes pending changes to durable storage, if the store has any.
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Point {
    vector: Vec<f32>,
    payload: Payload,
}

#[derive(Default, Deserialize, Serialize)]
struct Snapshot {
    /// Name of the embedding space the vectors belong to.
    embedder: String,
    points: BTreeMap<String, Point>,
}

/// In-memory store with cosine similarity, optionally persisted to a JSON file.
pub struct MemoryVectorStore {
    snapshot: RwLock<Snapshot>,
    path: Option<PathBuf>,
}

impl MemoryVectorStore {
    pub fn new(embedder: &str) -> MemoryVectorStore {
        MemoryVectorStore {
            snapshot: RwLock::new(Snapshot {
                embedder: embedder.to_string(),
                points: BTreeMap::new(),
            }),
            path: None,
        }
    }

    /// Loads the store persisted at `path`. A missing file, an unreadable file, or one written
    /// for a different embedder yields an empty store that will be written to `path` on flush.
    pub fn open(path: &Path, embedder: &str) -> MemoryVectorStore {
        let mut store = MemoryVectorStore::new(embedder);
        store.path = Some(path.to_path_buf());
        let loaded = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)
                .map_err(|e| warn!("Ignoring unreadable semantic index {}: {e}", path.display()))
                .ok(),
            Err(_) => None,
        };
        match loaded {
            Some(snapshot) if snapshot.embedder == embedder => {
                debug!("Loaded {} semantic records", snapshot.points.len());
                store.snapshot = RwLock::new(snapshot);
            }
            Some(snapshot) => warn!(
                "Discarding semantic index built with {} (now using {embedder})",
                snapshot.embedder
            ),
            None => {}
        }
        store
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Snapshot>, IndexError> {
        self.snapshot.read().map_err(|_| IndexError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Snapshot>, IndexError> {
        self.snapshot.write().map_err(|_| IndexError::Poisoned)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

impl VectorStore for MemoryVectorStore {
    fn upsert(&self, id: &str, vector: Vec<f32>, payload: Payload) -> Result<(), IndexError> {
        let mut snapshot = self.write()?;
        if let Some(existing) = snapshot.points.values().next()
            && existing.vector.len() != vector.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected: existing.vector.len(),
                actual: vector.len(),
            });
        }
        snapshot
            .points
            .insert(id.to_string(), Point { vector, payload });
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let snapshot = self.read()?;
        let mut scored: Vec<ScoredPoint> = snapshot
            .points
            .iter()
            .filter(|(_, point)| filter.accepts(&point.payload))
            .map(|(id, point)| ScoredPoint {
                id: id.clone(),
                score: cosine(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        // Points iterate in id order and the sort is stable, so equal scores stay id-ordered.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn get(&self, id: &str) -> Result<Option<Payload>, IndexError> {
        Ok(self.read()?.points.get(id).map(|p| p.payload.clone()))
    }

    fn delete_by_path(&self, path: &Path) -> Result<usize, IndexError> {
        let mut snapshot = self.write()?;
        let before = snapshot.points.len();
        snapshot.points.retain(|_, p| p.payload.source_path != path);
        Ok(before - snapshot.points.len())
    }

    fn source_paths(&self) -> Result<BTreeSet<PathBuf>, IndexError> {
        Ok(self
            .read()?
            .points
            .values()
            .map(|p| p.payload.source_path.clone())
            .collect())
    }

    fn clear(&self) -> Result<usize, IndexError> {
        let mut snapshot = self.write()?;
        let count = snapshot.points.len();
        snapshot.points.clear();
        Ok(count)
    }

    fn counts(&self) -> Result<HashMap<SubjectType, usize>, IndexError> {
        let mut counts = HashMap::new();
        for point in self.read()?.points.values() {
            *counts.entry(point.payload.subject).or_default() += 1;
        }
        Ok(counts)
    }

    fn flush(&self) -> Result<(), IndexError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec(&*self.read()?)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
