//! In-memory nearest-neighbour index over historical build embeddings

use crate::error::IndexError;
use crate::types::{BuildRecord, RetrievalHit};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
struct IndexedBuild {
    build: Arc<BuildRecord>,
    unit: Vec<f32>,
}

/// Vectors are stored L2-normalised so cosine similarity is a dot product.
///
/// Mutated only while loading; afterwards it is shared behind an `Arc` and
/// queried concurrently without locks.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexedBuild>,
    ids: HashSet<String>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn insert(&mut self, record: BuildRecord) -> Result<(), IndexError> {
        if self.ids.contains(&record.id) {
            return Err(IndexError::DuplicateId(record.id));
        }
        let unit = l2_normalize(&record.embedding_vector)
            .ok_or_else(|| IndexError::ZeroVector(record.id.clone()))?;
        match self.dimension {
            Some(expected) if expected != unit.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: unit.len(),
                })
            }
            _ => self.dimension = Some(unit.len()),
        }

        self.ids.insert(record.id.clone());
        self.entries.push(IndexedBuild {
            build: Arc::new(record),
            unit,
        });
        Ok(())
    }

    /// Load a batch of records; stops at the first invalid one.
    pub fn bulk_load(&mut self, records: Vec<BuildRecord>) -> Result<usize, IndexError> {
        let count = records.len();
        self.entries.reserve(count);
        for record in records {
            self.insert(record)?;
        }
        info!(
            "Vector index loaded {} builds (dimension {:?})",
            count, self.dimension
        );
        Ok(count)
    }

    /// Read a JSON array of build records.
    pub fn load_json_file(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<BuildRecord> = serde_json::from_str(&content)?;
        let mut index = Self::new();
        index.bulk_load(records)?;
        Ok(index)
    }

    /// Top-`k` builds by cosine similarity, ties going to the more popular
    /// build. `k` is clamped to the index size; an empty index yields no hits.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        // A zero query vector matches nothing in particular: every build
        // scores 0 and popularity decides.
        let query = l2_normalize(vector).unwrap_or_else(|| vec![0.0; dimension]);

        let mut scored: Vec<(f32, &IndexedBuild)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&query, &entry.unit), entry))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.build.popularity_rank.cmp(&b.build.popularity_rank))
                .then_with(|| a.build.id.cmp(&b.build.id))
        });

        Ok(scored
            .into_iter()
            .take(k.min(self.entries.len()))
            .map(|(similarity, entry)| RetrievalHit {
                build: entry.build.clone(),
                similarity: similarity.clamp(-1.0, 1.0),
            })
            .collect())
    }
}

/// Cosine similarity for embeddings (assumes unit-normalized vectors)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Unit-length copy of `v`, or `None` for empty/zero/non-finite input.
pub fn l2_normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if v.is_empty() || !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(id: &str, rank: u32, embedding: Vec<f32>) -> BuildRecord {
        BuildRecord {
            id: id.to_string(),
            class: "Ranger".to_string(),
            ascendancy: None,
            main_skill: "Lightning Arrow".to_string(),
            support_skills: vec![],
            weapon_type: "Bow".to_string(),
            keystones: vec![],
            dps: 1.0,
            life: 1.0,
            energy_shield: 0.0,
            cost: Some(1.0),
            popularity_rank: rank,
            embedding_vector: embedding,
        }
    }

    #[test]
    fn returns_top_k_by_similarity() {
        let mut index = VectorIndex::new();
        index
            .bulk_load(vec![
                build("x", 5, vec![1.0, 0.0]),
                build("y", 5, vec![0.0, 2.0]),
                build("xy", 5, vec![1.0, 1.0]),
            ])
            .unwrap();

        let hits = index.query(&[3.0, 0.1], 2).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.build.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy"]);
        assert!(hits[0].similarity > hits[1].similarity);
        assert!(hits[0].similarity <= 1.0);
    }

    #[test]
    fn ties_go_to_more_popular_build() {
        let mut index = VectorIndex::new();
        index
            .bulk_load(vec![
                build("niche", 40, vec![1.0, 0.0]),
                build("meta", 2, vec![2.0, 0.0]),
            ])
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].build.id, "meta");
        assert_eq!(hits[1].build.id, "niche");
    }

    #[test]
    fn empty_index_and_oversized_k() {
        let index = VectorIndex::new();
        assert!(index.query(&[1.0, 2.0], 5).unwrap().is_empty());

        let mut index = VectorIndex::new();
        index.insert(build("only", 1, vec![0.5, 0.5])).unwrap();
        assert_eq!(index.query(&[1.0, 0.0], 10).unwrap().len(), 1);
        assert!(index.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_records() {
        let mut index = VectorIndex::new();
        index.insert(build("a", 1, vec![1.0, 0.0])).unwrap();
        assert!(matches!(
            index.insert(build("a", 1, vec![0.0, 1.0])),
            Err(IndexError::DuplicateId(_))
        ));
        assert!(matches!(
            index.insert(build("b", 1, vec![0.0, 0.0])),
            Err(IndexError::ZeroVector(_))
        ));
        assert!(matches!(
            index.insert(build("c", 1, vec![1.0, 0.0, 0.0])),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            index.query(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn loads_knowledge_base_from_json() {
        let path = std::env::temp_dir().join(format!("buildsmith-kb-{}.json", std::process::id()));
        let records = vec![build("a", 1, vec![1.0, 0.0]), build("b", 2, vec![0.0, 1.0])];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let index = VectorIndex::load_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn normalisation() {
        let unit = l2_normalize(&[3.0, 4.0]).unwrap();
        assert!((unit[0] - 0.6).abs() < 1e-6 && (unit[1] - 0.8).abs() < 1e-6);
        assert!(l2_normalize(&[]).is_none());
        assert!(l2_normalize(&[0.0, 0.0]).is_none());
    }
}
