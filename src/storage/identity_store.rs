use crate::common::{FaceWardError, Result};
use crate::core::recognizer::Embedding;
use crate::storage::table::EmbeddingTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Placeholder identity for faces that were offered enrollment and dismissed.
pub const KNOWN_STRANGER: &str = "Known Stranger";

/// One persisted `(name, embedding)` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRow {
    pub name: String,
    pub embedding: Embedding,
}

/// A named person with the mean of all their stored embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub centroid: Embedding,
}

impl Identity {
    pub fn is_known_stranger(&self) -> bool {
        self.name == KNOWN_STRANGER
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub name: String,
    pub rows: usize,
}

/// Groups raw rows into identities. Holds no cache: callers reload after
/// every successful append.
#[derive(Clone)]
pub struct IdentityStore {
    table: Arc<dyn EmbeddingTable>,
}

impl IdentityStore {
    pub fn new(table: Arc<dyn EmbeddingTable>) -> Self {
        Self { table }
    }

    /// All identities in order of first appearance. An empty table gives an
    /// empty list.
    pub fn load_all(&self) -> Result<Vec<Identity>> {
        let groups = group_rows(self.table.rows()?);

        let identities = groups
            .into_iter()
            .map(|(name, embeddings)| Identity {
                centroid: average_embeddings(&embeddings),
                name,
            })
            .collect::<Vec<_>>();

        tracing::debug!("Loaded {} identities", identities.len());
        Ok(identities)
    }

    pub fn append(&self, name: &str, embedding: &[f32]) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FaceWardError::Storage("Identity name must not be empty".into()));
        }
        if embedding.is_empty() {
            return Err(FaceWardError::Storage("Embedding must not be empty".into()));
        }
        if let Some(existing) = self.table.rows()?.first() {
            if existing.embedding.len() != embedding.len() {
                return Err(FaceWardError::Storage(format!(
                    "Embedding length {} does not match stored length {}",
                    embedding.len(), existing.embedding.len()
                )));
            }
        }

        self.table.insert(&EmbeddingRow {
            name: name.to_string(),
            embedding: embedding.to_vec(),
        })?;
        tracing::info!("Stored embedding for {}", name);
        Ok(())
    }

    /// Row count per identity, in order of first appearance.
    pub fn summaries(&self) -> Result<Vec<IdentitySummary>> {
        Ok(group_rows(self.table.rows()?)
            .into_iter()
            .map(|(name, embeddings)| IdentitySummary { name, rows: embeddings.len() })
            .collect())
    }
}

fn group_rows(rows: Vec<EmbeddingRow>) -> Vec<(String, Vec<Embedding>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Embedding>)> = Vec::new();

    for row in rows {
        match index.get(&row.name) {
            Some(&i) => {
                if groups[i].1[0].len() != row.embedding.len() {
                    tracing::warn!("Skipping row for {} with mismatched embedding length", row.name);
                    continue;
                }
                groups[i].1.push(row.embedding);
            }
            None => {
                if row.embedding.is_empty() {
                    continue;
                }
                index.insert(row.name.clone(), groups.len());
                groups.push((row.name, vec![row.embedding]));
            }
        }
    }

    groups
}

pub fn average_embeddings(embeddings: &[Embedding]) -> Embedding {
    if embeddings.is_empty() {
        return vec![];
    }

    let embedding_size = embeddings[0].len();
    let mut averaged = vec![0.0f32; embedding_size];

    for embedding in embeddings {
        for (i, &value) in embedding.iter().enumerate() {
            averaged[i] += value;
        }
    }

    let count = embeddings.len() as f32;
    for value in &mut averaged {
        *value /= count;
    }

    averaged
}
