// LanceDB remote index
// Cosine vector search over chunk embeddings


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ChunkMetadata, RemoteIndex, ScoredChunk, VectorRecord};
use crate::config::Config;
use crate::{RagError, Result};

fn db_error(context: &str, error: impl std::fmt::Display) -> RagError {
    RagError::Database(format!("{}: {}", context, error))
}

/// LanceDB table holding one row per chunk.
///
/// The connection is opened on first use and reused afterwards. A failed
/// connect leaves nothing cached, so a backend that comes back later is
/// picked up by the next call.
pub struct LanceIndex {
    uri: String,
    table_name: String,
    dimension: usize,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for LanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceIndex")
            .field("uri", &self.uri)
            .field("table_name", &self.table_name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl LanceIndex {
    #[inline]
    pub fn new(uri: impl Into<String>, table_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            uri: uri.into(),
            table_name: table_name.into(),
            dimension,
            connection: Mutex::new(None),
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.remote_index_uri(),
            config.vector.table_name.clone(),
            config.ollama.embedding_dimension as usize,
        )
    }

    async fn connection(&self) -> Result<Connection> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        debug!("Connecting to LanceDB at {}", self.uri);
        let connection = lancedb::connect(&self.uri)
            .execute()
            .await
            .map_err(|e| db_error("Failed to connect to LanceDB", e))?;
        info!("Connected to LanceDB at {}", self.uri);

        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Open the table, creating it when `create` is set and it does not exist
    async fn table(&self, create: bool) -> Result<Option<Table>> {
        let connection = self.connection().await?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| db_error("Failed to list tables", e))?;

        if table_names.contains(&self.table_name) {
            let table = connection
                .open_table(&self.table_name)
                .execute()
                .await
                .map_err(|e| db_error("Failed to open table", e))?;
            self.check_dimension(&table).await?;
            return Ok(Some(table));
        }

        if !create {
            return Ok(None);
        }

        info!(
            "Creating table {} with {} dimensions",
            self.table_name, self.dimension
        );
        let table = connection
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|e| db_error("Failed to create table", e))?;
        Ok(Some(table))
    }

    /// An existing table built for another dimension is never silently replaced
    async fn check_dimension(&self, table: &Table) -> Result<()> {
        let schema = table
            .schema()
            .await
            .map_err(|e| db_error("Failed to read table schema", e))?;

        let existing = schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| RagError::Database("Table has no vector column".to_string()))?;

        if existing == self.dimension {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: existing,
            })
        }
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    i32::try_from(self.dimension).unwrap_or(i32::MAX),
                ),
                false,
            ),
            Field::new("filename", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("chunk_size", DataType::UInt32, false),
        ]))
    }

    fn record_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch> {
        let mut flat_values = Vec::with_capacity(records.len() * self.dimension);
        for record in records {
            if record.vector.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.vector.len(),
                });
            }
            flat_values.extend_from_slice(&record.vector);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            i32::try_from(self.dimension).unwrap_or(i32::MAX),
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| db_error("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.id.as_str()),
            )),
            Arc::new(vector_array),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.metadata.filename.as_str()),
            )),
            Arc::new(UInt32Array::from_iter_values(
                records.iter().map(|r| r.metadata.chunk_index),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.metadata.text.as_str()),
            )),
            Arc::new(UInt32Array::from_iter_values(
                records.iter().map(|r| r.metadata.chunk_size),
            )),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| db_error("Failed to create record batch", e))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

/// Rows of a search result batch, score = 1 - cosine distance
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredChunk>> {
    let ids = string_column(batch, "id")?;
    let filenames = string_column(batch, "filename")?;
    let texts = string_column(batch, "text")?;
    let chunk_indices = u32_column(batch, "chunk_index")?;
    let chunk_sizes = u32_column(batch, "chunk_size")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|row| {
            let distance = distances
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
            ScoredChunk {
                id: ids.value(row).to_string(),
                score: 1.0 - distance,
                metadata: ChunkMetadata {
                    filename: filenames.value(row).to_string(),
                    chunk_index: chunk_indices.value(row),
                    text: texts.value(row).to_string(),
                    chunk_size: chunk_sizes.value(row),
                },
            }
        })
        .collect())
}

#[async_trait]
impl RemoteIndex for LanceIndex {
    fn describe(&self) -> String {
        format!("lancedb:{}/{}", self.uri, self.table_name)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let batch = self.record_batch(records)?;
        let table = self
            .table(true)
            .await?
            .ok_or_else(|| RagError::Database("Table could not be created".to_string()))?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| db_error("Failed to insert vectors", e))?;

        debug!("Inserted {} vectors into {}", records.len(), self.table_name);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        match self.table(false).await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(|e| db_error("Failed to count rows", e)),
            None => Ok(0),
        }
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let Some(table) = self.table(false).await? else {
            debug!("Table {} does not exist yet", self.table_name);
            return Ok(Vec::new());
        };

        let mut results = table
            .vector_search(vector)
            .map_err(|e| db_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| db_error("Failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| db_error("Failed to read result stream", e))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_all(&self) -> Result<()> {
        let connection = self.connection().await?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| db_error("Failed to list tables", e))?;

        if table_names.contains(&self.table_name) {
            connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| db_error("Failed to drop table", e))?;
            info!("Dropped table {}", self.table_name);
        } else {
            warn!("Table {} did not exist, nothing to delete", self.table_name);
        }
        Ok(())
    }
}
