
use super::{ChunkPayload, DOCUMENT_ID_FIELD, EqualityFilter, PointSummary, SearchHit, VectorPoint};
use crate::{RagError, config::Config};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vector index backed by embedded LanceDB.
///
/// The collection schema (vector dimensionality, payload fields) is fixed at
/// creation and never migrated; a dimension disagreement between the stored
/// table and the configuration is a hard error.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    dimension: usize,
}

impl VectorStore {
    /// Connect to the vector database and ensure the collection exists.
    /// Creating an already-existing collection with identical parameters is
    /// a no-op.
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, RagError> {
        let db_path = config.vector_database_path();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::Index(format!("Failed to create vector database directory: {}", e))
            })?;
        }

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to connect to LanceDB: {}", e)))?;

        let store = Self {
            connection,
            table_name: config.index.collection.clone(),
            dimension: config.embedding.dimension as usize,
        };

        store.ensure_collection().await?;

        info!(
            "Vector store ready: collection '{}', {} dimensions",
            store.table_name, store.dimension
        );
        Ok(store)
    }

    /// Create the collection table if absent; verify its dimension if not.
    async fn ensure_collection(&self) -> Result<(), RagError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            let existing = self.existing_dimension().await?;
            if existing != self.dimension {
                // No silent migration: embeddings from a different model
                // would land in an incompatible vector space.
                return Err(RagError::Index(format!(
                    "Collection '{}' stores {}-dim vectors but {} are configured; \
                     reset the index or fix the configuration",
                    self.table_name, existing, self.dimension
                )));
            }
            debug!(
                "Collection '{}' already exists with matching dimension",
                self.table_name
            );
            return Ok(());
        }

        self.connection
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to create collection: {}", e)))?;

        info!(
            "Created collection '{}' with {} dimensions",
            self.table_name, self.dimension
        );
        Ok(())
    }

    /// Read the vector dimension out of the stored table schema.
    async fn existing_dimension(&self) -> Result<usize, RagError> {
        let table = self.open_table().await?;

        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Index(format!("Failed to get collection schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(RagError::Index(format!(
            "Collection '{}' has no vector column",
            self.table_name
        )))
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new(DOCUMENT_ID_FIELD, DataType::Utf8, false),
            Field::new("filename", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn open_table(&self) -> Result<lancedb::Table, RagError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to open collection: {}", e)))
    }

    /// Bulk-write points. Every vector is checked against the collection
    /// dimension before anything is written.
    #[inline]
    pub async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), RagError> {
        if points.is_empty() {
            debug!("No points to store");
            return Ok(());
        }

        for point in &points {
            if point.vector.len() != self.dimension {
                return Err(RagError::Index(format!(
                    "Point {} has a {}-dim vector but collection '{}' stores {} dimensions",
                    point.id,
                    point.vector.len(),
                    self.table_name,
                    self.dimension
                )));
            }
        }

        debug!("Storing batch of {} points", points.len());

        let record_batch = self.record_batch(&points)?;
        let table = self.open_table().await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to insert points: {}", e)))?;

        self.ensure_filter_index(&table).await;

        info!("Stored {} points in '{}'", points.len(), self.table_name);
        Ok(())
    }

    /// Ensure the payload field used for filtering is indexed. Best-effort:
    /// "already exists" is fine, anything else is logged and the write still
    /// stands.
    async fn ensure_filter_index(&self, table: &lancedb::Table) {
        match table
            .create_index(&[DOCUMENT_ID_FIELD], lancedb::index::Index::Auto)
            .execute()
            .await
        {
            Ok(()) => debug!("Ensured index on '{}'", DOCUMENT_ID_FIELD),
            Err(e) if e.to_string().to_lowercase().contains("already exist") => {
                debug!("Index on '{}' already exists", DOCUMENT_ID_FIELD);
            }
            Err(e) => warn!("Could not ensure index on '{}': {}", DOCUMENT_ID_FIELD, e),
        }
    }

    fn record_batch(&self, points: &[VectorPoint]) -> Result<RecordBatch, RagError> {
        let len = points.len();

        let mut ids = Vec::with_capacity(len);
        let mut document_ids = Vec::with_capacity(len);
        let mut filenames = Vec::with_capacity(len);
        let mut texts = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for point in points {
            ids.push(point.id.as_str());
            document_ids.push(point.payload.document_id.as_str());
            filenames.push(point.payload.filename.as_str());
            texts.push(point.payload.text.as_str());
            chunk_indices.push(point.payload.chunk_index);
            created_ats.push(point.payload.created_at.as_str());
            flat_values.extend_from_slice(&point.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| RagError::Index(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(document_ids)),
            Arc::new(StringArray::from(filenames)),
            Arc::new(StringArray::from(texts)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| RagError::Index(format!("Failed to create record batch: {}", e)))
    }

    /// Nearest-neighbor search by cosine similarity, highest first, with an
    /// optional equality filter on a payload field.
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&EqualityFilter>,
    ) -> Result<Vec<SearchHit>, RagError> {
        if query_vector.len() != self.dimension {
            return Err(RagError::Index(format!(
                "Query vector has {} dimensions but collection '{}' stores {}",
                query_vector.len(),
                self.table_name,
                self.dimension
            )));
        }

        debug!(
            "Searching '{}' (limit {}, filtered: {})",
            self.table_name,
            limit,
            filter.is_some()
        );

        let table = self.open_table().await?;

        let mut query = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Index(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(filter) = filter {
            query = query.only_if(filter.to_predicate());
        }

        let mut stream = query
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Index(format!("Failed to read search results: {}", e)))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Delete every point belonging to one document.
    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<(), RagError> {
        debug!("Deleting points for document: {}", document_id);

        let table = self.open_table().await?;
        let predicate = EqualityFilter::document(document_id).to_predicate();
        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Index(format!("Failed to delete document points: {}", e)))?;

        info!("Deleted points for document: {}", document_id);
        Ok(())
    }

    /// Whole-collection reset: drop and recreate empty.
    #[inline]
    pub async fn reset(&self) -> Result<(), RagError> {
        info!("Resetting collection '{}'", self.table_name);

        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::Index(format!("Failed to drop collection: {}", e)))?;
        }

        self.ensure_collection().await
    }

    /// Total number of stored points.
    #[inline]
    pub async fn count(&self) -> Result<u64, RagError> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Index(format!("Failed to count points: {}", e)))?;
        Ok(count as u64)
    }

    /// List raw indexed points, for debugging.
    #[inline]
    pub async fn list_points(&self, limit: usize) -> Result<Vec<PointSummary>, RagError> {
        let table = self.open_table().await?;

        let mut stream = table
            .query()
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Index(format!("Failed to scan points: {}", e)))?;

        let mut points = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Index(format!("Failed to read point scan: {}", e)))?
        {
            let ids = string_column(&batch, "id")?;
            let document_ids = string_column(&batch, DOCUMENT_ID_FIELD)?;
            let filenames = string_column(&batch, "filename")?;
            let chunk_indices = u32_column(&batch, "chunk_index")?;

            for row in 0..batch.num_rows() {
                points.push(PointSummary {
                    id: ids.value(row).to_string(),
                    document_id: document_ids.value(row).to_string(),
                    filename: filenames.value(row).to_string(),
                    chunk_index: chunk_indices.value(row),
                });
            }
        }

        Ok(points)
    }
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>, RagError> {
    let document_ids = string_column(batch, DOCUMENT_ID_FIELD)?;
    let filenames = string_column(batch, "filename")?;
    let texts = string_column(batch, "text")?;
    let chunk_indices = u32_column(batch, "chunk_index")?;
    let created_ats = string_column(batch, "created_at")?;

    let distances = batch
        .column_by_name("_distance")
        .map(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let distance = distances
            .flatten()
            .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        hits.push(SearchHit {
            // Cosine distance to similarity; higher is better
            score: 1.0 - distance,
            payload: ChunkPayload {
                document_id: document_ids.value(row).to_string(),
                filename: filenames.value(row).to_string(),
                text: texts.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                created_at: created_ats.value(row).to_string(),
            },
        });
    }

    Ok(hits)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, RagError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Index(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Index(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, RagError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Index(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Index(format!("Invalid {} column type", name)))
}
