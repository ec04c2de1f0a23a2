//! Tantivy-backed transcript index for local development and tests.
//!
//! One index per collection, either in RAM or under `<root>/<collection>`.
//! Relevance is BM25 over `text` and `description`; the `CreatedAt` window is
//! applied on the stored timestamp after scoring.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, Query, QueryParser};
use tantivy::schema::{self, Schema, Value as TantivyValue, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use super::{IndexHit, IndexResponse, SearchIndex, SearchRequest};
use crate::config::is_valid_collection_name;
use crate::error::IndexError;

/// A transcript snippet to ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub external_source_name: String,
    #[serde(default)]
    pub additional_metadata: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy)]
struct Fields {
    id: schema::Field,
    text: schema::Field,
    description: schema::Field,
    external_source_name: schema::Field,
    additional_metadata: schema::Field,
    created_at: schema::Field,
}

struct Collection {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl Collection {
    fn build_schema() -> (Schema, Fields) {
        let mut sb = Schema::builder();
        let fields = Fields {
            id: sb.add_text_field("id", STRING | STORED),
            text: sb.add_text_field("text", TEXT | STORED),
            description: sb.add_text_field("description", TEXT | STORED),
            external_source_name: sb.add_text_field("external_source_name", STRING | STORED),
            additional_metadata: sb.add_text_field("additional_metadata", STORED),
            // Unix seconds.
            created_at: sb.add_i64_field("created_at", INDEXED | STORED | FAST),
        };
        (sb.build(), fields)
    }

    fn create(dir: Option<&Path>) -> anyhow::Result<Self> {
        let (schema, fields) = Self::build_schema();
        let index = match dir {
            None => Index::create_in_ram(schema),
            Some(path) => {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create index dir {:?}", path))?;
                let mmap = tantivy::directory::MmapDirectory::open(path)?;
                if Index::exists(&mmap)? {
                    Index::open_in_dir(path)?
                } else {
                    Index::create_in_dir(path, schema)?
                }
            }
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create Tantivy reader")?;
        let writer = index
            .writer(50_000_000)
            .context("Failed to create Tantivy writer")?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn add(&self, docs: &[TranscriptDocument]) -> anyhow::Result<()> {
        let mut writer = self.writer.lock();
        for doc in docs {
            let mut tdoc = TantivyDocument::default();
            tdoc.add_text(self.fields.id, &doc.id);
            tdoc.add_text(self.fields.text, &doc.text);
            tdoc.add_text(self.fields.description, &doc.description);
            tdoc.add_text(self.fields.external_source_name, &doc.external_source_name);
            tdoc.add_text(self.fields.additional_metadata, &doc.additional_metadata);
            if let Some(created_at) = doc.created_at {
                tdoc.add_i64(self.fields.created_at, created_at.timestamp());
            }
            writer.add_document(tdoc)?;
        }
        writer.commit().context("Tantivy commit failed")?;
        self.reader.reload()?;
        Ok(())
    }

    fn parse_query(&self, query: &str) -> anyhow::Result<Box<dyn Query>> {
        // Plain lowercase words only, so user text can never trip the query
        // syntax (colons, quotes, AND/OR).
        let words: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        if words.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        let parser =
            QueryParser::for_index(&self.index, vec![self.fields.text, self.fields.description]);
        Ok(parser.parse_query(&words.join(" "))?)
    }

    fn search(&self, request: &SearchRequest) -> anyhow::Result<IndexResponse> {
        let searcher = self.reader.searcher();
        let query = self.parse_query(&request.query)?;
        let min_ts = request.created_after.map(|t| t.timestamp());

        // Filter applies after scoring, so score every document.
        let limit = (searcher.num_docs() as usize).max(1);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::new();
        for (score, address) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(address)?;
            let created_ts = doc.get_first(self.fields.created_at).and_then(|v| v.as_i64());
            if let Some(min) = min_ts {
                match created_ts {
                    Some(ts) if ts >= min => {}
                    _ => continue,
                }
            }
            hits.push(self.to_hit(&doc, score, created_ts));
        }

        let total = hits.len();
        hits.truncate(request.size);
        Ok(IndexResponse {
            total_count: Some(total),
            hits,
        })
    }

    fn to_hit(&self, doc: &TantivyDocument, score: f32, created_ts: Option<i64>) -> IndexHit {
        let text = |field: schema::Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        IndexHit {
            id: text(self.fields.id),
            text: text(self.fields.text),
            description: text(self.fields.description),
            external_source_name: text(self.fields.external_source_name),
            additional_metadata: text(self.fields.additional_metadata),
            created_at: created_ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            score: score as f64,
            reranker_score: None,
        }
    }

    fn count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}

pub struct LocalTextIndex {
    root: Option<PathBuf>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl LocalTextIndex {
    /// Indexes live in RAM and vanish with the value.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) `root`, loading every collection directory in it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| IndexError::Local(format!("Failed to create {:?}: {}", root, e)))?;

        let mut collections = HashMap::new();
        let entries = std::fs::read_dir(&root)
            .map_err(|e| IndexError::Local(format!("Failed to read {:?}: {}", root, e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if path.is_dir() && is_valid_collection_name(&name) {
                let collection = Collection::create(Some(&path)).map_err(local)?;
                collections.insert(name, Arc::new(collection));
            }
        }
        tracing::info!(root = ?root, collections = collections.len(), "Opened local transcript index");

        Ok(Self {
            root: Some(root),
            collections: RwLock::new(collections),
        })
    }

    fn get(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Create an empty collection. Existing collections are left as they are.
    pub fn create_collection(&self, name: &str) -> Result<(), IndexError> {
        self.get_or_create(name).map(|_| ())
    }

    fn get_or_create(&self, name: &str) -> Result<Arc<Collection>, IndexError> {
        if !is_valid_collection_name(name) {
            return Err(IndexError::Local(format!("invalid collection name '{}'", name)));
        }
        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let dir = self.root.as_ref().map(|r| r.join(name));
        let collection = Arc::new(Collection::create(dir.as_deref()).map_err(local)?);
        collections.insert(name.to_string(), collection.clone());
        tracing::debug!(collection = %name, "Created collection");
        Ok(collection)
    }

    /// Index and commit `docs`, creating the collection if needed.
    pub fn add_documents(
        &self,
        collection: &str,
        docs: &[TranscriptDocument],
    ) -> Result<usize, IndexError> {
        let target = self.get_or_create(collection)?;
        target.add(docs).map_err(local)?;
        tracing::info!(collection = %collection, added = docs.len(), "Indexed transcript snippets");
        Ok(docs.len())
    }

    pub fn count(&self, collection: &str) -> Result<usize, IndexError> {
        self.get(collection)
            .map(|c| c.count())
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))
    }

    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn local(err: anyhow::Error) -> IndexError {
    IndexError::Local(format!("{:#}", err))
}

#[async_trait]
impl SearchIndex for LocalTextIndex {
    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<IndexResponse, IndexError> {
        let target = self
            .get(collection)
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))?;
        if request.vector.is_some() {
            tracing::debug!("Local index ignores vector clause");
        }
        target.search(request).map_err(local)
    }
}
