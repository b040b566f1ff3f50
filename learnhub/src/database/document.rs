//! Hosted document database
//!
//! Schema-less JSON documents addressed by a collection path
//! (`"courses"`, `"discussions/{id}/replies"`) and an id, persisted in SQLite.
//!
//! Every committed write is published on a broadcast change feed. Live
//! queries subscribe to that feed, keep the set of matching documents, and
//! deliver a [`QuerySnapshot`] with the per-document changes whenever the
//! visible result set moves.

use crate::config::CHANGE_FEED_CAPACITY;
use crate::error::{AppError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, SqlitePool};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Document payload
pub type Fields = Map<String, Value>;

/// Encode a timestamp the way it is stored in document fields.
///
/// Fixed-width UTC timestamps compare lexicographically in time order.
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Collection path the document lives in
    pub path: String,
    pub id: String,
    pub data: Fields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Look up a (possibly dotted) field path
    pub fn field(&self, field: &str) -> Option<&Value> {
        lookup(&self.data, field)
    }

    /// Final segment of the collection path
    pub fn collection(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(FromRow)]
struct DocumentRow {
    path: String,
    id: String,
    data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = AppError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let data: Fields = serde_json::from_str(&row.data)?;
        Ok(Document {
            path: row.path,
            id: row.id,
            data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn lookup<'a>(data: &'a Fields, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write a value at a dotted field path, creating intermediate maps
fn assign(data: &mut Fields, field: &str, value: Value) {
    match field.split_once('.') {
        None => {
            data.insert(field.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = data
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                assign(child, rest, value);
            }
        }
    }
}

/// Total order over JSON values: null < bool < number < string < array < object
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Exact-match query filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq(field, value) => doc.field(field) == Some(value),
            Filter::ArrayContains(field, value) => doc
                .field(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Collection query: exact-match filters, one sort key, a result cap
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub path: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document belongs to the (unlimited) result set.
    /// Ordering on a field excludes documents that lack it.
    pub fn matches(&self, doc: &Document) -> bool {
        if doc.path != self.path {
            return false;
        }
        if let Some((field, _)) = &self.order_by {
            if doc.field(field).is_none() {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Sort and cap matching documents. Ties fall back to id order.
    pub fn arrange(&self, mut docs: Vec<Document>) -> Vec<Document> {
        match &self.order_by {
            Some((field, direction)) => docs.sort_by(|a, b| {
                let ord = match (a.field(field), b.field(field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (x, y) => x.is_some().cmp(&y.is_some()),
                };
                let ord = match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                };
                ord.then_with(|| a.id.cmp(&b.id))
            }),
            None => docs.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// How a document moved relative to the previous snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: Document,
}

/// Result set delivered by a live query
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    /// Ordered, capped documents currently matching
    pub documents: Vec<Document>,
    /// Changes since the previous snapshot
    pub changes: Vec<DocumentChange>,
}

fn diff(previous: &[Document], next: &[Document]) -> Vec<DocumentChange> {
    let before: HashMap<&str, &Document> = previous.iter().map(|d| (d.id.as_str(), d)).collect();
    let after: HashSet<&str> = next.iter().map(|d| d.id.as_str()).collect();

    let mut changes: Vec<DocumentChange> = previous
        .iter()
        .filter(|d| !after.contains(d.id.as_str()))
        .map(|d| DocumentChange {
            kind: ChangeKind::Removed,
            document: d.clone(),
        })
        .collect();

    for doc in next {
        match before.get(doc.id.as_str()) {
            None => changes.push(DocumentChange {
                kind: ChangeKind::Added,
                document: doc.clone(),
            }),
            Some(old) if *old != doc => changes.push(DocumentChange {
                kind: ChangeKind::Modified,
                document: doc.clone(),
            }),
            Some(_) => {}
        }
    }

    changes
}

/// Committed write published to live queries
#[derive(Debug, Clone)]
enum StoreEvent {
    Upserted(Document),
    Deleted { path: String, id: String },
}

/// Live query subscription.
///
/// Dropping the subscription (or calling [`LiveQuery::unsubscribe`])
/// stops its listener task.
pub struct LiveQuery {
    receiver: mpsc::UnboundedReceiver<QuerySnapshot>,
    task: JoinHandle<()>,
}

impl LiveQuery {
    /// Wait for the next snapshot. `None` once the listener has stopped.
    pub async fn next(&mut self) -> Option<QuerySnapshot> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        tracing::debug!("Live query unsubscribed");
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Handle to the document database
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreEvent>,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers simply means nobody is listening
        let _ = self.changes.send(event);
    }

    /// Get a document by id
    pub async fn get(&self, path: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT path, id, data, created_at, updated_at
            FROM documents WHERE path = ? AND id = ?
            "#,
        )
        .bind(path)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Document::try_from).transpose()
    }

    /// Insert a document under a server-assigned id
    pub async fn add(&self, path: &str, data: Fields) -> Result<Document> {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents (path, id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING path, id, data, created_at, updated_at
            "#,
        )
        .bind(path)
        .bind(&id)
        .bind(serde_json::to_string(&data)?)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let doc = Document::try_from(row)?;
        tracing::debug!("Added document {}/{}", path, id);
        self.publish(StoreEvent::Upserted(doc.clone()));
        Ok(doc)
    }

    /// Create or replace a document under a caller-chosen id
    pub async fn set(&self, path: &str, id: &str, data: Fields) -> Result<Document> {
        let now = Utc::now();

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents (path, id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            RETURNING path, id, data, created_at, updated_at
            "#,
        )
        .bind(path)
        .bind(id)
        .bind(serde_json::to_string(&data)?)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let doc = Document::try_from(row)?;
        tracing::debug!("Set document {}/{}", path, id);
        self.publish(StoreEvent::Upserted(doc.clone()));
        Ok(doc)
    }

    /// Merge fields into an existing document. Keys may be dotted paths.
    pub async fn update(&self, path: &str, id: &str, fields: Fields) -> Result<Document> {
        self.modify(path, id, |data| {
            for (key, value) in fields {
                assign(data, &key, value);
            }
            Ok(())
        })
        .await
    }

    /// Add `delta` to a numeric field, treating a missing field as zero
    pub async fn increment(&self, path: &str, id: &str, field: &str, delta: i64) -> Result<Document> {
        self.modify(path, id, |data| {
            let current = match lookup(data, field) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| AppError::MalformedDocument {
                    collection: path.to_string(),
                    id: id.to_string(),
                    reason: format!("field {} is not an integer", field),
                })?,
            };
            assign(data, field, Value::from(current + delta));
            Ok(())
        })
        .await
    }

    async fn modify<F>(&self, path: &str, id: &str, apply: F) -> Result<Document>
    where
        F: FnOnce(&mut Fields) -> Result<()>,
    {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT path, id, data, created_at, updated_at
            FROM documents WHERE path = ? AND id = ?
            "#,
        )
        .bind(path)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(path, id))?;

        let mut doc = Document::try_from(row)?;
        apply(&mut doc.data)?;
        doc.updated_at = now;

        sqlx::query("UPDATE documents SET data = ?, updated_at = ? WHERE path = ? AND id = ?")
            .bind(serde_json::to_string(&doc.data)?)
            .bind(now)
            .bind(path)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Updated document {}/{}", path, id);
        self.publish(StoreEvent::Upserted(doc.clone()));
        Ok(doc)
    }

    /// Delete a document. Deleting a missing document is not an error.
    /// Sub-collections and referencing documents are left in place.
    pub async fn delete(&self, path: &str, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM documents WHERE path = ? AND id = ?")
            .bind(path)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows > 0 {
            tracing::debug!("Deleted document {}/{}", path, id);
            self.publish(StoreEvent::Deleted {
                path: path.to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    /// Run a one-shot query
    pub async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let matching = self.matching(query).await?;
        Ok(query.arrange(matching))
    }

    /// All documents matching the query's filters, unordered and uncapped
    async fn matching(&self, query: &Query) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT path, id, data, created_at, updated_at
            FROM documents WHERE path = ?
            "#,
        )
        .bind(&query.path)
        .fetch_all(&self.pool)
        .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let doc = Document::try_from(row)?;
            if query.matches(&doc) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Subscribe to a live query.
    ///
    /// The first snapshot carries the full current result set as `Added`
    /// changes; later snapshots are delivered only when the visible result
    /// set changes.
    pub async fn listen(&self, query: Query) -> Result<LiveQuery> {
        // Subscribe before reading so no write between the two is missed
        let mut events = self.changes.subscribe();

        let mut matching: HashMap<String, Document> = self
            .matching(&query)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let (sender, receiver) = mpsc::unbounded_channel();

        let visible = query.arrange(matching.values().cloned().collect());
        let initial = QuerySnapshot {
            changes: diff(&[], &visible),
            documents: visible.clone(),
        };
        let _ = sender.send(initial);

        let store = self.clone();
        tracing::debug!("Live query attached to {}", query.path);

        let task = tokio::spawn(async move {
            let mut visible = visible;

            loop {
                let event = tokio::select! {
                    _ = sender.closed() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(StoreEvent::Upserted(doc)) => {
                        if doc.path != query.path {
                            continue;
                        }
                        if query.matches(&doc) {
                            matching.insert(doc.id.clone(), doc);
                        } else {
                            matching.remove(&doc.id);
                        }
                    }
                    Ok(StoreEvent::Deleted { path, id }) => {
                        if path != query.path {
                            continue;
                        }
                        matching.remove(&id);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Live query on {} lagged by {} writes, re-reading",
                            query.path,
                            skipped
                        );
                        match store.matching(&query).await {
                            Ok(docs) => {
                                matching = docs.into_iter().map(|d| (d.id.clone(), d)).collect();
                            }
                            Err(e) => {
                                tracing::error!("Live query on {} failed: {}", query.path, e);
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                let next = query.arrange(matching.values().cloned().collect());
                let changes = diff(&visible, &next);
                if changes.is_empty() {
                    continue;
                }
                visible = next;

                let snapshot = QuerySnapshot {
                    documents: visible.clone(),
                    changes,
                };
                if sender.send(snapshot).is_err() {
                    break;
                }
            }

            tracing::debug!("Live query on {} stopped", query.path);
        });

        Ok(LiveQuery { receiver, task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;
    use serde_json::json;

    async fn create_test_store() -> DocumentStore {
        DocumentStore::new(create_memory_pool().await.unwrap())
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = create_test_store().await;

        let doc = store
            .add("courses", fields(json!({"title": "Rust", "level": "beginner"})))
            .await
            .unwrap();

        let fetched = store.get("courses", &doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.data["title"], "Rust");
        assert!(store.get("courses", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = create_test_store().await;

        let doc = store
            .add("courses", fields(json!({"title": "Rust", "instructor": {"id": "u1", "name": "Ann"}})))
            .await
            .unwrap();

        let updated = store
            .update("courses", &doc.id, fields(json!({"level": "advanced", "instructor.name": "Ana"})))
            .await
            .unwrap();

        assert_eq!(updated.data["title"], "Rust");
        assert_eq!(updated.data["level"], "advanced");
        assert_eq!(updated.data["instructor"]["id"], "u1");
        assert_eq!(updated.data["instructor"]["name"], "Ana");
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = create_test_store().await;

        let result = store.update("courses", "nope", Fields::new()).await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_increment() {
        let store = create_test_store().await;

        let doc = store.add("discussions", fields(json!({"likes": 0}))).await.unwrap();
        store.increment("discussions", &doc.id, "likes", 1).await.unwrap();
        let doc = store.increment("discussions", &doc.id, "likes", 1).await.unwrap();

        assert_eq!(doc.data["likes"], 2);
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let store = create_test_store().await;

        for (course, order) in [("c1", 3), ("c1", 1), ("c2", 0), ("c1", 2)] {
            store
                .add("contents", fields(json!({"courseId": course, "order": order})))
                .await
                .unwrap();
        }

        let query = Query::new("contents")
            .where_eq("courseId", "c1")
            .order_by("order", Direction::Asc)
            .limit(2);
        let docs = store.query(&query).await.unwrap();

        let orders: Vec<i64> = docs.iter().map(|d| d.data["order"].as_i64().unwrap()).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_query_nested_field_and_array_contains() {
        let store = create_test_store().await;

        store
            .add("courses", fields(json!({"instructor": {"id": "u1"}})))
            .await
            .unwrap();
        store
            .add("courses", fields(json!({"instructor": {"id": "u2"}})))
            .await
            .unwrap();
        store
            .add("messages", fields(json!({"participants": ["a", "b"]})))
            .await
            .unwrap();

        let mine = store
            .query(&Query::new("courses").where_eq("instructor.id", "u1"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);

        let inbox = store
            .query(&Query::new("messages").array_contains("participants", "b"))
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_isolated_by_path() {
        let store = create_test_store().await;

        store.add("discussions/d1/replies", Fields::new()).await.unwrap();
        store.add("discussions/d2/replies", Fields::new()).await.unwrap();

        let replies = store.query(&Query::new("discussions/d1/replies")).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].collection(), "replies");
    }

    #[tokio::test]
    async fn test_live_query_initial_and_incremental_changes() {
        let store = create_test_store().await;

        let first = store
            .add("discussions", fields(json!({"courseId": "c1", "n": 1})))
            .await
            .unwrap();

        let mut live = store
            .listen(Query::new("discussions").where_eq("courseId", "c1"))
            .await
            .unwrap();

        let initial = live.next().await.unwrap();
        assert_eq!(initial.documents.len(), 1);
        assert_eq!(initial.changes[0].kind, ChangeKind::Added);

        // Writes to other courses are invisible
        store
            .add("discussions", fields(json!({"courseId": "c2"})))
            .await
            .unwrap();

        let second = store
            .add("discussions", fields(json!({"courseId": "c1", "n": 2})))
            .await
            .unwrap();
        let snapshot = live.next().await.unwrap();
        assert_eq!(snapshot.documents.len(), 2);
        assert_eq!(snapshot.changes.len(), 1);
        assert_eq!(snapshot.changes[0].kind, ChangeKind::Added);
        assert_eq!(snapshot.changes[0].document.id, second.id);

        store
            .update("discussions", &first.id, fields(json!({"n": 10})))
            .await
            .unwrap();
        let snapshot = live.next().await.unwrap();
        assert_eq!(snapshot.changes[0].kind, ChangeKind::Modified);
        assert_eq!(snapshot.changes[0].document.data["n"], 10);

        store.delete("discussions", &second.id).await.unwrap();
        let snapshot = live.next().await.unwrap();
        assert_eq!(snapshot.changes[0].kind, ChangeKind::Removed);
        assert_eq!(snapshot.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_live_query_document_leaving_filter_is_removed() {
        let store = create_test_store().await;

        let doc = store
            .add("enrollments", fields(json!({"status": "active"})))
            .await
            .unwrap();

        let mut live = store
            .listen(Query::new("enrollments").where_eq("status", "active"))
            .await
            .unwrap();
        live.next().await.unwrap();

        store
            .update("enrollments", &doc.id, fields(json!({"status": "dropped"})))
            .await
            .unwrap();

        let snapshot = live.next().await.unwrap();
        assert_eq!(snapshot.changes[0].kind, ChangeKind::Removed);
        assert!(snapshot.documents.is_empty());
    }

    #[test]
    fn test_compare_values_total_order() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(3), &json!("3")), Ordering::Less);
    }

    #[test]
    fn test_timestamps_sort_chronologically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert_eq!(
            compare_values(&timestamp(earlier), &timestamp(later)),
            Ordering::Less
        );
    }
}
