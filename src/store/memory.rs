//! In-process data service with PostgREST-like filter semantics
//!
//! Backs the integration tests and local runs without a Supabase project.
//! Every call is recorded, and one-shot failures can be injected per
//! operation and table.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::query::{Direction, Filter, Query};
use super::service::{DataError, DataService, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub table: String,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Row>>,
    calls: Vec<Call>,
    failures: Vec<(Op, String, String)>,
}

#[derive(Default)]
pub struct MemoryService {
    inner: Mutex<Inner>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows directly, bypassing the call log
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner.lock();
        let entries = inner.tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Value::Object(map) = row {
                entries.push(with_id(map));
            }
        }
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn count_calls(&self, op: Op, table: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.table == table)
            .count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Make the next `op` on `table` fail with `message`
    pub fn fail_next(&self, op: Op, table: &str, message: &str) {
        self.inner
            .lock()
            .failures
            .push((op, table.to_string(), message.to_string()));
    }

    fn begin(inner: &mut Inner, op: Op, table: &str) -> Result<(), DataError> {
        inner.calls.push(Call {
            op,
            table: table.to_string(),
        });

        if let Some(pos) = inner
            .failures
            .iter()
            .position(|(o, t, _)| *o == op && t == table)
        {
            let (_, _, message) = inner.failures.remove(pos);
            return Err(DataError::Injected(message));
        }
        Ok(())
    }
}

fn with_id(mut row: Row) -> Row {
    if !row.contains_key("id") {
        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    row
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn compare(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let cell = |col: &str| row.get(col).and_then(text);

    match filter {
        Filter::Eq(col, v) => cell(col).as_deref() == Some(v.as_str()),
        Filter::In(col, vs) => cell(col).map_or(false, |c| vs.contains(&c)),
        Filter::Gte(col, v) => cell(col).map_or(false, |c| compare(&c, v) != Ordering::Less),
        Filter::Lte(col, v) => cell(col).map_or(false, |c| compare(&c, v) != Ordering::Greater),
        Filter::Or(fs) => fs.iter().any(|f| matches(row, f)),
        Filter::And(fs) => fs.iter().all(|f| matches(row, f)),
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(row, f))
}

fn project(row: &Row, columns: &str) -> Row {
    if columns.trim() == "*" {
        return row.clone();
    }
    columns
        .split(',')
        .map(str::trim)
        .filter_map(|col| row.get(col).map(|v| (col.to_string(), v.clone())))
        .collect()
}

#[async_trait]
impl DataService for MemoryService {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, DataError> {
        let mut inner = self.inner.lock();
        Self::begin(&mut inner, Op::Select, table)?;

        let mut rows: Vec<Row> = inner
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_all(r, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let x = a.get(&order.column).and_then(text).unwrap_or_default();
                let y = b.get(&order.column).and_then(text).unwrap_or_default();
                match order.direction {
                    Direction::Asc => compare(&x, &y),
                    Direction::Desc => compare(&y, &x),
                }
            });
        }

        Ok(rows.iter().map(|r| project(r, &query.columns)).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, DataError> {
        let mut inner = self.inner.lock();
        Self::begin(&mut inner, Op::Insert, table)?;

        let inserted: Vec<Row> = rows.into_iter().map(with_id).collect();
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn update(
        &self,
        table: &str,
        patch: &Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, DataError> {
        let mut inner = self.inner.lock();
        Self::begin(&mut inner, Op::Update, table)?;

        let mut updated = Vec::new();
        if let Some(rows) = inner.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches_all(r, filters)) {
                for (k, v) in patch {
                    row.insert(k.clone(), v.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, DataError> {
        let mut inner = self.inner.lock();
        Self::begin(&mut inner, Op::Delete, table)?;

        let Some(rows) = inner.tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|r| matches_all(r, filters));
        *rows = kept;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> MemoryService {
        let svc = MemoryService::new();
        svc.seed(
            "expenses",
            vec![
                json!({"id": "e1", "owner_id": "u1", "amount": 12.5, "spent_on": "2024-03-02"}),
                json!({"id": "e2", "owner_id": "u2", "amount": 40, "spent_on": "2024-03-20"}),
                json!({"id": "e3", "owner_id": "u1", "amount": 3, "spent_on": "2024-04-01"}),
            ],
        );
        svc
    }

    #[tokio::test]
    async fn select_applies_or_and_range_filters() {
        let svc = service();
        let q = Query::new()
            .filter(Filter::or(vec![
                Filter::eq("owner_id", "u2"),
                Filter::is_in("id", ["e3"]),
            ]))
            .filter(Filter::lte("spent_on", "2024-03-31"));
        let rows = svc.select("expenses", &q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "e2");
    }

    #[tokio::test]
    async fn numeric_ranges_compare_as_numbers() {
        let svc = service();
        let q = Query::new().filter(Filter::gte("amount", 10));
        let rows = svc.select("expenses", &q).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn order_and_projection() {
        let svc = service();
        let q = Query::new()
            .select("id")
            .order_by("spent_on", Direction::Desc);
        let rows = svc.select("expenses", &q).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["e3", "e2", "e1"]);
        assert_eq!(rows[0].len(), 1);
    }

    #[tokio::test]
    async fn insert_generates_ids_and_delete_returns_removed_rows() {
        let svc = MemoryService::new();
        let mut row = Row::new();
        row.insert("name".into(), json!("Spiżarnia"));
        let inserted = svc.insert("pantries", vec![row]).await.unwrap();
        let id = inserted[0]["id"].as_str().unwrap().to_string();

        let removed = svc
            .delete("pantries", &[Filter::eq("id", &id)])
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert!(svc.rows("pantries").is_empty());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let svc = service();
        svc.fail_next(Op::Select, "expenses", "boom");
        assert!(svc.select("expenses", &Query::new()).await.is_err());
        assert!(svc.select("expenses", &Query::new()).await.is_ok());
        assert_eq!(svc.count_calls(Op::Select, "expenses"), 2);
    }
}
