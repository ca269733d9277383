//! Child items (pantry items, shopping items) of an owned resource

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entity::{decode, to_row, uuid_cell, validate_patch, LoadingGuard};
use super::error::{StoreError, StoreResult};
use super::query::{Direction, Filter, Query};
use super::service::{DataService, Row};

/// A record that belongs to exactly one parent resource
pub trait ChildItem: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Draft: Serialize + DeserializeOwned + Send + Sync;

    fn id(&self) -> Uuid;
    fn parent_id(&self) -> Uuid;
    fn quantity(&self) -> f64;
    fn set_quantity(&mut self, quantity: f64);
}

/// When a quantity change reaches the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityPolicy {
    /// After the server confirms
    Confirmed,
    /// Immediately; rolled back if the server refuses
    Optimistic,
}

#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub table: &'static str,
    pub parent_column: &'static str,
    pub order: Option<(&'static str, Direction)>,
    pub policy: QuantityPolicy,
}

struct ItemState<I> {
    parent: Option<Uuid>,
    items: Vec<I>,
}

/// Items of the currently opened parent
pub struct ItemStore<I> {
    service: Arc<dyn DataService>,
    spec: ItemSpec,
    state: Arc<RwLock<ItemState<I>>>,
    in_flight: Arc<AtomicUsize>,
}

impl<I> Clone for ItemStore<I> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            spec: self.spec.clone(),
            state: self.state.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

fn check_quantity(quantity: f64) -> StoreResult<()> {
    if quantity.is_finite() && quantity >= 0.0 {
        Ok(())
    } else {
        Err(StoreError::InvalidQuantity)
    }
}

fn check_row_quantity(row: &Row) -> StoreResult<()> {
    match row.get("quantity") {
        Some(Value::Number(n)) => check_quantity(n.as_f64().unwrap_or(-1.0)),
        Some(Value::Null) | None => Ok(()),
        Some(_) => Err(StoreError::InvalidQuantity),
    }
}

impl<I: ChildItem> ItemStore<I> {
    pub fn new(service: Arc<dyn DataService>, spec: ItemSpec) -> Self {
        Self {
            service,
            spec,
            state: Arc::new(RwLock::new(ItemState {
                parent: None,
                items: Vec::new(),
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn items(&self) -> Vec<I> {
        self.state.read().items.clone()
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.state.read().parent
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.parent = None;
        state.items.clear();
    }

    fn base_query(&self) -> Query {
        let query = Query::new();
        match self.spec.order {
            Some((column, direction)) => query.order_by(column, direction),
            None => query,
        }
    }

    async fn load(&self, parent_id: Uuid) -> StoreResult<Vec<I>> {
        let query = self
            .base_query()
            .filter(Filter::eq(self.spec.parent_column, parent_id));
        let rows = self.service.select(self.spec.table, &query).await?;
        rows.into_iter().map(decode).collect()
    }

    /// Open a parent: load its items into the cache
    pub async fn fetch_items(&self, parent_id: Uuid) -> StoreResult<Vec<I>> {
        let _loading = LoadingGuard::enter(&self.in_flight);
        let items = self.load(parent_id).await?;

        let mut state = self.state.write();
        state.parent = Some(parent_id);
        state.items = items.clone();
        debug!(table = self.spec.table, parent_id = %parent_id, count = items.len(), "Items loaded");
        Ok(items)
    }

    fn cached(&self, item_id: Uuid) -> Option<I> {
        self.state
            .read()
            .items
            .iter()
            .find(|i| i.id() == item_id)
            .cloned()
    }

    /// The item as stored on the server
    async fn stored(&self, item_id: Uuid) -> StoreResult<I> {
        let rows = self
            .service
            .select(
                self.spec.table,
                &Query::new().filter(Filter::eq("id", item_id)),
            )
            .await?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound(item_id))?;
        decode(row)
    }

    /// Parent id of an item, from the cache or the server
    pub async fn parent_of(&self, item_id: Uuid) -> StoreResult<Uuid> {
        if let Some(item) = self.cached(item_id) {
            return Ok(item.parent_id());
        }

        let rows = self
            .service
            .select(
                self.spec.table,
                &Query::new()
                    .select(self.spec.parent_column)
                    .filter(Filter::eq("id", item_id)),
            )
            .await?;
        let row = rows.into_iter().next().ok_or(StoreError::NotFound(item_id))?;
        uuid_cell(&row, self.spec.parent_column)
    }

    /// Read items matching `filters` across parents, without touching the cache
    pub async fn select_where(&self, filters: Vec<Filter>) -> StoreResult<Vec<I>> {
        let query = self.base_query().filters(filters);
        let rows = self.service.select(self.spec.table, &query).await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn add_item(&self, parent_id: Uuid, draft: &I::Draft) -> StoreResult<I> {
        let mut row = to_row(draft)?;
        check_row_quantity(&row)?;
        row.remove("id");
        row.insert(
            self.spec.parent_column.to_string(),
            Value::String(parent_id.to_string()),
        );

        let inserted = self.service.insert(self.spec.table, vec![row]).await?;
        let item: I = decode(
            inserted
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::Decode("no row returned from insert".into()))?,
        )?;

        let mut state = self.state.write();
        if state.parent == Some(item.parent_id()) {
            state.items.push(item.clone());
        }
        info!(table = self.spec.table, id = %item.id(), parent_id = %parent_id, "Item added");
        Ok(item)
    }

    /// Patch an item; the server's returned row replaces the cached one
    ///
    /// The patch must still describe a valid item; otherwise nothing is sent.
    pub async fn update_item(&self, item_id: Uuid, mut patch: Row) -> StoreResult<I> {
        patch.remove("id");
        patch.remove(self.spec.parent_column);
        check_row_quantity(&patch)?;

        let current = match self.cached(item_id) {
            Some(item) => item,
            None => self.stored(item_id).await?,
        };
        validate_patch(&current, &patch)?;

        let rows = self
            .service
            .update(self.spec.table, &patch, &[Filter::eq("id", item_id)])
            .await?;
        let item: I = decode(
            rows.into_iter()
                .next()
                .ok_or(StoreError::NotFound(item_id))?,
        )?;

        self.replace_cached(item.clone());
        Ok(item)
    }

    fn replace_cached(&self, item: I) {
        let mut state = self.state.write();
        if let Some(slot) = state.items.iter_mut().find(|i| i.id() == item.id()) {
            *slot = item;
        }
    }

    /// Swap the cached quantity, returning the old one
    fn set_cached_quantity(&self, item_id: Uuid, quantity: f64) -> Option<f64> {
        let mut state = self.state.write();
        state.items.iter_mut().find(|i| i.id() == item_id).map(|item| {
            let previous = item.quantity();
            item.set_quantity(quantity);
            previous
        })
    }

    /// Change one item's quantity; negative quantities never reach the server
    pub async fn set_quantity(&self, item_id: Uuid, quantity: f64) -> StoreResult<()> {
        check_quantity(quantity)?;

        let mut patch = Row::new();
        patch.insert("quantity".to_string(), Value::from(quantity));
        let filters = [Filter::eq("id", item_id)];

        match self.spec.policy {
            QuantityPolicy::Confirmed => {
                let rows = self.service.update(self.spec.table, &patch, &filters).await?;
                if rows.is_empty() {
                    return Err(StoreError::NotFound(item_id));
                }
                self.set_cached_quantity(item_id, quantity);
            }
            QuantityPolicy::Optimistic => {
                let previous = self.set_cached_quantity(item_id, quantity);
                let outcome = match self.service.update(self.spec.table, &patch, &filters).await {
                    Ok(rows) if rows.is_empty() => Err(StoreError::NotFound(item_id)),
                    Ok(_) => Ok(()),
                    Err(err) => Err(err.into()),
                };
                if let Err(err) = outcome {
                    if let Some(previous) = previous {
                        warn!(table = self.spec.table, id = %item_id, "Quantity change refused, rolling back");
                        self.set_cached_quantity(item_id, previous);
                    }
                    return Err(err);
                }
            }
        }

        debug!(table = self.spec.table, id = %item_id, quantity, "Quantity updated");
        Ok(())
    }

    pub async fn remove_item(&self, item_id: Uuid) -> StoreResult<()> {
        let removed = self
            .service
            .delete(self.spec.table, &[Filter::eq("id", item_id)])
            .await?;
        if removed.is_empty() {
            return Err(StoreError::NotFound(item_id));
        }

        self.state.write().items.retain(|i| i.id() != item_id);
        info!(table = self.spec.table, id = %item_id, "Item removed");
        Ok(())
    }
}
