//! Per-user bundle of stores
//!
//! Built once per authenticated session and passed to whoever needs it;
//! no store lives in a global.

pub mod models;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::store::{
    AuthProvider, DataService, EntityStore, FetchOutcome, Filter, FriendStore, ItemStore,
    ProfileStore, StoreResult,
};

pub use models::{
    Expense, ExpenseDraft, Pantry, PantryDraft, PantryItem, PantryItemDraft, ShoppingItem,
    ShoppingItemDraft, ShoppingList, ShoppingListDraft,
};

/// Longest look-ahead for expiring items; larger windows are clamped
pub const MAX_EXPIRY_WINDOW_DAYS: u32 = 3660;

/// Sum of cached expenses in one category
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
    pub count: usize,
}

/// Inclusive `spent_on` bounds for an expense read
pub fn expense_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<Filter> {
    let mut range = Vec::new();
    if let Some(from) = from {
        range.push(Filter::gte("spent_on", from));
    }
    if let Some(to) = to {
        range.push(Filter::lte("spent_on", to));
    }
    range
}

#[derive(Clone)]
pub struct Household {
    pub pantries: EntityStore<Pantry>,
    pub shopping_lists: EntityStore<ShoppingList>,
    pub expenses: EntityStore<Expense>,
    pub pantry_items: ItemStore<PantryItem>,
    pub shopping_items: ItemStore<ShoppingItem>,
    pub friends: FriendStore,
    pub profiles: ProfileStore,
}

impl Household {
    pub fn new(service: Arc<dyn DataService>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            pantries: EntityStore::new(service.clone(), auth.clone(), models::pantry_spec()),
            shopping_lists: EntityStore::new(
                service.clone(),
                auth.clone(),
                models::shopping_list_spec(),
            ),
            expenses: EntityStore::new(service.clone(), auth.clone(), models::expense_spec()),
            pantry_items: ItemStore::new(service.clone(), models::pantry_item_spec()),
            shopping_items: ItemStore::new(service.clone(), models::shopping_item_spec()),
            friends: FriendStore::new(service.clone(), auth),
            profiles: ProfileStore::new(service),
        }
    }

    /// Load pantries, shopping lists, expenses and friends concurrently
    pub async fn refresh(&self, user_id: Uuid) -> StoreResult<()> {
        futures::try_join!(
            self.pantries.fetch_all(user_id),
            self.shopping_lists.fetch_all(user_id),
            self.expenses.fetch_all(user_id),
            self.friends.fetch_friends(),
        )?;
        debug!(user_id = %user_id, "Household refreshed");
        Ok(())
    }

    /// Expenses with `spent_on` inside the given bounds (inclusive)
    pub async fn fetch_expenses_between(
        &self,
        user_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> StoreResult<FetchOutcome> {
        self.expenses
            .fetch_all_where(user_id, expense_range(from, to))
            .await
    }

    /// Per-category totals over the cached expenses, sorted by category
    pub fn expense_totals(&self) -> Vec<CategoryTotal> {
        let mut totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for entry in self.expenses.items() {
            let slot = totals.entry(entry.resource.category.clone()).or_default();
            slot.0 += entry.resource.amount;
            slot.1 += 1;
        }
        totals
            .into_iter()
            .map(|(category, (total, count))| CategoryTotal {
                category,
                total,
                count,
            })
            .collect()
    }

    /// Items in any cached pantry expiring between `today` and `today + days`
    ///
    /// `days` is clamped to `MAX_EXPIRY_WINDOW_DAYS`.
    pub async fn expiring_pantry_items(
        &self,
        today: NaiveDate,
        days: u32,
    ) -> StoreResult<Vec<PantryItem>> {
        let pantry_ids: Vec<Uuid> = self.pantries.items().iter().map(|p| p.resource.id).collect();
        if pantry_ids.is_empty() {
            return Ok(Vec::new());
        }

        let window = Days::new(u64::from(days.min(MAX_EXPIRY_WINDOW_DAYS)));
        let until = today.checked_add_days(window).unwrap_or(NaiveDate::MAX);
        let mut items = self
            .pantry_items
            .select_where(vec![
                Filter::is_in("pantry_id", &pantry_ids),
                Filter::gte("expiry_date", today),
                Filter::lte("expiry_date", until),
            ])
            .await?;
        items.sort_by_key(|i| i.expiry_date);
        Ok(items)
    }

    /// Cancel in-flight fetches and drop every cache (logout)
    pub fn reset(&self) {
        self.pantries.clear();
        self.shopping_lists.clear();
        self.expenses.clear();
        self.pantry_items.clear();
        self.shopping_items.clear();
        self.friends.clear();
    }
}
