//! Household records and their table layouts

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{ChildItem, Direction, EdgeSpec, ItemSpec, QuantityPolicy, Resource, ResourceSpec, Role};

/// Pantry (home food inventory)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pantry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PantryDraft {
    pub name: String,
}

impl Resource for Pantry {
    type Draft = PantryDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn owner_id(&self) -> Uuid {
        self.owner_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShoppingList {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingListDraft {
    pub name: String,
}

impl Resource for ShoppingList {
    type Draft = ShoppingListDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn owner_id(&self) -> Uuid {
        self.owner_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub amount: f64,
    pub category: String,
    pub spent_on: NaiveDate,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseDraft {
    pub title: String,
    pub amount: f64,
    pub category: String,
    pub spent_on: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Resource for Expense {
    type Draft = ExpenseDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn owner_id(&self) -> Uuid {
        self.owner_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PantryItem {
    pub id: Uuid,
    pub pantry_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PantryItemDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
}

impl ChildItem for PantryItem {
    type Draft = PantryItemDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Uuid {
        self.pantry_id
    }

    fn quantity(&self) -> f64 {
        self.quantity
    }

    fn set_quantity(&mut self, quantity: f64) {
        self.quantity = quantity;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShoppingItem {
    pub id: Uuid,
    pub shopping_list_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub purchased: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingItemDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ChildItem for ShoppingItem {
    type Draft = ShoppingItemDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Uuid {
        self.shopping_list_id
    }

    fn quantity(&self) -> f64 {
        self.quantity
    }

    fn set_quantity(&mut self, quantity: f64) {
        self.quantity = quantity;
    }
}

pub fn pantry_spec() -> ResourceSpec {
    ResourceSpec {
        table: "pantries",
        owner_column: "owner_id",
        edges: EdgeSpec {
            table: "pantry_members",
            resource_column: "pantry_id",
            user_column: "user_id",
            role: Role::Member,
        },
        order: Some(("created_at", Direction::Desc)),
    }
}

pub fn shopping_list_spec() -> ResourceSpec {
    ResourceSpec {
        table: "shopping_lists",
        owner_column: "owner_id",
        edges: EdgeSpec {
            table: "shopping_list_members",
            resource_column: "shopping_list_id",
            user_column: "user_id",
            role: Role::Member,
        },
        order: Some(("created_at", Direction::Desc)),
    }
}

pub fn expense_spec() -> ResourceSpec {
    ResourceSpec {
        table: "expenses",
        owner_column: "owner_id",
        edges: EdgeSpec {
            table: "expense_viewers",
            resource_column: "expense_id",
            user_column: "user_id",
            role: Role::Viewer,
        },
        order: Some(("spent_on", Direction::Desc)),
    }
}

/// Pantry stock changes land in the cache only once the server confirms
pub fn pantry_item_spec() -> ItemSpec {
    ItemSpec {
        table: "pantry_items",
        parent_column: "pantry_id",
        order: Some(("name", Direction::Asc)),
        policy: QuantityPolicy::Confirmed,
    }
}

/// Shopping quantities are tapped often; show them immediately
pub fn shopping_item_spec() -> ItemSpec {
    ItemSpec {
        table: "shopping_items",
        parent_column: "shopping_list_id",
        order: Some(("name", Direction::Asc)),
        policy: QuantityPolicy::Optimistic,
    }
}
