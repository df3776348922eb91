use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// Tables of the hosted store the assistant is allowed to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Clients,
    Invoices,
    Projects,
    Expenses,
    Inventory,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Clients => "clients",
            Table::Invoices => "invoices",
            Table::Projects => "projects",
            Table::Expenses => "expenses",
            Table::Inventory => "inventory",
        }
    }

    /// Column the date-range filter applies to
    pub fn date_column(&self) -> &'static str {
        match self {
            Table::Invoices => "issue_date",
            Table::Expenses => "expense_date",
            Table::Clients | Table::Projects | Table::Inventory => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A read against one table. Owner scoping is part of construction: there is no
/// way to build a query without the owner id.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    table: Table,
    owner_id: String,
    date_range: Option<(NaiveDate, NaiveDate)>,
    equals: Vec<(String, String)>,
    order: Option<(String, SortOrder)>,
    limit: Option<usize>,
}

impl RecordQuery {
    pub fn new(table: Table, owner_id: impl Into<String>) -> Self {
        Self {
            table,
            owner_id: owner_id.into(),
            date_range: None,
            equals: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Inclusive range on the table's date column
    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_range = Some((from, to));
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order = Some((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_range
    }

    pub fn equals(&self) -> &[(String, String)] {
        &self.equals
    }

    pub fn order(&self) -> Option<(&str, SortOrder)> {
        self.order.as_ref().map(|(c, o)| (c.as_str(), *o))
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Read-only access to the user's business records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn select(&self, query: &RecordQuery) -> Result<Vec<Value>>;
}

/// Resolves a bearer credential to the owner id of the caller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, token: &str) -> Result<String>;
}
