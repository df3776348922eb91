//! Read-side aggregation over the hosted store for the `query_database` tool.

use chrono::{Datelike, Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AssistantError, Result};
use crate::models::{ExpenseRecord, InventoryRecord, InvoiceRecord, ProjectRecord, QueryFilters};
use crate::repository_traits::{RecordQuery, RecordStore, SortOrder, Table};

const CLIENT_LIMIT: usize = 20;
const INVOICE_LIMIT: usize = 50;
const PROJECT_LIMIT: usize = 20;
const EXPENSE_LIMIT: usize = 30;
/// Items at or below this quantity count as low stock
const LOW_STOCK_THRESHOLD: f64 = 5.0;
const ACTIVE_PROJECT_STATUS: &str = "in_progress";
const UNCATEGORIZED: &str = "Sin categoría";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    FinancialSummary,
    Clients,
    Invoices,
    Projects,
    Expenses,
    Inventory,
}

impl FromStr for QueryKind {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "financial_summary" => Ok(Self::FinancialSummary),
            "clients" => Ok(Self::Clients),
            "invoices" => Ok(Self::Invoices),
            "projects" => Ok(Self::Projects),
            "expenses" => Ok(Self::Expenses),
            "inventory" => Ok(Self::Inventory),
            other => Err(AssistantError::InvalidRequest(format!(
                "Tipo de consulta no válido: {other}"
            ))),
        }
    }
}

/// Inclusive date window a query is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Missing or unparseable bounds default to the current calendar year.
    pub fn resolve(filters: &QueryFilters, today: NaiveDate) -> Self {
        let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
        let year_end = NaiveDate::from_ymd_opt(today.year(), 12, 31).unwrap_or(today);
        Self {
            from: filters
                .date_from
                .as_deref()
                .and_then(parse_date)
                .unwrap_or(year_start),
            to: filters
                .date_to
                .as_deref()
                .and_then(parse_date)
                .unwrap_or(year_end),
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Accept full timestamps by keeping only the calendar part
    let day = raw.trim().get(..10)?;
    match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(e) => {
            warn!("Ignoring unparseable date filter '{}': {}", raw, e);
            None
        }
    }
}

fn decode<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| AssistantError::DataStore(format!("Malformed record: {e}")))
        })
        .collect()
}

pub struct RecordQueryAdapter {
    store: Arc<dyn RecordStore>,
}

impl RecordQueryAdapter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Runs one query for `owner_id`. Read failures come back as `{"error": ...}`.
    pub async fn run(&self, owner_id: &str, kind: QueryKind, filters: &QueryFilters) -> Value {
        self.run_on(owner_id, kind, filters, Local::now().date_naive())
            .await
    }

    pub async fn run_on(
        &self,
        owner_id: &str,
        kind: QueryKind,
        filters: &QueryFilters,
        today: NaiveDate,
    ) -> Value {
        let range = DateRange::resolve(filters, today);
        info!(?kind, owner = owner_id, from = %range.from, to = %range.to, "Running record query");

        let result = match kind {
            QueryKind::FinancialSummary => self.financial_summary(owner_id, range).await,
            QueryKind::Clients => self.clients(owner_id).await,
            QueryKind::Invoices => self.invoices(owner_id, range, filters).await,
            QueryKind::Projects => self.projects(owner_id).await,
            QueryKind::Expenses => self.expenses(owner_id, range).await,
            QueryKind::Inventory => self.inventory(owner_id).await,
        };

        result.unwrap_or_else(|e| {
            warn!(?kind, "Record query failed: {}", e);
            json!({ "error": e.to_string() })
        })
    }

    async fn financial_summary(&self, owner_id: &str, range: DateRange) -> Result<Value> {
        let expenses_query = RecordQuery::new(Table::Expenses, owner_id).between(range.from, range.to);
        let invoices_query = RecordQuery::new(Table::Invoices, owner_id).between(range.from, range.to);
        let (expense_rows, invoice_rows) = futures::try_join!(
            self.store.select(&expenses_query),
            self.store.select(&invoices_query)
        )?;
        let expenses: Vec<ExpenseRecord> = decode(expense_rows)?;
        let invoices: Vec<InvoiceRecord> = decode(invoice_rows)?;

        let mut total_gastos = 0.0;
        let mut iva_pagado = 0.0;
        let mut rete_fuente = 0.0;
        let mut rete_iva = 0.0;
        let mut rete_ica = 0.0;
        for e in &expenses {
            total_gastos += e.value();
            iva_pagado += e.vat_paid.unwrap_or(0.0);
            rete_fuente += e.retention_source.unwrap_or(0.0);
            rete_iva += e.retention_vat.unwrap_or(0.0);
            rete_ica += e.retention_ica.unwrap_or(0.0);
        }

        let paid: Vec<&InvoiceRecord> = invoices.iter().filter(|i| i.has_status("paid")).collect();
        let ingresos: f64 = paid.iter().map(|i| i.amount.unwrap_or(0.0)).sum();

        Ok(json!({
            "periodo": { "desde": range.from.to_string(), "hasta": range.to.to_string() },
            "ingresos": {
                "total": ingresos,
                "facturas_pagadas": paid.len(),
            },
            "gastos": {
                "total": total_gastos,
                "cantidad": expenses.len(),
                "iva_pagado": iva_pagado,
                "retencion_fuente": rete_fuente,
                "retencion_iva": rete_iva,
                "retencion_ica": rete_ica,
            },
            "beneficios_fiscales": {
                "iva_descontable": iva_pagado - rete_iva,
                "credito_renta": rete_fuente,
                "credito_ica": rete_ica,
            },
            "utilidad_bruta": ingresos - total_gastos,
        }))
    }

    async fn clients(&self, owner_id: &str) -> Result<Value> {
        let query = RecordQuery::new(Table::Clients, owner_id)
            .order_by("created_at", SortOrder::Descending)
            .limit(CLIENT_LIMIT);
        let clients = self.store.select(&query).await?;
        Ok(json!({ "total": clients.len(), "clientes": clients }))
    }

    async fn invoices(
        &self,
        owner_id: &str,
        range: DateRange,
        filters: &QueryFilters,
    ) -> Result<Value> {
        let mut query = RecordQuery::new(Table::Invoices, owner_id).between(range.from, range.to);
        if let Some(client_id) = filters.client_id.as_deref().filter(|c| !c.is_empty()) {
            query = query.eq("client_id", client_id);
        }
        let query = query
            .order_by("issue_date", SortOrder::Descending)
            .limit(INVOICE_LIMIT);
        let invoices: Vec<InvoiceRecord> = decode(self.store.select(&query).await?)?;

        // Status counts come from the unfiltered fetch
        let count_status = |s: &str| invoices.iter().filter(|i| i.has_status(s)).count();
        let por_estado = json!({
            "paid": count_status("paid"),
            "pending": count_status("pending"),
            "draft": count_status("draft"),
        });

        let filtered: Vec<&InvoiceRecord> = match filters.status.as_deref() {
            Some(status) if !status.is_empty() => {
                invoices.iter().filter(|i| i.has_status(status)).collect()
            }
            _ => invoices.iter().collect(),
        };
        let total: f64 = filtered.iter().map(|i| i.amount.unwrap_or(0.0)).sum();

        Ok(json!({
            "facturas": filtered,
            "resumen": {
                "total": total,
                "cantidad": filtered.len(),
                "por_estado": por_estado,
            },
        }))
    }

    async fn projects(&self, owner_id: &str) -> Result<Value> {
        let query = RecordQuery::new(Table::Projects, owner_id)
            .order_by("created_at", SortOrder::Descending)
            .limit(PROJECT_LIMIT);
        let projects: Vec<ProjectRecord> = decode(self.store.select(&query).await?)?;

        let active: Vec<&ProjectRecord> = projects
            .iter()
            .filter(|p| {
                p.status
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(ACTIVE_PROJECT_STATUS))
            })
            .collect();
        let presupuesto: f64 = active.iter().map(|p| p.budget.unwrap_or(0.0)).sum();
        let costo_real: f64 = active.iter().map(|p| p.actual_cost.unwrap_or(0.0)).sum();

        Ok(json!({
            "proyectos": projects,
            "resumen": {
                "activos": active.len(),
                "presupuesto_total": presupuesto,
                "costo_real_total": costo_real,
                "variacion": presupuesto - costo_real,
            },
        }))
    }

    async fn expenses(&self, owner_id: &str, range: DateRange) -> Result<Value> {
        let query = RecordQuery::new(Table::Expenses, owner_id)
            .between(range.from, range.to)
            .order_by("expense_date", SortOrder::Descending)
            .limit(EXPENSE_LIMIT);
        let expenses: Vec<ExpenseRecord> = decode(self.store.select(&query).await?)?;

        let mut por_categoria: BTreeMap<String, CategoryTotal> = BTreeMap::new();
        for e in &expenses {
            let category = e
                .category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            let entry = por_categoria.entry(category).or_default();
            entry.cantidad += 1;
            entry.total += e.value();
        }
        let total: f64 = expenses.iter().map(ExpenseRecord::value).sum();

        Ok(json!({
            "gastos": expenses,
            "por_categoria": por_categoria,
            "total": total,
        }))
    }

    async fn inventory(&self, owner_id: &str) -> Result<Value> {
        let query = RecordQuery::new(Table::Inventory, owner_id).order_by("name", SortOrder::Ascending);
        let items: Vec<InventoryRecord> = decode(self.store.select(&query).await?)?;

        let valor_total: f64 = items
            .iter()
            .map(|i| i.quantity.unwrap_or(0.0) * i.unit_cost.unwrap_or(0.0))
            .sum();
        let bajo_stock = items
            .iter()
            .filter(|i| i.quantity.unwrap_or(0.0) <= LOW_STOCK_THRESHOLD)
            .count();

        Ok(json!({
            "items": items,
            "resumen": {
                "total_items": items.len(),
                "valor_total": valor_total,
                "bajo_stock": bajo_stock,
            },
        }))
    }
}

#[derive(Debug, Default, serde::Serialize)]
struct CategoryTotal {
    cantidad: usize,
    total: f64,
}
