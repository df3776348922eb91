use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::{AssistantError, Result};
use crate::repository_traits::{Authenticator, RecordQuery, RecordStore, SortOrder};

/// Column every table uses to tie a row to its owner
const OWNER_COLUMN: &str = "user_id";

/// Hosted store reached through its PostgREST endpoint
pub struct RestRecordStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestRecordStore {
    pub fn new(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn table_url(&self, query: &RecordQuery) -> String {
        format!("{}/rest/v1/{}", self.base_url, query.table().name())
    }
}

/// PostgREST query-string pairs for a record query
pub fn query_params(query: &RecordQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("select".to_string(), "*".to_string()),
        (OWNER_COLUMN.to_string(), format!("eq.{}", query.owner_id())),
    ];

    if let Some((from, to)) = query.date_range() {
        let column = query.table().date_column();
        params.push((column.to_string(), format!("gte.{from}")));
        params.push((column.to_string(), format!("lte.{to}")));
    }

    for (column, value) in query.equals() {
        params.push((column.clone(), format!("eq.{value}")));
    }

    if let Some((column, order)) = query.order() {
        let direction = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        params.push(("order".to_string(), format!("{column}.{direction}")));
    }

    if let Some(limit) = query.row_limit() {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn select(&self, query: &RecordQuery) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(self.table_url(query))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&query_params(query))
            .send()
            .await
            .map_err(|e| AssistantError::DataStore(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::DataStore(format!(
                "{} read returned {}: {}",
                query.table().name(),
                status,
                body
            )));
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| AssistantError::DataStore(format!("Failed to decode rows: {e}")))
    }
}

/// Verifies bearer tokens against the hosted auth service
pub struct RestAuthenticator {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

impl RestAuthenticator {
    pub fn new(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AssistantError::Unauthorized(format!(
                "token rejected with status {}",
                response.status()
            )));
        }

        let user: AuthUser = response.json().await.map_err(|e| {
            AssistantError::Unauthorized(format!("unexpected auth response: {e}"))
        })?;
        Ok(user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository_traits::Table;
    use chrono::NaiveDate;

    #[test]
    fn test_query_params_always_scope_owner() {
        let q = RecordQuery::new(Table::Clients, "user-1");
        let params = query_params(&q);
        assert!(params.contains(&("user_id".to_string(), "eq.user-1".to_string())));
    }

    #[test]
    fn test_query_params_full() {
        let from = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");
        let to = NaiveDate::from_ymd_opt(2025, 12, 31).expect("valid date");
        let q = RecordQuery::new(Table::Invoices, "u")
            .between(from, to)
            .eq("client_id", "c-9")
            .order_by("issue_date", SortOrder::Descending)
            .limit(50);
        let params = query_params(&q);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "*".to_string()),
                ("user_id".to_string(), "eq.u".to_string()),
                ("issue_date".to_string(), "gte.2025-01-01".to_string()),
                ("issue_date".to_string(), "lte.2025-12-31".to_string()),
                ("client_id".to_string(), "eq.c-9".to_string()),
                ("order".to_string(), "issue_date.desc".to_string()),
                ("limit".to_string(), "50".to_string()),
            ]
        );
    }
}
