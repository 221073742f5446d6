//! HTTP client for the policy service

use super::client::LookupClient;
use super::types::{Filter, LookupError, LookupQuery, ANONYMOUS_USER};
use crate::config::{BasicAuth, PolicyConfig};
use crate::graph::{wire, NodeRegistry, Row};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Table and filter field used to map a network id to a user id
const USERS_TABLE: &str = "users";
const NETWORK_ID_FIELD: &str = "network_id";
const USER_ID_FIELD: &str = "_id";

/// Posts lookup queries to the policy service's uploader endpoint
#[derive(Debug, Clone)]
pub struct HttpLookupClient {
    http: Client,
    uploader_url: String,
    ingest_url: String,
    auth: Option<BasicAuth>,
    user: i64,
}

impl HttpLookupClient {
    pub fn new(config: &PolicyConfig) -> Result<Self, LookupError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LookupError::ServiceUnavailable(format!("failed to create HTTP client: {}", e)))?;

        debug!(uploader = %config.uploader_url(), ingest = %config.ingest_url(), "policy client configured");
        Ok(Self {
            http,
            uploader_url: config.uploader_url(),
            ingest_url: config.ingest_url(),
            auth: config.auth.clone(),
            user: ANONYMOUS_USER,
        })
    }

    pub fn with_user_id(mut self, user: i64) -> Self {
        self.user = user;
        self
    }

    pub fn user_id(&self) -> i64 {
        self.user
    }

    /// Establish the user queries are made on behalf of.
    ///
    /// Numeric input is taken as the user id. Anything else is treated as a
    /// network id and looked up in the users table anonymously.
    pub async fn resolve_user(&mut self, user: &str) -> Result<i64, LookupError> {
        if let Ok(id) = user.trim().parse::<i64>() {
            self.user = id;
            return Ok(id);
        }

        let mut filter = Filter::new();
        filter.insert(NETWORK_ID_FIELD.to_string(), Value::String(user.to_string()));
        let query = LookupQuery::new(USERS_TABLE, &[USER_ID_FIELD.to_string()], &filter);
        let rows = self.post_query(&query).await?;

        let id = rows
            .first()
            .and_then(|row| row.get(USER_ID_FIELD))
            .and_then(user_id_from)
            .ok_or_else(|| LookupError::UnknownUser(user.to_string()))?;
        debug!(network_id = user, user_id = id, "resolved user");
        self.user = id;
        Ok(id)
    }

    /// Ask the ingest endpoint whether the registry is acceptable.
    ///
    /// Returns the service's verdict as-is.
    pub async fn validate_ingest(&self, registry: &NodeRegistry) -> Result<Value, LookupError> {
        let body = wire::to_value(registry).map_err(|e| LookupError::Decode(e.to_string()))?;
        debug!(url = %self.ingest_url, records = registry.len(), "policy ingest check");
        let value = self.post_json(&self.ingest_url, &body).await?;
        debug!(result = %value, "policy ingest result");
        Ok(value)
    }

    async fn post_query(&self, query: &LookupQuery) -> Result<Vec<Row>, LookupError> {
        let body = serde_json::to_value(query).map_err(|e| LookupError::Decode(e.to_string()))?;
        debug!(query = %body, "policy query");
        let value = self.post_json(&self.uploader_url, &body).await?;
        debug!(result = %value, "policy result");
        rows_from(value)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, LookupError> {
        let mut request = self.http.post(url).json(body);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| LookupError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::ServiceError {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| LookupError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    async fn query(&self, table: &str, fields: &[String], filter: &Filter) -> Result<Vec<Row>, LookupError> {
        let query = LookupQuery::new(table, fields, filter).as_user(self.user);
        self.post_query(&query).await
    }
}

fn rows_from(value: Value) -> Result<Vec<Row>, LookupError> {
    let Value::Array(items) = value else {
        return Err(LookupError::Decode("expected an array of rows".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            other => Err(LookupError::Decode(format!("row is not an object: {}", other))),
        })
        .collect()
}

fn user_id_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
