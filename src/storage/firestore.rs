//! Firestore backend over the REST API
//!
//! Users live in `users/{email}`, so a second registration with the same
//! email fails with `ALREADY_EXISTS`. Predictions and usage logs get
//! server-assigned ids. Counts and averages run as aggregation queries and
//! the per-user request counter is bumped with a server-side increment.
//!
//! With `FIRESTORE_EMULATOR_HOST` set, requests go to the emulator over
//! plain HTTP without OAuth.

use super::{
    start_of_today, GlobalStats, NewPrediction, PredictionRecord, Store, StoreError, StoreResult,
    UsageStats, UsageStatus, User, UserStats, TREND_WINDOW,
};
use crate::config::FirebaseConfig;
use crate::models::VoiceLabel;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

const FIRESTORE_ORIGIN: &str = "https://firestore.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Lifetime requested for each signed assertion
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh cached access tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const USERS: &str = "users";
const PREDICTIONS: &str = "predictions";
const USAGE_LOGS: &str = "api_usage_logs";

// ---------------------------------------------------------------------------
// Typed value codec
// ---------------------------------------------------------------------------

/// Plain JSON → Firestore typed value
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or(0.0) }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

pub fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true) })
}

/// Firestore typed value → plain JSON. Timestamps become RFC 3339 strings.
pub fn decode_value(value: &Value) -> StoreResult<Value> {
    let malformed = || StoreError::Malformed(format!("unexpected Firestore value {}", value));
    let obj = value.as_object().ok_or_else(malformed)?;
    let (kind, inner) = obj.iter().next().ok_or_else(malformed)?;

    Ok(match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().ok_or_else(malformed)?),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().map_err(|_| malformed())?,
                other => other.as_i64().ok_or_else(malformed)?,
            };
            Value::from(parsed)
        }
        "doubleValue" => Value::from(inner.as_f64().ok_or_else(malformed)?),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(decode_value).collect::<StoreResult<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            Value::Array(values)
        }
        "mapValue" => {
            let fields = inner.get("fields").and_then(Value::as_object);
            Value::Object(match fields {
                Some(fields) => decode_fields(fields)?,
                None => Map::new(),
            })
        }
        "geoPointValue" => inner.clone(),
        _ => return Err(malformed()),
    })
}

pub fn decode_fields(fields: &Map<String, Value>) -> StoreResult<Map<String, Value>> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect()
}

/// Decode a REST `Document` into `T`, exposing its id as the `id` field
fn decode_document<T: serde::de::DeserializeOwned>(doc: &Value) -> StoreResult<T> {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Malformed("document without a name".to_string()))?;
    let id = name.rsplit('/').next().unwrap_or(name);

    let mut plain = match doc.get("fields").and_then(Value::as_object) {
        Some(fields) => decode_fields(fields)?,
        None => Map::new(),
    };
    plain.insert("id".to_string(), Value::from(id));
    serde_json::from_value(Value::Object(plain)).map_err(|e| StoreError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Structured queries
// ---------------------------------------------------------------------------

fn field_filter(field: &str, op: &str, value: Value) -> Value {
    json!({ "fieldFilter": { "field": { "fieldPath": field }, "op": op, "value": value } })
}

fn equals(field: &str, value: &str) -> Value {
    field_filter(field, "EQUAL", json!({ "stringValue": value }))
}

fn all_of(mut filters: Vec<Value>) -> Option<Value> {
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(json!({ "compositeFilter": { "op": "AND", "filters": filters } })),
    }
}

fn structured_query(
    collection: &str,
    filters: Vec<Value>,
    newest_first: bool,
    limit: Option<usize>,
) -> Value {
    let mut query = json!({ "from": [{ "collectionId": collection }] });
    if let Some(filter) = all_of(filters) {
        query["where"] = filter;
    }
    if newest_first {
        query["orderBy"] = json!([{ "field": { "fieldPath": "timestamp" }, "direction": "DESCENDING" }]);
    }
    if let Some(limit) = limit {
        query["limit"] = json!(limit);
    }
    query
}

// ---------------------------------------------------------------------------
// Service-account OAuth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// Undo the escaping that creeps into keys pasted through environment
/// variables: surrounding quotes and literal `\n` sequences
pub fn repair_private_key(key: &str) -> String {
    let trimmed = key.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|k| k.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.replace("\\n", "\n")
}

fn load_service_account(config: &FirebaseConfig) -> StoreResult<ServiceAccount> {
    let raw = match &config.credentials_json {
        Some(inline) => {
            log::info!("Loading Firebase credentials from FIREBASE_CREDENTIALS_JSON");
            inline.expose_secret().clone()
        }
        None => {
            log::info!(
                "Loading Firebase credentials from {}",
                config.credentials_path.display()
            );
            std::fs::read_to_string(&config.credentials_path).map_err(|e| {
                StoreError::Config(format!(
                    "cannot read {}: {}",
                    config.credentials_path.display(),
                    e
                ))
            })?
        }
    };
    let mut account: ServiceAccount = serde_json::from_str(&raw)
        .map_err(|e| StoreError::Config(format!("invalid service account JSON: {}", e)))?;
    account.private_key = repair_private_key(&account.private_key);
    Ok(account)
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Exchanges signed assertions for access tokens and caches them
struct TokenSource {
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    fn new(account: &ServiceAccount) -> StoreResult<Self> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| StoreError::Config(format!("invalid service account key: {}", e)))?;
        Ok(Self {
            client_email: account.client_email.clone(),
            token_uri: account
                .token_uri
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            key,
            cache: Mutex::new(None),
        })
    }

    async fn token(&self, client: &reqwest::Client) -> StoreResult<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.token.clone());
            }
        }

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| StoreError::Connection(format!("cannot sign assertion: {}", e)))?;

        let response = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Connection(format!(
                "token exchange failed ({}): {}",
                status, body
            )));
        }
        let granted: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        log::debug!("Refreshed Firestore access token ({}s)", granted.expires_in);
        let lifetime = Duration::from_secs(granted.expires_in);
        *cache = Some(CachedToken {
            token: granted.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(granted.access_token)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct FirestoreStore {
    client: reqwest::Client,
    /// `.../v1/projects/{project}/databases/(default)`
    root: Url,
    /// `projects/{project}/databases/(default)`, the prefix of document names
    database_name: String,
    tokens: Option<TokenSource>,
}

impl FirestoreStore {
    pub async fn connect(config: &FirebaseConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let (origin, project, tokens) = match &config.emulator_host {
            Some(host) => {
                let project = config.project_id.clone().ok_or_else(|| {
                    StoreError::Config(
                        "FIREBASE_PROJECT_ID is required with FIRESTORE_EMULATOR_HOST".to_string(),
                    )
                })?;
                log::info!("Using Firestore emulator at {}", host);
                (format!("http://{}", host), project, None)
            }
            None => {
                let account = load_service_account(config)?;
                let project = config
                    .project_id
                    .clone()
                    .or_else(|| account.project_id.clone())
                    .ok_or_else(|| {
                        StoreError::Config("no Firebase project id configured".to_string())
                    })?;
                let tokens = TokenSource::new(&account)?;
                (FIRESTORE_ORIGIN.to_string(), project, Some(tokens))
            }
        };

        let store = Self::with_root(client, &origin, &project, tokens)?;
        log::info!("Firestore project '{}'", project);
        Ok(store)
    }

    fn with_root(
        client: reqwest::Client,
        origin: &str,
        project: &str,
        tokens: Option<TokenSource>,
    ) -> StoreResult<Self> {
        let mut root =
            Url::parse(origin).map_err(|e| StoreError::Config(format!("bad origin: {}", e)))?;
        root.path_segments_mut()
            .map_err(|_| StoreError::Config(format!("bad origin: {}", origin)))?
            .clear()
            .extend(["v1", "projects", project, "databases", "(default)"]);
        Ok(Self {
            client,
            root,
            database_name: format!("projects/{}/databases/(default)", project),
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_name, collection, id)
    }

    /// Send one request; `Ok(None)` means 404
    async fn call(&self, method: Method, url: Url, body: Option<Value>) -> StoreResult<Option<Value>> {
        let mut request = self.client.request(method, url);
        if let Some(tokens) = &self.tokens {
            request = request.bearer_auth(tokens.token(&self.client).await?);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(if status == StatusCode::CONFLICT {
                StoreError::Duplicate(text)
            } else {
                StoreError::Backend(format!("{}: {}", status, text))
            });
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn create(&self, collection: &str, id: Option<&str>, fields: Map<String, Value>) -> StoreResult<Value> {
        let mut url = self.url(&["documents", collection]);
        if let Some(id) = id {
            url.query_pairs_mut().append_pair("documentId", id);
        }
        self.call(Method::POST, url, Some(json!({ "fields": fields })))
            .await?
            .ok_or_else(|| StoreError::Backend(format!("collection {} not found", collection)))
    }

    async fn run_query(&self, query: Value) -> StoreResult<Vec<Value>> {
        let rows = self
            .call(
                Method::POST,
                self.url(&["documents:runQuery"]),
                Some(json!({ "structuredQuery": query })),
            )
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        Ok(rows
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("document").cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Count plus, when `average_of` is set, the mean of that field
    async fn aggregate(&self, query: Value, average_of: Option<&str>) -> StoreResult<(u64, f64)> {
        let mut aggregations = vec![json!({ "alias": "total", "count": {} })];
        if let Some(field) = average_of {
            aggregations.push(json!({ "alias": "average", "avg": { "field": { "fieldPath": field } } }));
        }
        let body = json!({
            "structuredAggregationQuery": {
                "structuredQuery": query,
                "aggregations": aggregations,
            }
        });
        let rows = self
            .call(Method::POST, self.url(&["documents:runAggregationQuery"]), Some(body))
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        parse_aggregation(&rows)
    }

    async fn count(&self, collection: &str, filters: Vec<Value>) -> StoreResult<u64> {
        let (total, _) = self
            .aggregate(structured_query(collection, filters, false, None), None)
            .await?;
        Ok(total)
    }

    async fn predictions_where(
        &self,
        filters: Vec<Value>,
        limit: usize,
    ) -> StoreResult<Vec<PredictionRecord>> {
        self.run_query(structured_query(PREDICTIONS, filters, true, Some(limit)))
            .await?
            .iter()
            .map(decode_document)
            .collect()
    }

    /// Label counts and mean confidence over predictions matching `filters`
    async fn prediction_totals(&self, filters: Vec<Value>) -> StoreResult<(u64, u64, u64, f64)> {
        let (total, average) = self
            .aggregate(
                structured_query(PREDICTIONS, filters.clone(), false, None),
                Some("confidence"),
            )
            .await?;
        let mut counts = [0u64; 2];
        for (slot, label) in counts.iter_mut().zip([VoiceLabel::AiGenerated, VoiceLabel::Human]) {
            let mut narrowed = filters.clone();
            narrowed.push(equals("prediction", label.as_ref()));
            *slot = self.count(PREDICTIONS, narrowed).await?;
        }
        Ok((total, counts[0], counts[1], average))
    }
}

/// Read `total` and `average` from a `runAggregationQuery` response
fn parse_aggregation(rows: &Value) -> StoreResult<(u64, f64)> {
    let fields = rows
        .as_array()
        .and_then(|rows| rows.iter().find_map(|r| r.pointer("/result/aggregateFields")))
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Malformed("aggregation without result".to_string()))?;
    let decoded = decode_fields(fields)?;
    let total = decoded.get("total").and_then(Value::as_u64).unwrap_or(0);
    let average = decoded.get("average").and_then(Value::as_f64).unwrap_or(0.0);
    Ok((total, average))
}

#[async_trait]
impl Store for FirestoreStore {
    fn backend(&self) -> &'static str {
        "firebase"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut url = self.url(&["documents", USERS]);
        url.query_pairs_mut().append_pair("pageSize", "1");
        self.call(Method::GET, url, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        api_key: &str,
    ) -> StoreResult<User> {
        let mut fields = encode_fields(
            json!({
                "email": email,
                "password_hash": password_hash,
                "api_key": api_key,
                "total_requests": 0,
            })
            .as_object()
            .ok_or_else(|| StoreError::Malformed("user fields".to_string()))?,
        );
        fields.insert("created_at".to_string(), timestamp_value(&Utc::now()));

        let doc = self.create(USERS, Some(email), fields).await.map_err(|e| match e {
            StoreError::Duplicate(_) => StoreError::Duplicate(format!("email {}", email)),
            other => other,
        })?;
        log::info!("Created user: {}", email);
        decode_document(&doc)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        match self.call(Method::GET, self.url(&["documents", USERS, email]), None).await? {
            Some(doc) => decode_document(&doc).map(Some),
            None => Ok(None),
        }
    }

    async fn user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>> {
        let query = structured_query(USERS, vec![equals("api_key", api_key)], false, Some(1));
        self.run_query(query)
            .await?
            .first()
            .map(decode_document)
            .transpose()
    }

    async fn log_prediction(&self, prediction: &NewPrediction) -> StoreResult<String> {
        let plain = serde_json::to_value(prediction).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let mut fields = encode_fields(
            plain
                .as_object()
                .ok_or_else(|| StoreError::Malformed("prediction fields".to_string()))?,
        );
        fields.insert("timestamp".to_string(), timestamp_value(&Utc::now()));

        let doc = self.create(PREDICTIONS, None, fields).await?;
        Ok(document_id(&doc))
    }

    async fn recent_predictions(&self, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        self.predictions_where(Vec::new(), limit).await
    }

    async fn statistics(&self) -> StoreResult<GlobalStats> {
        let (total, ai, human, average) = self.prediction_totals(Vec::new()).await?;
        Ok(GlobalStats::new(total, ai, human, average))
    }

    async fn user_history(&self, email: &str, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        self.predictions_where(vec![equals("user_email", email)], limit)
            .await
    }

    async fn user_stats(&self, email: &str) -> StoreResult<UserStats> {
        let mine = vec![equals("user_email", email)];
        let (total, ai, human, average) = self.prediction_totals(mine.clone()).await?;
        if total == 0 {
            return Ok(UserStats::default());
        }
        let newest = self.predictions_where(mine, TREND_WINDOW).await?;
        Ok(UserStats::from_parts(total, ai, human, average, &newest))
    }

    async fn log_api_usage(
        &self,
        email: &str,
        endpoint: &str,
        status: UsageStatus,
    ) -> StoreResult<String> {
        let mut fields = encode_fields(
            json!({ "user_email": email, "endpoint": endpoint, "status": status.as_ref() })
                .as_object()
                .ok_or_else(|| StoreError::Malformed("usage fields".to_string()))?,
        );
        fields.insert("timestamp".to_string(), timestamp_value(&Utc::now()));
        let doc = self.create(USAGE_LOGS, None, fields).await?;

        let increment = json!({
            "writes": [{
                "transform": {
                    "document": self.document_name(USERS, email),
                    "fieldTransforms": [{
                        "fieldPath": "total_requests",
                        "increment": { "integerValue": "1" }
                    }]
                },
                "currentDocument": { "exists": true }
            }]
        });
        self.call(Method::POST, self.url(&["documents:commit"]), Some(increment))
            .await?;
        Ok(document_id(&doc))
    }

    async fn usage_stats(&self, email: &str) -> StoreResult<UsageStats> {
        let mine = equals("user_email", email);
        let total = self.count(USAGE_LOGS, vec![mine.clone()]).await?;
        let since_midnight = field_filter(
            "timestamp",
            "GREATER_THAN_OR_EQUAL",
            timestamp_value(&start_of_today()),
        );
        let today = self.count(USAGE_LOGS, vec![mine, since_midnight]).await?;
        Ok(UsageStats {
            requests_today: today,
            total_requests: total,
        })
    }
}

fn document_id(doc: &Value) -> String {
    doc.get("name")
        .and_then(Value::as_str)
        .and_then(|name| name.rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}
