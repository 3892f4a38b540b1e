use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Number, Value};
use tracing::debug;

use super::{error::RegistryError, store::DeviceStore};
use crate::{
    google::{AccessTokenSource, GoogleApiError},
    model::device::DeviceRecord,
};

pub const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const COLLECTION: &str = "devices";
const PAGE_SIZE: u32 = 300;

/// Firestore over its REST surface. One document per device in the
/// `devices` collection, keyed by the registry id.
pub struct FirestoreStore {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    documents_url: String,
}

impl FirestoreStore {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenSource>,
        base_url: &str,
        project_id: &str,
    ) -> Self {
        Self {
            http,
            tokens,
            documents_url: format!(
                "{}/projects/{project_id}/databases/(default)/documents",
                base_url.trim_end_matches('/')
            ),
        }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{COLLECTION}/{id}", self.documents_url)
    }

    async fn find_by_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": COLLECTION }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": value }
                    }
                },
                "limit": 1
            }
        });

        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(format!("{}:runQuery", self.documents_url))
            .bearer_auth(token)
            .json(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GoogleApiError::from_response(response).await.into());
        }

        // runQuery answers with one entry per result; entries without a
        // `document` only carry the read time.
        let rows: Vec<Value> = response.json().await?;
        rows.into_iter()
            .find_map(|mut row| row.get_mut("document").map(Value::take))
            .map(|doc| decode_document(&doc))
            .transpose()
    }
}

#[async_trait]
impl DeviceStore for FirestoreStore {
    fn backend_name(&self) -> &'static str {
        "firestore"
    }

    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        let token = self.tokens.access_token().await?;
        let response = self.http.get(self.doc_url(id)).bearer_auth(token).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GoogleApiError::from_response(response).await.into());
        }

        let doc: Value = response.json().await?;
        decode_document(&doc).map(Some)
    }

    async fn find_by_imei(&self, imei: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        self.find_by_field("imei", imei).await
    }

    async fn find_by_android_id(
        &self,
        android_id: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError> {
        self.find_by_field("androidId", android_id).await
    }

    async fn put(&self, record: &DeviceRecord) -> Result<(), RegistryError> {
        let body = json!({ "fields": encode_fields(&serde_json::to_value(record)?) });

        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .patch(self.doc_url(&record.id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GoogleApiError::from_response(response).await.into());
        }

        debug!(device_id = %record.id, "firestore document written");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let mut devices = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.tokens.access_token().await?;
            let mut request = self
                .http
                .get(format!("{}/{COLLECTION}", self.documents_url))
                .bearer_auth(token)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(GoogleApiError::from_response(response).await.into());
            }

            let page: Value = response.json().await?;
            if let Some(docs) = page["documents"].as_array() {
                for doc in docs {
                    devices.push(decode_document(doc)?);
                }
            }

            match page["nextPageToken"].as_str() {
                Some(next) if !next.is_empty() => page_token = Some(next.to_string()),
                _ => break,
            }
        }

        devices.sort_by_key(|d| d.registered_at);
        Ok(devices)
    }

    async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        // Firestore deletes are silent for missing documents.
        if self.get(id).await?.is_none() {
            return Ok(false);
        }

        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .delete(self.doc_url(id))
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GoogleApiError::from_response(response).await.into());
        }
        Ok(true)
    }
}

/// JSON object -> Firestore `fields` map.
pub fn encode_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect(),
        ),
        _ => Value::Object(Map::new()),
    }
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(_) => json!({ "mapValue": { "fields": encode_fields(value) } }),
    }
}

fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" => inner.clone(),
        "booleanValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(|i| Value::Number(i.into()))
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "mapValue" => decode_fields(&inner["fields"]),
        "arrayValue" => Value::Array(
            inner["values"]
                .as_array()
                .map(|vals| vals.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

fn decode_fields(fields: &Value) -> Value {
    Value::Object(
        fields
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
            .unwrap_or_default(),
    )
}

fn decode_document(doc: &Value) -> Result<DeviceRecord, RegistryError> {
    let mut fields = decode_fields(&doc["fields"]);

    // Documents written by other tools may lack `id`; fall back to the
    // last segment of the document name.
    if fields.get("id").is_none() {
        if let Some(id) = doc["name"].as_str().and_then(|n| n.rsplit('/').next()) {
            fields["id"] = Value::String(id.to_string());
        }
    }

    Ok(serde_json::from_value(fields)?)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Mutex};

    use super::*;
    use crate::{
        google::{fake, StaticTokenSource},
        model::device::{DeviceStatus, NewDevice},
    };
    use axum::http::{Method, StatusCode};
    use chrono::{Duration, Utc};

    type Documents = Mutex<BTreeMap<String, Value>>;

    fn document(id: &str, fields: &Value) -> Value {
        json!({
            "name": format!("projects/mdm-test/databases/(default)/documents/devices/{id}"),
            "fields": fields,
        })
    }

    /// Just enough of the Firestore REST surface for the store: document
    /// get/patch/delete, equality runQuery and a collection list served in
    /// pages of one document.
    fn emulate(docs: &Documents, call: &fake::Recorded) -> (StatusCode, Value) {
        let mut docs = docs.lock().unwrap();

        if call.path.ends_with("documents:runQuery") {
            let filter = &call.body["structuredQuery"]["where"]["fieldFilter"];
            let field = filter["field"]["fieldPath"].as_str().unwrap_or_default();
            let wanted = &filter["value"]["stringValue"];
            let rows = match docs.iter().find(|(_, f)| &f[field]["stringValue"] == wanted) {
                Some((id, fields)) => json!([{ "document": document(id, fields) }]),
                None => json!([{ "readTime": "2024-05-01T10:00:00Z" }]),
            };
            return (StatusCode::OK, rows);
        }

        if call.path.ends_with("/documents/devices") {
            let all: Vec<Value> = docs.iter().map(|(id, f)| document(id, f)).collect();
            let offset = call
                .query
                .as_deref()
                .unwrap_or_default()
                .split('&')
                .find_map(|kv| kv.strip_prefix("pageToken=page-"))
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            let mut page = json!({ "documents": all.get(offset..offset + 1).unwrap_or_default() });
            if offset + 1 < all.len() {
                page["nextPageToken"] = json!(format!("page-{}", offset + 1));
            }
            return (StatusCode::OK, page);
        }

        let id = call.path.rsplit('/').next().unwrap_or_default().to_string();
        match call.method {
            Method::PATCH => {
                docs.insert(id.clone(), call.body["fields"].clone());
                (StatusCode::OK, document(&id, &call.body["fields"]))
            }
            Method::GET => match docs.get(&id) {
                Some(fields) => (StatusCode::OK, document(&id, fields)),
                None => (
                    StatusCode::NOT_FOUND,
                    json!({ "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" } }),
                ),
            },
            Method::DELETE => {
                docs.remove(&id);
                (StatusCode::OK, json!({}))
            }
            _ => (StatusCode::METHOD_NOT_ALLOWED, json!({})),
        }
    }

    fn device(id: &str, imei: &str, android_id: &str, age_minutes: i64) -> DeviceRecord {
        DeviceRecord::from_registration(
            id.into(),
            NewDevice {
                imei: Some(imei.into()),
                android_id: Some(android_id.into()),
                ..NewDevice::default()
            },
            Utc::now() - Duration::minutes(age_minutes),
        )
    }

    #[tokio::test]
    async fn store_round_trips_through_the_rest_api() {
        let docs = Arc::new(Documents::default());
        let emulator = docs.clone();
        let upstream = fake::spawn(move |call| emulate(&emulator, call)).await;
        let store = FirestoreStore::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenSource("fs-token".into())),
            &upstream.base_url,
            "mdm-test",
        );

        // dev-b sorts first by id but was registered later.
        let older = device("dev-b", "356938035643809", "droid-b", 10);
        let newer = device("dev-a", "356938035643810", "droid-a", 1);
        store.put(&older).await.unwrap();
        store.put(&newer).await.unwrap();
        assert_eq!(docs.lock().unwrap().len(), 2);

        assert_eq!(store.get("dev-b").await.unwrap(), Some(older.clone()));
        assert_eq!(store.get("nope").await.unwrap(), None);

        let found = store.find_by_imei("356938035643810").await.unwrap();
        assert_eq!(found.map(|d| d.id).as_deref(), Some("dev-a"));
        let found = store.find_by_android_id("droid-b").await.unwrap();
        assert_eq!(found.map(|d| d.id).as_deref(), Some("dev-b"));
        assert_eq!(store.find_by_android_id("missing").await.unwrap(), None);

        let listed: Vec<String> = store.list().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(listed, ["dev-b", "dev-a"]);
        let pages: Vec<_> = upstream
            .calls()
            .into_iter()
            .filter(|c| c.method == Method::GET && c.path.ends_with("/documents/devices"))
            .collect();
        assert_eq!(pages.len(), 2);
        assert!(pages[1].query.as_deref().unwrap_or_default().contains("pageToken=page-1"));

        assert!(store.delete("dev-b").await.unwrap());
        assert!(!store.delete("dev-b").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(upstream
            .calls()
            .iter()
            .all(|c| c.bearer.as_deref() == Some("fs-token")));
    }

    #[test]
    fn device_record_survives_firestore_encoding() {
        let mut record = DeviceRecord::from_registration(
            "abc".into(),
            NewDevice {
                imei: Some("356938035643809".into()),
                model: Some("Pixel 8".into()),
                custom_data: Some(json!({"battery": 87, "tags": ["kiosk", "lobby"], "temp": 36.5})),
                ..NewDevice::default()
            },
            Utc::now(),
        );
        record.is_locked = true;
        record.status = DeviceStatus::Locked;

        let fields = encode_fields(&serde_json::to_value(&record).unwrap());
        assert_eq!(fields["imei"]["stringValue"], "356938035643809");
        assert_eq!(fields["isLocked"]["booleanValue"], true);
        assert_eq!(
            fields["customData"]["mapValue"]["fields"]["battery"]["integerValue"],
            "87"
        );

        let doc = json!({ "name": "projects/p/databases/(default)/documents/devices/abc", "fields": fields });
        assert_eq!(decode_document(&doc).unwrap(), record);
    }

    #[test]
    fn id_falls_back_to_document_name() {
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/devices/from-name",
            "fields": {
                "androidId": { "stringValue": "droid" },
                "lastSeen": { "timestampValue": "2024-05-01T10:00:00Z" },
                "registeredAt": { "timestampValue": "2024-05-01T10:00:00Z" },
                "updatedAt": { "timestampValue": "2024-05-01T10:00:00Z" }
            }
        });
        let record = decode_document(&doc).unwrap();
        assert_eq!(record.id, "from-name");
        assert_eq!(record.status, DeviceStatus::Active);
    }
}
