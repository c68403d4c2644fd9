//! Navigable records built from API payloads
//!
//! A [`Record`] wraps one JSON object. Nested objects and arrays are wrapped
//! once, at construction, into [`FieldValue`] variants: objects that carry a
//! `url` or `id` become nested records, other objects stay navigable but can
//! never be hydrated, and fields declared as JSON fields are kept verbatim.
//!
//! Records built from list views are shallow. Asking one for a field it does
//! not have fetches the detail view from the record's `url` once and merges
//! the missing fields in; fields already present are never overwritten.

use crate::client::AciClient;
use crate::common::query::Request;
use crate::endpoint::{DetailEndpoint, Endpoint};
use crate::error::AciError;
use futures::stream::{Stream, TryStreamExt};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::slice;
use std::task::{Context, Poll};
use tracing::debug;

/// Fields kept verbatim on every record
pub const DEFAULT_JSON_FIELDS: &[&str] = &["custom_fields", "local_context_data", "config_context"];

/// Marker for values preserved verbatim, never wrapped into a record
#[derive(Debug, Clone, PartialEq)]
pub struct JsonField(pub Value);

/// A record field
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// null, bool, number or string
    Scalar(Value),
    /// Opaque pass-through value
    Json(JsonField),
    /// Nested object without identity (e.g. a `{label, value}` choice)
    Object(Record),
    /// Nested sub-resource, hydratable when it has a `url`
    Record(Record),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_scalar().and_then(Value::as_u64)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Json(JsonField(value)) => Some(value),
            _ => None,
        }
    }

    /// Nested record or opaque object
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldValue::Record(record) | FieldValue::Object(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            FieldValue::Record(record) | FieldValue::Object(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Plain JSON for this value and everything below it
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Scalar(value) | FieldValue::Json(JsonField(value)) => value.clone(),
            FieldValue::Object(record) | FieldValue::Record(record) => record.to_json(),
            FieldValue::List(items) => {
                Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
        }
    }

    /// Write-back form: nested resources collapse to their id, choices to their value
    fn serialize(&self) -> Value {
        match self {
            FieldValue::Scalar(value) | FieldValue::Json(JsonField(value)) => value.clone(),
            FieldValue::Record(record) => record
                .id()
                .cloned()
                .unwrap_or_else(|| record.serialize()),
            FieldValue::Object(record) => {
                match record.field("value").and_then(FieldValue::as_scalar) {
                    Some(value) => value.clone(),
                    None => record.serialize(),
                }
            }
            FieldValue::List(items) => {
                Value::Array(items.iter().map(FieldValue::serialize).collect())
            }
        }
    }
}

/// Hydration state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// Built from a payload that may lack detail-only fields
    Shallow,
    /// The detail view has been merged in
    Hydrated,
}

/// A navigable API object
#[derive(Clone)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
    url: Option<String>,
    hydration: Hydration,
    shallow_keys: Vec<String>,
    /// Serialized values as last received from or saved to the server
    init: Map<String, Value>,
    client: AciClient,
    endpoint: Option<Endpoint>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("url", &self.url)
            .field("hydration", &self.hydration)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in ["display", "name", "label"] {
            if let Some(name) = self.field(key).and_then(FieldValue::as_str) {
                if !name.is_empty() {
                    return f.write_str(name);
                }
            }
        }
        f.write_str(self.url.as_deref().unwrap_or_default())
    }
}

impl Record {
    /// Wrap a JSON object
    ///
    /// When the payload has a non-empty `url`, the owning endpoint is derived
    /// from it so the record can be hydrated and saved outside the collection
    /// it came from; otherwise `endpoint` is used. Non-object payloads give an
    /// empty record.
    pub fn wrap(values: Value, client: &AciClient, endpoint: Option<&Endpoint>) -> Self {
        let values = match values {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let url = values
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(String::from);

        let endpoint = match url.as_deref().and_then(|url| client.endpoint_from_url(url)) {
            // Keep the caller's endpoint when it is the same one; it may declare JSON fields
            Some(derived) => match endpoint {
                Some(given) if given.url() == derived.url() => Some(given.clone()),
                _ => Some(derived),
            },
            None => endpoint.cloned(),
        };

        let mut record = Self {
            fields: Vec::with_capacity(values.len()),
            url,
            hydration: Hydration::Shallow,
            shallow_keys: Vec::new(),
            init: Map::new(),
            client: client.clone(),
            endpoint,
        };
        for (name, value) in values {
            let field = record.classify(&name, value);
            record.fields.push((name, field));
        }
        record.shallow_keys = record.fields.iter().map(|(name, _)| name.clone()).collect();
        record.init = record.serialize_map();
        record
    }

    /// Canonical URL of this record, if it has one
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn id(&self) -> Option<&Value> {
        self.field("id").and_then(FieldValue::as_scalar).filter(|id| !id.is_null())
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn hydration(&self) -> Hydration {
        self.hydration
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydration == Hydration::Hydrated
    }

    /// Field names present when the record was built
    pub fn shallow_field_names(&self) -> &[String] {
        &self.shallow_keys
    }

    /// Field names after hydration; `None` while shallow
    pub fn full_field_names(&self) -> Option<Vec<&str>> {
        self.is_hydrated().then(|| self.keys().collect())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Current fields in insertion order; never hydrates
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.fields.iter())
    }

    /// Look up a known field without touching the network
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.position(name).map(|index| &self.fields[index].1)
    }

    /// Look up a field, hydrating once if it is missing
    ///
    /// Fails with [`AciError::AttributeNotFound`] when the field is absent
    /// after hydration or the record has no `url`. Hydration failures are
    /// returned as the underlying request error.
    pub async fn attr(&mut self, name: &str) -> Result<&FieldValue, AciError> {
        self.resolve(name).await?;
        self.field(name).ok_or_else(|| self.missing(name))
    }

    /// Mutable variant of [`Record::attr`], used to walk into nested records
    pub async fn attr_mut(&mut self, name: &str) -> Result<&mut FieldValue, AciError> {
        self.resolve(name).await?;
        match self.position(name) {
            Some(index) => Ok(&mut self.fields[index].1),
            None => Err(self.missing(name)),
        }
    }

    /// Fetch the detail view and merge missing fields in
    ///
    /// Returns `false` when the record has no `url` to fetch from.
    pub async fn full_details(&mut self) -> Result<bool, AciError> {
        let Some(url) = self.url.clone() else {
            return Ok(false);
        };
        debug!("Fetching full details for {}", url);

        let mut details = Box::pin(self.client.request(&url).get(None));
        let detail = details.try_next().await?;

        self.hydration = Hydration::Hydrated;
        if let Some(Value::Object(values)) = detail {
            self.merge_missing(values);
        }
        Ok(true)
    }

    /// Plain JSON of the currently known fields; never hydrates
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Write-back form of the record
    pub fn serialize(&self) -> Value {
        Value::Object(self.serialize_map())
    }

    /// Fields changed locally since the record was received or last saved
    ///
    /// Records without an `id` cannot be updated and report no changes.
    pub fn updates(&self) -> Map<String, Value> {
        if self.id().is_none() {
            return Map::new();
        }
        self.serialize_map()
            .into_iter()
            .filter(|(name, value)| self.init.get(name) != Some(value))
            .collect()
    }

    /// Set a field locally; the value is wrapped like a parsed one
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let field = self.classify(name, value.into());
        match self.position(name) {
            Some(index) => self.fields[index].1 = field,
            None => self.fields.push((name.to_string(), field)),
        }
    }

    /// PATCH local changes to the server; `false` when there is nothing to send
    pub async fn save(&mut self) -> Result<bool, AciError> {
        let diff = self.updates();
        if diff.is_empty() {
            return Ok(false);
        }
        let url = self.detail_url()?;
        debug!("Saving {} field(s) to {}", diff.len(), url);

        self.client.request(&url).patch(&Value::Object(diff)).await?;
        self.init = self.serialize_map();
        Ok(true)
    }

    /// DELETE this record on the server
    pub async fn delete(&self) -> Result<bool, AciError> {
        let url = self.detail_url()?;
        self.client.request(&url).delete(None).await
    }

    /// Read/write detail route below this record, e.g. `available-ips`
    pub fn detail_endpoint(&self, name: &str) -> Result<DetailEndpoint, AciError> {
        Ok(DetailEndpoint::new(self, self.detail_url()?, name, false))
    }

    /// Read-only detail route below this record, e.g. `napalm`
    pub fn ro_detail_endpoint(&self, name: &str) -> Result<DetailEndpoint, AciError> {
        Ok(DetailEndpoint::new(self, self.detail_url()?, name, true))
    }

    pub(crate) fn client(&self) -> &AciClient {
        &self.client
    }

    /// `{endpoint}/{id}/` when both are known, else the record URL
    fn detail_url(&self) -> Result<String, AciError> {
        match (&self.endpoint, self.id()) {
            (Some(endpoint), Some(id)) => Ok(format!("{}/{}/", endpoint.url(), key_string(id))),
            _ => self.url.clone().ok_or_else(|| {
                AciError::InvalidRequest(format!(
                    "record {} has neither an id on a known endpoint nor a url",
                    self
                ))
            }),
        }
    }

    async fn resolve(&mut self, name: &str) -> Result<(), AciError> {
        if self.position(name).is_none() && !self.is_hydrated() && self.url.is_some() {
            self.full_details().await?;
        }
        Ok(())
    }

    fn missing(&self, name: &str) -> AciError {
        AciError::AttributeNotFound {
            field: name.to_string(),
            url: self.url.clone(),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(key, _)| key == name)
    }

    fn is_json_field(&self, name: &str) -> bool {
        DEFAULT_JSON_FIELDS.contains(&name)
            || self
                .endpoint
                .as_ref()
                .is_some_and(|endpoint| endpoint.json_fields().iter().any(|field| field == name))
    }

    fn classify(&self, name: &str, value: Value) -> FieldValue {
        if self.is_json_field(name) {
            FieldValue::Json(JsonField(value))
        } else {
            self.classify_value(value)
        }
    }

    fn classify_value(&self, value: Value) -> FieldValue {
        match value {
            Value::Object(map) => {
                let identified = ["url", "id"]
                    .iter()
                    .any(|key| map.get(*key).is_some_and(|v| !v.is_null()));
                let nested = Record::wrap(Value::Object(map), &self.client, None);
                if identified {
                    FieldValue::Record(nested)
                } else {
                    FieldValue::Object(nested)
                }
            }
            Value::Array(items) => {
                FieldValue::List(items.into_iter().map(|item| self.classify_value(item)).collect())
            }
            other => FieldValue::Scalar(other),
        }
    }

    /// Append-only merge of a detail payload
    ///
    /// Absent fields are added. A nested object already present is completed
    /// with the fields of the richer nested object under the same key, again
    /// without overwriting anything.
    ///
    /// Merged-in data counts as server state: it never shows up in
    /// [`Record::updates`] unless the field was already edited locally.
    fn merge_missing(&mut self, values: Map<String, Value>) {
        for (name, value) in values {
            match self.position(&name) {
                None => {
                    let field = self.classify(&name, value);
                    self.init.insert(name.clone(), field.serialize());
                    self.fields.push((name, field));
                }
                Some(index) => {
                    let unedited = self.init.get(&name) == Some(&self.fields[index].1.serialize());
                    let merged = match (&mut self.fields[index].1, value) {
                        (
                            FieldValue::Record(nested) | FieldValue::Object(nested),
                            Value::Object(richer),
                        ) => {
                            nested.merge_missing(richer);
                            true
                        }
                        _ => false,
                    };
                    if merged && unedited {
                        let baseline = self.fields[index].1.serialize();
                        self.init.insert(name, baseline);
                    }
                }
            }
        }
    }

    fn serialize_map(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.serialize()))
            .collect()
    }
}

/// Render an id for use in a URL path
pub(crate) fn key_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Iterator over a record's fields
#[derive(Debug)]
pub struct Iter<'a>(slice::Iter<'a, (String, FieldValue)>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a FieldValue);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(name, value)| (name.as_str(), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a str, &'a FieldValue);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy stream of records from a list or filter query
pub struct RecordSet {
    inner: Pin<Box<dyn Stream<Item = Result<Record, AciError>> + Send>>,
    request: Request,
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSet")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl RecordSet {
    pub(crate) fn new(endpoint: Endpoint, request: Request) -> Self {
        let client = endpoint.client().clone();
        let inner = request
            .get(None)
            .map_ok(move |values| Record::wrap(values, &client, Some(&endpoint)));
        Self {
            inner: Box::pin(inner),
            request,
        }
    }

    /// Server-side count of the records this query matches
    pub async fn count(&self) -> Result<u64, AciError> {
        self.request.get_count().await
    }
}

impl Stream for RecordSet {
    type Item = Result<Record, AciError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
