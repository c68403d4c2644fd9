//! Collection endpoints
//!
//! An [`Endpoint`] is one `{base_url}/{app}/{name}` collection. It lists and
//! filters records lazily, fetches single records, and carries the bulk
//! create/update/delete calls. [`DetailEndpoint`] covers the action routes
//! below a single record such as `available-ips`.

use crate::client::AciClient;
use crate::common::query::Request;
use crate::error::AciError;
use crate::record::{Record, RecordSet};
use futures::stream::TryStreamExt;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Paging and validation options for list and filter queries
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Page size; `Some(0)` asks the server for everything at once
    pub limit: Option<u64>,
    /// Start offset; pins the query to a single page
    pub offset: Option<u64>,
    /// Overrides the client-wide strict filter setting
    pub strict_filters: Option<bool>,
}

impl ListOptions {
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_strict_filters(mut self, strict: bool) -> Self {
        self.strict_filters = Some(strict);
        self
    }
}

/// A collection endpoint
#[derive(Clone)]
pub struct Endpoint {
    client: AciClient,
    app: String,
    name: String,
    url: String,
    json_fields: Arc<[String]>,
    choices: Arc<OnceCell<Map<String, Value>>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("json_fields", &self.json_fields)
            .finish_non_exhaustive()
    }
}

fn to_params(filters: &[(&str, &str)]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn require_id(value: &Value) -> Result<&Value, AciError> {
    value
        .get("id")
        .filter(|id| !id.is_null())
        .ok_or_else(|| AciError::InvalidRequest(format!("object has no id: {}", value)))
}

impl Endpoint {
    pub(crate) fn new(client: AciClient, app: &str, name: &str) -> Self {
        let name = name.replace('_', "-");
        let url = format!("{}/{}/{}", client.base_url(), app, name);
        Self {
            client,
            app: app.to_string(),
            name,
            url,
            json_fields: Arc::from(Vec::new()),
            choices: Arc::new(OnceCell::new()),
        }
    }

    /// Declare extra fields whose values are kept verbatim on records
    pub fn with_json_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Collection URL, without a trailing slash
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json_fields(&self) -> &[String] {
        &self.json_fields
    }

    pub(crate) fn client(&self) -> &AciClient {
        &self.client
    }

    /// Every record in the collection
    pub fn all(&self, options: ListOptions) -> Result<RecordSet, AciError> {
        self.records(Vec::new(), &options)
    }

    /// Records matching `filters`
    ///
    /// With strict filters enabled, the filter names are checked against the
    /// OpenAPI document before any listing call is made.
    pub async fn filter(
        &self,
        filters: &[(&str, &str)],
        options: ListOptions,
    ) -> Result<RecordSet, AciError> {
        if filters.is_empty() {
            return Err(AciError::InvalidRequest(
                "filter requires at least one filter; use all() instead".to_string(),
            ));
        }
        let filters = to_params(filters);
        if options.strict_filters.unwrap_or(self.client.config().strict_filters) {
            self.validate_filters(&filters).await?;
        }
        self.records(filters, &options)
    }

    /// Fetch one record by key; `None` when the server answers 404
    pub async fn get(&self, key: impl ToString) -> Result<Option<Record>, AciError> {
        let request = self.client.request(&self.url).with_key(key);
        let mut values = Box::pin(request.get(None));
        match values.try_next().await {
            Ok(value) => Ok(value.map(|value| Record::wrap(value, &self.client, Some(self)))),
            Err(AciError::NotFound { url }) => {
                debug!("No record at {}", url);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// The single record matching `filters`
    ///
    /// Fails with [`AciError::InvalidRequest`] when more than one matches.
    pub async fn get_by(&self, filters: &[(&str, &str)]) -> Result<Option<Record>, AciError> {
        let mut records = self.filter(filters, ListOptions::default()).await?;
        let Some(record) = records.try_next().await? else {
            return Ok(None);
        };
        if records.try_next().await?.is_some() {
            return Err(AciError::InvalidRequest(format!(
                "get_by() returned more than one result from {}; \
                 use filter() or narrow the filters",
                self.url
            )));
        }
        Ok(Some(record))
    }

    /// Create one object
    pub async fn create(&self, data: &Value) -> Result<Record, AciError> {
        let created = self.client.request(&self.url).post(data).await?;
        Ok(Record::wrap(created, &self.client, Some(self)))
    }

    /// Create several objects in one call
    pub async fn create_many(&self, data: &[Value]) -> Result<Vec<Record>, AciError> {
        let created = self
            .client
            .request(&self.url)
            .post(&Value::Array(data.to_vec()))
            .await?;
        Ok(self.wrap_all(created))
    }

    /// Bulk-PATCH the local changes of `records`
    ///
    /// Records without changes are left out; when none has any, no call is
    /// made and the result is empty.
    pub async fn update(&self, records: &[Record]) -> Result<Vec<Record>, AciError> {
        let mut objects = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id().cloned().ok_or_else(|| {
                AciError::InvalidRequest(format!("record {} has no id", record))
            })?;
            let updates = record.updates();
            if updates.is_empty() {
                continue;
            }
            let mut object = Map::new();
            object.insert("id".to_string(), id);
            object.extend(updates);
            objects.push(Value::Object(object));
        }
        if objects.is_empty() {
            debug!("No changes to update at {}", self.url);
            return Ok(Vec::new());
        }
        self.update_values(objects).await
    }

    /// Bulk-PATCH raw objects; each must carry an `id`
    pub async fn update_values(&self, objects: Vec<Value>) -> Result<Vec<Record>, AciError> {
        for object in &objects {
            require_id(object)?;
        }
        debug!("Updating {} object(s) at {}", objects.len(), self.url);
        let updated = self
            .client
            .request(&self.url)
            .patch(&Value::Array(objects))
            .await?;
        Ok(self.wrap_all(updated))
    }

    /// Bulk-delete by id
    pub async fn delete(&self, ids: &[u64]) -> Result<bool, AciError> {
        let body: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        self.bulk_delete(body).await
    }

    /// Bulk-delete records; each must carry an `id`
    pub async fn delete_records(&self, records: &[Record]) -> Result<bool, AciError> {
        let body = records
            .iter()
            .map(|record| {
                record
                    .id()
                    .map(|id| json!({ "id": id }))
                    .ok_or_else(|| AciError::InvalidRequest(format!("record {} has no id", record)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.bulk_delete(body).await
    }

    /// Choice values per field, from the OPTIONS document
    ///
    /// Fetched once per endpoint and cached.
    pub async fn choices(&self) -> Result<Map<String, Value>, AciError> {
        let choices = self
            .choices
            .get_or_try_init(|| self.fetch_choices())
            .await?;
        Ok(choices.clone())
    }

    /// Number of records matching `filters`
    pub async fn count(&self, filters: &[(&str, &str)]) -> Result<u64, AciError> {
        self.client
            .request(&self.url)
            .with_filters(to_params(filters))
            .get_count()
            .await
    }

    fn records(
        &self,
        filters: Vec<(String, String)>,
        options: &ListOptions,
    ) -> Result<RecordSet, AciError> {
        if options.offset.is_some() && options.limit.unwrap_or(0) == 0 {
            return Err(AciError::InvalidRequest(
                "offset requires a positive limit".to_string(),
            ));
        }
        let request = self
            .client
            .list_request(&self.url)
            .with_filters(filters)
            .with_limit(options.limit)
            .with_offset(options.offset);
        Ok(RecordSet::new(self.clone(), request))
    }

    async fn validate_filters(&self, filters: &[(String, String)]) -> Result<(), AciError> {
        let openapi = self.client.openapi().await?;
        let path = format!("{}/{}/{}/", self.client.base_path(), self.app, self.name);

        let Some(parameters) = openapi
            .get("paths")
            .and_then(|paths| paths.get(&path))
            .and_then(|route| route.get("get"))
            .and_then(|get| get.get("parameters"))
            .and_then(Value::as_array)
        else {
            return Err(AciError::ParameterValidation(vec![format!(
                "no GET definition for {} in the OpenAPI document",
                path
            )]));
        };

        let allowed: Vec<&str> = parameters
            .iter()
            .filter_map(|parameter| parameter.get("name").and_then(Value::as_str))
            .collect();
        let mut errors = Vec::new();
        for (name, _) in filters {
            if !allowed.contains(&name.as_str()) {
                errors.push(format!("'{}' is not allowed as a filter on {}", name, path));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AciError::ParameterValidation(errors))
        }
    }

    async fn fetch_choices(&self) -> Result<Map<String, Value>, AciError> {
        let options = self.client.request(&self.url).options().await?;
        let actions = options.get("actions");
        let Some(fields) = actions
            .and_then(|actions| actions.get("POST").or_else(|| actions.get("PUT")))
            .and_then(Value::as_object)
        else {
            warn!("OPTIONS response for {} has no POST or PUT actions", self.url);
            return Err(AciError::Api(format!(
                "unexpected OPTIONS response format at {}",
                self.url
            )));
        };

        Ok(fields
            .iter()
            .filter_map(|(name, field)| {
                field
                    .get("choices")
                    .map(|choices| (name.clone(), choices.clone()))
            })
            .collect())
    }

    async fn bulk_delete(&self, body: Vec<Value>) -> Result<bool, AciError> {
        debug!("Deleting {} object(s) at {}", body.len(), self.url);
        self.client
            .request(&self.url)
            .delete(Some(&Value::Array(body)))
            .await
    }

    fn wrap_all(&self, values: Value) -> Vec<Record> {
        match values {
            Value::Array(items) => items
                .into_iter()
                .map(|item| Record::wrap(item, &self.client, Some(self)))
                .collect(),
            other => vec![Record::wrap(other, &self.client, Some(self))],
        }
    }
}

/// Action route below a single record, e.g. `{devices}/1/napalm/`
#[derive(Debug, Clone)]
pub struct DetailEndpoint {
    client: AciClient,
    url: String,
    read_only: bool,
}

impl DetailEndpoint {
    pub(crate) fn new(parent: &Record, parent_url: String, name: &str, read_only: bool) -> Self {
        Self {
            client: parent.client().clone(),
            url: format!("{}{}/", Request::normalize_url(&parent_url), name),
            read_only,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// GET every object behind the route, following pagination
    pub async fn list(&self, params: &[(&str, &str)]) -> Result<Vec<Value>, AciError> {
        self.client
            .request(&self.url)
            .get(Some(to_params(params)))
            .try_collect()
            .await
    }

    /// POST to the route, e.g. to allocate the next free address
    pub async fn create(&self, data: &Value) -> Result<Value, AciError> {
        if self.read_only {
            return Err(AciError::InvalidRequest(
                "Writes are not supported for this endpoint.".to_string(),
            ));
        }
        self.client.request(&self.url).post(data).await
    }
}
