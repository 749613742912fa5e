//! SharePoint REST client implementing the provisioner's store contract.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use smartsite_provisioner::{
    AssetRef, FieldDefinition, FieldInfo, FieldUpdate, ItemFields, ListHandle, ListTemplate,
    SiteStore, StoreError, StoreResult,
};
use tracing::{debug, info};
use url::Url;

use crate::config::SpRestConfig;
use crate::error::Result;
use crate::odata::{
    ADD_FIELD_INTERNAL_NAME_HINT, Collection, Envelope, FieldEntity, FileEntity, ItemCountEntity,
    ListEntity, classify, field_schema_xml, item_payload, quote,
};

const VERBOSE: &str = "application/json;odata=verbose";
const LIST_SELECT: &str = "$select=Id,Title,BaseTemplate,ListItemEntityTypeFullName";

/// [`SiteStore`] over the `/_api/web/lists` REST endpoints.
#[derive(Debug, Clone)]
pub struct SpRestStore {
    config: Arc<SpRestConfig>,
    http_client: reqwest::Client,
}

impl SpRestStore {
    /// Create a store for the configured site.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: SpRestConfig) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    pub fn config(&self) -> &SpRestConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> StoreResult<Url> {
        self.config
            .api_url(endpoint)
            .map_err(|e| StoreError::invalid_request(e.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(&self.config.access_token)
            .header(ACCEPT, HeaderValue::from_static(VERBOSE))
    }

    fn json_request(&self, method: Method, url: Url, body: &Value) -> RequestBuilder {
        self.request(method, url)
            .header(CONTENT_TYPE, HeaderValue::from_static(VERBOSE))
            .body(body.to_string())
    }

    /// Send a request, turning non-success statuses into store errors.
    async fn send(&self, request: RequestBuilder, resource: &str) -> StoreResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify(status.as_u16(), &body, resource);
        debug!(status = status.as_u16(), resource, error = %err, "Request failed");
        Err(err)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, resource: &str) -> StoreResult<T> {
        let url = self.url(endpoint)?;
        let response = self.send(self.request(Method::GET, url), resource).await?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
        resource: &str,
    ) -> StoreResult<T> {
        let url = self.url(endpoint)?;
        let response = self
            .send(self.json_request(Method::POST, url, body), resource)
            .await?;
        decode(response).await
    }

    /// Partial update of an entity.
    async fn merge(&self, endpoint: &str, body: &Value, resource: &str) -> StoreResult<()> {
        let url = self.url(endpoint)?;
        let request = self
            .json_request(Method::POST, url, body)
            .header("X-HTTP-Method", "MERGE")
            .header("IF-MATCH", "*");
        self.send(request, resource).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> StoreResult<T> {
    response
        .json::<Envelope<T>>()
        .await
        .map(|envelope| envelope.d)
        .map_err(|e| StoreError::invalid_response(e.to_string()))
}

fn list_endpoint(list: &ListHandle) -> String {
    format!("web/lists(guid'{}')", list.id.trim_matches(['{', '}']))
}

fn handle(entity: ListEntity) -> ListHandle {
    ListHandle {
        id: entity.id,
        title: entity.title,
        template: entity.base_template,
        item_entity_type: entity.list_item_entity_type_full_name,
    }
}

#[async_trait]
impl SiteStore for SpRestStore {
    async fn get_list(&self, title: &str) -> StoreResult<ListHandle> {
        let endpoint = format!("web/lists/GetByTitle('{}')?{LIST_SELECT}", quote(title));
        let entity: ListEntity = self.get(&endpoint, &format!("list '{title}'")).await?;
        Ok(handle(entity))
    }

    async fn create_list(
        &self,
        title: &str,
        template: ListTemplate,
        description: &str,
    ) -> StoreResult<ListHandle> {
        let body = json!({
            "__metadata": { "type": "SP.List" },
            "AllowContentTypes": true,
            "BaseTemplate": template.id(),
            "ContentTypesEnabled": true,
            "Description": description,
            "Title": title,
        });
        let entity: ListEntity = self
            .post("web/lists", &body, &format!("list '{title}'"))
            .await?;
        info!(list = title, id = %entity.id, "List created on site");
        Ok(handle(entity))
    }

    async fn enable_versioning(&self, list: &ListHandle) -> StoreResult<()> {
        let body = json!({
            "__metadata": { "type": "SP.List" },
            "EnableVersioning": true,
        });
        self.merge(&list_endpoint(list), &body, &format!("list '{}'", list.title))
            .await
    }

    async fn list_fields(&self, list: &ListHandle) -> StoreResult<Vec<FieldInfo>> {
        let endpoint = format!(
            "{}/fields?$select=InternalName,Title,Indexed",
            list_endpoint(list)
        );
        let fields: Collection<FieldEntity> = self
            .get(&endpoint, &format!("fields of '{}'", list.title))
            .await?;

        Ok(fields
            .results
            .into_iter()
            .map(|f| FieldInfo {
                internal_name: f.internal_name,
                display_name: f.title,
                indexed: f.indexed,
            })
            .collect())
    }

    async fn create_field(&self, list: &ListHandle, field: &FieldDefinition) -> StoreResult<()> {
        let schema = field_schema_xml(field)?;
        let body = json!({
            "parameters": {
                "__metadata": { "type": "SP.XmlSchemaFieldCreationInformation" },
                "SchemaXml": schema,
                "Options": ADD_FIELD_INTERNAL_NAME_HINT,
            }
        });
        let resource = format!("field '{}/{}'", list.title, field.column.internal_name);
        let _: Value = self
            .post(
                &format!("{}/fields/CreateFieldAsXml", list_endpoint(list)),
                &body,
                &resource,
            )
            .await?;
        Ok(())
    }

    async fn update_field(
        &self,
        list: &ListHandle,
        field_name: &str,
        update: &FieldUpdate,
    ) -> StoreResult<()> {
        let mut body = Map::new();
        body.insert("__metadata".to_string(), json!({ "type": "SP.Field" }));
        if let Some(description) = &update.description {
            body.insert("Description".to_string(), json!(description));
        }
        if let Some(indexed) = update.indexed {
            body.insert("Indexed".to_string(), json!(indexed));
        }
        let body = Value::Object(body);

        let endpoint = format!(
            "{}/fields/getbyinternalnameortitle('{}')",
            list_endpoint(list),
            quote(field_name)
        );
        self.merge(&endpoint, &body, &format!("field '{}/{field_name}'", list.title))
            .await
    }

    async fn item_count(&self, list: &ListHandle) -> StoreResult<u64> {
        let endpoint = format!("{}?$select=ItemCount", list_endpoint(list));
        let entity: ItemCountEntity = self
            .get(&endpoint, &format!("list '{}'", list.title))
            .await?;
        Ok(entity.item_count)
    }

    async fn add_item(&self, list: &ListHandle, fields: &ItemFields) -> StoreResult<()> {
        let entity_type = list.item_entity_type.as_deref().ok_or_else(|| {
            StoreError::invalid_request(format!("list '{}' has no item entity type", list.title))
        })?;
        let body = item_payload(entity_type, fields);
        let _: Value = self
            .post(
                &format!("{}/items", list_endpoint(list)),
                &body,
                &format!("items of '{}'", list.title),
            )
            .await?;
        Ok(())
    }

    async fn first_file(&self, list: &ListHandle) -> StoreResult<Option<AssetRef>> {
        let endpoint = format!(
            "{}/RootFolder/Files?$select=Name,ServerRelativeUrl&$top=1",
            list_endpoint(list)
        );
        let files: Collection<FileEntity> = self
            .get(&endpoint, &format!("files of '{}'", list.title))
            .await?;

        Ok(files.results.into_iter().next().map(|f| AssetRef {
            name: f.name,
            url: f.server_relative_url,
        }))
    }

    async fn upload_file(
        &self,
        list: &ListHandle,
        file_name: &str,
        content: &[u8],
    ) -> StoreResult<AssetRef> {
        let endpoint = format!(
            "{}/RootFolder/Files/add(url='{}',overwrite=true)",
            list_endpoint(list),
            quote(file_name)
        );
        let url = self.url(&endpoint)?;
        let request = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .body(content.to_vec());

        let resource = format!("file '{}/{file_name}'", list.title);
        let response = self.send(request, &resource).await?;
        let file: FileEntity = decode(response).await?;
        info!(library = %list.title, url = %file.server_relative_url, "File uploaded");

        Ok(AssetRef {
            name: file.name,
            url: file.server_relative_url,
        })
    }
}
