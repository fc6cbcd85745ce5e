use anyhow::{Result, Context};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

mod error;
pub mod pagination;

pub use error::ApiError;
use pagination::{paginate, Page, PageParams};

use crate::config::Configuration;
use crate::core::{DiscoveryRequest, TermRecord, TermSearch};
use crate::import::{GraphStoreImporter, ImportJob, TaskDispatcher};
use crate::knowledge_graph::{
    Dataset, DatasetId, DatasetRegistry, HttpSparqlExecutor, ListQuery, NewDataset, StoreDescriptor,
};

const DATABASE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";

/// Pattern for database names accepted on the store server.
pub fn database_name_pattern() -> Result<Regex> {
    Regex::new(DATABASE_NAME_PATTERN).context("Invalid database name pattern")
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DatasetRegistry>,
    pub search: Arc<TermSearch>,
    pub dispatcher: TaskDispatcher,
    pub page_size: usize,
    pub max_page_size: usize,
    pub database_name: Regex,
}

impl AppState {
    pub fn from_config(config: &Configuration) -> Result<Self> {
        let executor = HttpSparqlExecutor::new(&config.store.base_url)
            .context("Failed to create SPARQL client")?;
        let importer = GraphStoreImporter::new(
            &config.store.base_url,
            &config.catalog.base_url,
            config.catalog.import_timeout,
        )?;

        let search = TermSearch::new(Arc::new(executor))
            .with_row_limit(config.store.row_limit)
            .with_timeout(config.store.query_timeout());

        Ok(Self {
            registry: Arc::new(DatasetRegistry::new()),
            search: Arc::new(search),
            dispatcher: TaskDispatcher::new(Arc::new(importer)),
            page_size: config.server.page_size,
            max_page_size: config.server.max_page_size,
            database_name: database_name_pattern()?,
        })
    }

    fn page(&self, limit: Option<usize>, offset: Option<usize>) -> PageParams {
        PageParams::new(limit, offset, self.page_size, self.max_page_size)
    }
}

/// Routes are served both with and without the trailing slash the data grid uses.
pub fn router(state: AppState) -> Router {
    let routes: [(&str, MethodRouter<AppState>); 9] = [
        ("/datasets", get(list_datasets)),
        ("/datasets/{id}", get(get_dataset).delete(delete_dataset)),
        ("/datasets/create_existing", post(create_existing)),
        ("/datasets/create_url", post(create_url)),
        ("/datasets/create_lodc", post(create_lodc)),
        ("/datasets/create_sparql", post(create_sparql)),
        ("/datadiscovery", get(list_discoveries)),
        ("/datadiscovery/{id}", get(get_discovery)),
        ("/datadiscovery/{id}/terms", get(search_terms)),
    ];

    routes
        .into_iter()
        .fold(Router::new(), |app, (path, handler)| {
            app.route(path, handler.clone())
                .route(&format!("{}/", path), handler)
        })
        .with_state(state)
}

pub async fn serve(config: &Configuration) -> Result<()> {
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!("Listening on {} (store: {})", config.server.bind, config.store.base_url);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Query parameters of the discovery endpoints, named as the data grid sends them.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryParams {
    #[serde(rename = "filterField")]
    pub filter_field: Option<String>,
    #[serde(rename = "filterOperator")]
    pub filter_operator: Option<String>,
    #[serde(rename = "filterValue")]
    pub filter_value: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl DiscoveryParams {
    fn request(&self) -> DiscoveryRequest {
        DiscoveryRequest {
            filter_field: self.filter_field.clone(),
            filter_operator: self.filter_operator.clone(),
            filter_value: self.filter_value.clone(),
            filter_search: self.search.clone(),
        }
    }

    /// `path` plus the filter parameters, for pagination links.
    fn link_base(&self, path: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        let pairs = [
            ("filterField", &self.filter_field),
            ("filterOperator", &self.filter_operator),
            ("filterValue", &self.filter_value),
            ("search", &self.search),
            ("ordering", &self.ordering),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }

        let query = query.finish();
        if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DatasetListParams {
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// A dataset together with the terms matched in it.
#[derive(Debug, Serialize)]
pub struct DiscoveryEntry {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub terms: Vec<TermRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExisting {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub database: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFromSource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpoint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub endpoint: String,
}

async fn list_datasets(
    State(state): State<AppState>,
    Query(params): Query<DatasetListParams>,
) -> Json<Page<Dataset>> {
    let datasets = state
        .registry
        .list(&ListQuery {
            search: params.search.clone(),
            ordering: params.ordering.clone(),
        })
        .await;

    Json(paginate(datasets, state.page(params.limit, params.offset), "/datasets/"))
}

async fn get_dataset(
    State(state): State<AppState>,
    Path(id): Path<DatasetId>,
) -> Result<Json<Dataset>, ApiError> {
    state
        .registry
        .get(id)
        .await
        .map(Json)
        .ok_or(ApiError::DatasetNotFound(id))
}

async fn delete_dataset(
    State(state): State<AppState>,
    Path(id): Path<DatasetId>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .delete(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ApiError::DatasetNotFound(id))
}

async fn create_existing(
    State(state): State<AppState>,
    Json(body): Json<CreateExisting>,
) -> Result<(StatusCode, Json<Dataset>), ApiError> {
    let database = body.database.trim();
    if !state.database_name.is_match(database) {
        return Err(ApiError::BadRequest(format!("Invalid database name: {:?}", body.database)));
    }

    let dataset = state
        .registry
        .create(NewDataset {
            name: body.name,
            description: body.description,
            source: format!("existing:{}", database),
            store: Some(StoreDescriptor::Database(database.to_string())),
        })
        .await;

    Ok((StatusCode::CREATED, Json(dataset)))
}

async fn create_url(
    State(state): State<AppState>,
    Json(body): Json<CreateFromSource>,
) -> Result<(StatusCode, Json<Dataset>), ApiError> {
    let url = parse_http_url(&body.source)?;

    let dataset = state
        .registry
        .create(NewDataset {
            name: body.name,
            description: body.description,
            source: format!("url:{}", url),
            store: None,
        })
        .await;

    if let Some(database) = dataset.database() {
        state.dispatcher.dispatch(
            ImportJob::Url {
                url: url.clone(),
                dataset_id: dataset.id,
                database: database.to_string(),
            },
            format!("Import URL dataset {}", url),
        );
    }

    Ok((StatusCode::CREATED, Json(dataset)))
}

async fn create_lodc(
    State(state): State<AppState>,
    Json(body): Json<CreateFromSource>,
) -> Result<(StatusCode, Json<Dataset>), ApiError> {
    let catalog_id = body.source.trim().to_string();
    if catalog_id.is_empty() {
        return Err(ApiError::BadRequest("Catalog id must not be empty".to_string()));
    }

    let dataset = state
        .registry
        .create(NewDataset {
            name: body.name,
            description: body.description,
            source: format!("lodc:{}", catalog_id),
            store: None,
        })
        .await;

    if let Some(database) = dataset.database() {
        state.dispatcher.dispatch(
            ImportJob::Lodc {
                catalog_id: catalog_id.clone(),
                dataset_id: dataset.id,
                database: database.to_string(),
            },
            format!("Import LODC dataset {}", catalog_id),
        );
    }

    Ok((StatusCode::CREATED, Json(dataset)))
}

async fn create_sparql(
    State(state): State<AppState>,
    Json(body): Json<CreateEndpoint>,
) -> Result<(StatusCode, Json<Dataset>), ApiError> {
    let endpoint = parse_http_url(&body.endpoint)?;

    let dataset = state
        .registry
        .create(NewDataset {
            name: body.name,
            description: body.description,
            source: format!("sparql:{}", endpoint),
            store: Some(StoreDescriptor::Endpoint(endpoint)),
        })
        .await;

    Ok((StatusCode::CREATED, Json(dataset)))
}

async fn list_discoveries(
    State(state): State<AppState>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<Page<DiscoveryEntry>>, ApiError> {
    let datasets = state
        .registry
        .list(&ListQuery {
            search: None,
            ordering: params.ordering.clone(),
        })
        .await;

    let page = paginate(
        datasets,
        state.page(params.limit, params.offset),
        &params.link_base("/datadiscovery/"),
    );

    let request = params.request();
    let mut results = Vec::with_capacity(page.results.len());
    for dataset in page.results {
        let terms = state.search.discover(&dataset, &request).await?;
        results.push(DiscoveryEntry { dataset, terms });
    }

    Ok(Json(Page {
        count: page.count,
        next: page.next,
        previous: page.previous,
        results,
    }))
}

async fn get_discovery(
    State(state): State<AppState>,
    Path(id): Path<DatasetId>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<DiscoveryEntry>, ApiError> {
    let dataset = state.registry.get(id).await.ok_or(ApiError::DatasetNotFound(id))?;
    let terms = state.search.discover(&dataset, &params.request()).await?;

    Ok(Json(DiscoveryEntry { dataset, terms }))
}

async fn search_terms(
    State(state): State<AppState>,
    Path(id): Path<DatasetId>,
    Query(params): Query<DiscoveryParams>,
) -> Result<Json<Page<TermRecord>>, ApiError> {
    let dataset = state.registry.get(id).await.ok_or(ApiError::DatasetNotFound(id))?;
    let mut terms = state.search.discover(&dataset, &params.request()).await?;

    match params.ordering.as_deref() {
        Some("term") => terms.sort_by(|a, b| a.term.cmp(&b.term)),
        Some("-term") => terms.sort_by(|a, b| b.term.cmp(&a.term)),
        Some(other) => debug!("Ignoring unsupported term ordering {}", other),
        None => {}
    }

    let path = format!("/datadiscovery/{}/terms/", id);
    Ok(Json(paginate(
        terms,
        state.page(params.limit, params.offset),
        &params.link_base(&path),
    )))
}

fn parse_http_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid URL {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ApiError::BadRequest(format!("Unsupported URL scheme: {}", scheme))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::tests::{results_json, FakeExecutor};
    use crate::import::tests::recording_dispatcher;
    use crate::knowledge_graph::ExecutionError;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn app_with(executor: Arc<FakeExecutor>) -> (Router, mpsc::UnboundedReceiver<ImportJob>) {
        let (dispatcher, jobs) = recording_dispatcher(false);
        let state = AppState {
            registry: Arc::new(DatasetRegistry::new()),
            search: Arc::new(TermSearch::new(executor)),
            dispatcher,
            page_size: 20,
            max_page_size: 100,
            database_name: database_name_pattern().unwrap(),
        };
        (router(state), jobs)
    }

    fn alice_knows_bob() -> Arc<FakeExecutor> {
        Arc::new(FakeExecutor::returning(results_json(&[("ex:Alice", "ex:knows", "ex:Bob")])))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_civic(app: &Router) -> Value {
        let (status, dataset) = send(
            app,
            Method::POST,
            "/datasets/create_existing/",
            Some(json!({"name": "civic-data", "database": "civic"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        dataset
    }

    #[tokio::test]
    async fn test_search_terms_returns_projected_page() {
        let (app, _jobs) = app_with(alice_knows_bob());
        let dataset = create_civic(&app).await;
        assert_eq!(dataset["source"], "existing:civic");
        assert_eq!(dataset["store"], json!({"kind": "database", "location": "civic"}));

        let (status, page) = send(&app, Method::GET, "/datadiscovery/1/terms/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["count"], 1);
        assert_eq!(page["results"][0]["dataset_id"], 1);
        assert_eq!(page["results"][0]["dataset_name"], "civic-data");
        assert_eq!(page["results"][0]["term"], "ex:Alice ex:knows ex:Bob");
        assert!(page["results"][0]["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_filter_returns_empty_without_querying() {
        let executor = alice_knows_bob();
        let (app, _jobs) = app_with(executor.clone());
        create_civic(&app).await;

        let (status, page) = send(
            &app,
            Method::GET,
            "/datadiscovery/1/terms/?filterField=name&filterOperator=contains&filterValue=Bob",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["count"], 0);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_terms_filter_reaches_executor() {
        let executor = alice_knows_bob();
        let (app, _jobs) = app_with(executor.clone());
        create_civic(&app).await;

        let (status, _) = send(
            &app,
            Method::GET,
            "/datadiscovery/1/terms/?filterField=terms&filterOperator=contains&filterValue=Bob&search=ignored",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let queries = executor.queries.lock().unwrap();
        assert!(queries[0].0.contains("CONTAINS(str(?o), \"Bob\")"));
    }

    #[tokio::test]
    async fn test_execution_failure_is_empty_ok() {
        let (app, _jobs) = app_with(Arc::new(FakeExecutor::with(|| {
            Err(ExecutionError::Rejected { status: 500, body: "boom".to_string() })
        })));
        create_civic(&app).await;

        let (status, page) = send(&app, Method::GET, "/datadiscovery/1/terms/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["results"], json!([]));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_server_error() {
        let (app, _jobs) = app_with(Arc::new(FakeExecutor::returning("{}".to_string())));
        create_civic(&app).await;

        let (status, body) = send(&app, Method::GET, "/datadiscovery/1/terms/", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_not_found() {
        let (app, _jobs) = app_with(alice_knows_bob());

        let (status, _) = send(&app, Method::GET, "/datadiscovery/99/terms/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/datasets/99/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_database_name_pattern() {
        let pattern = database_name_pattern().unwrap();
        for name in ["civic", "kg_7", "civic-data.v2"] {
            assert!(pattern.is_match(name), "{}", name);
        }
        for name in ["", "../etc", "_civic", "civic data", "civic/x"] {
            assert!(!pattern.is_match(name), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_get_discovery_flattens_dataset_with_terms() {
        let (app, _jobs) = app_with(alice_knows_bob());
        create_civic(&app).await;

        let (status, entry) = send(&app, Method::GET, "/datadiscovery/1/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(entry["id"], 1);
        assert_eq!(entry["name"], "civic-data");
        assert_eq!(entry["source"], "existing:civic");
        assert_eq!(entry["store"], json!({"kind": "database", "location": "civic"}));
        assert!(entry.get("dataset").is_none());
        assert_eq!(entry["terms"][0]["term"], "ex:Alice ex:knows ex:Bob");
        assert_eq!(entry["terms"][0]["dataset_id"], 1);

        let (status, _) = send(&app, Method::GET, "/datadiscovery/42/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_routes_match_without_trailing_slash() {
        let (app, _jobs) = app_with(alice_knows_bob());
        let (status, _) = send(
            &app,
            Method::POST,
            "/datasets/create_existing",
            Some(json!({"name": "civic-data", "database": "civic"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        for uri in ["/datasets", "/datasets/1", "/datadiscovery", "/datadiscovery/1", "/datadiscovery/1/terms"] {
            let (status, _) = send(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
        }

        let (_, page) = send(&app, Method::GET, "/datadiscovery/1/terms?filterField=terms&filterOperator=contains&filterValue=Bob", None).await;
        assert_eq!(page["count"], 1);
    }

    #[tokio::test]
    async fn test_huge_offset_yields_empty_page() {
        let (app, _jobs) = app_with(alice_knows_bob());
        create_civic(&app).await;

        for uri in [
            "/datasets/?offset=18446744073709551615",
            "/datadiscovery/?offset=18446744073709551615",
            "/datadiscovery/1/terms/?offset=18446744073709551615",
        ] {
            let (status, page) = send(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(page["results"], json!([]));
            assert_eq!(page["next"], Value::Null);
        }
    }

    #[tokio::test]
    async fn test_discovery_list_attaches_terms_to_each_dataset() {
        let (app, _jobs) = app_with(alice_knows_bob());
        create_civic(&app).await;
        send(
            &app,
            Method::POST,
            "/datasets/create_existing/",
            Some(json!({"name": "wiki", "database": "wiki"})),
        )
        .await;

        let (status, page) = send(&app, Method::GET, "/datadiscovery/?ordering=name&limit=1", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["count"], 2);
        assert_eq!(page["results"][0]["name"], "civic-data");
        assert_eq!(page["results"][0]["terms"][0]["term"], "ex:Alice ex:knows ex:Bob");
        assert_eq!(page["next"], "/datadiscovery/?ordering=name&limit=1&offset=1");
    }

    #[tokio::test]
    async fn test_create_url_dispatches_import() {
        let (app, mut jobs) = app_with(alice_knows_bob());

        let (status, dataset) = send(
            &app,
            Method::POST,
            "/datasets/create_url/",
            Some(json!({"name": "civic", "source": "https://example.org/civic.ttl"})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(dataset["source"], "url:https://example.org/civic.ttl");
        assert_eq!(
            jobs.recv().await,
            Some(ImportJob::Url {
                url: Url::parse("https://example.org/civic.ttl").unwrap(),
                dataset_id: 1,
                database: "kg_1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_create_lodc_dispatches_import() {
        let (app, mut jobs) = app_with(alice_knows_bob());

        let (status, dataset) = send(
            &app,
            Method::POST,
            "/datasets/create_lodc/",
            Some(json!({"name": "dbpedia", "source": "dbpedia"})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(dataset["source"], "lodc:dbpedia");
        assert!(matches!(jobs.recv().await, Some(ImportJob::Lodc { ref catalog_id, .. }) if catalog_id == "dbpedia"));
    }

    #[tokio::test]
    async fn test_invalid_sources_are_bad_requests() {
        let (app, _jobs) = app_with(alice_knows_bob());

        let cases = [
            ("/datasets/create_url/", json!({"name": "x", "source": "not a url"})),
            ("/datasets/create_url/", json!({"name": "x", "source": "ftp://example.org/a.ttl"})),
            ("/datasets/create_lodc/", json!({"name": "x", "source": "  "})),
            ("/datasets/create_existing/", json!({"name": "x", "database": "../etc"})),
            ("/datasets/create_sparql/", json!({"name": "x", "endpoint": "file:///tmp/x"})),
        ];

        for (uri, body) in cases {
            let (status, _) = send(&app, Method::POST, uri, Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_create_sparql_endpoint_dataset() {
        let (app, _jobs) = app_with(alice_knows_bob());

        let (status, dataset) = send(
            &app,
            Method::POST,
            "/datasets/create_sparql/",
            Some(json!({"name": "wikidata", "endpoint": "https://query.wikidata.org/sparql"})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(dataset["store"]["kind"], "endpoint");
        assert_eq!(dataset["store"]["location"], "https://query.wikidata.org/sparql");
    }

    #[tokio::test]
    async fn test_dataset_list_and_delete() {
        let (app, _jobs) = app_with(alice_knows_bob());
        create_civic(&app).await;

        let (_, page) = send(&app, Method::GET, "/datasets/?search=civic", None).await;
        assert_eq!(page["count"], 1);

        let (status, _) = send(&app, Method::DELETE, "/datasets/1/", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::DELETE, "/datasets/1/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_link_base_encodes_filters() {
        let params = DiscoveryParams {
            filter_field: Some("terms".to_string()),
            filter_value: Some("a b&c".to_string()),
            ..Default::default()
        };

        assert_eq!(
            params.link_base("/datadiscovery/"),
            "/datadiscovery/?filterField=terms&filterValue=a+b%26c"
        );
    }
}
