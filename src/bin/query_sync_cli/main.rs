//! query-sync-cli: drive one cached resource service against a REST backend.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod io;

use std::sync::Arc;

use clap::Parser;
use query_sync::config::{self, LoadError};
use query_sync::telemetry::{self, TelemetryError};
use query_sync::{
    CacheStore, FetchError, HttpTransport, MutationError, RecordId, ResourceService,
    ResourceServiceFactory, TransportError,
};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use args::{Cli, Commands};
use io::{params_value, print_json, read_body};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("base URL is required (use --base-url or QUERY_SYNC__TRANSPORT__BASE_URL)")]
    MissingBaseUrl,
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("failed to read input file {path}: {source}")]
    InputFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let settings = config::load(cli.config_file.as_deref(), &cli.overrides)?;
    telemetry::init(&settings.logging)?;

    let base_url = settings.transport.base_url.ok_or(CliError::MissingBaseUrl)?;
    let transport = HttpTransport::new(base_url.as_str(), settings.transport.timeout)?;
    let store = CacheStore::new(settings.cache);
    let factory = ResourceServiceFactory::new(store.clone(), Arc::new(transport));

    let endpoint = cli.endpoint.unwrap_or_else(|| cli.resource.clone());
    let service = factory.create(&cli.resource, &endpoint).with_id_field(&cli.id_field);
    info!(resource = service.resource(), endpoint = service.endpoint(), "Resource service ready");

    let result = run(&service, cli.command).await;
    store.teardown();
    result
}

async fn run(service: &ResourceService, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::List { params } => {
            let page = service.list(&params_value(params)).await?;
            print_json(&page)
        }
        Commands::Pages { params, max_pages } => {
            let mut state = service.cursor(&params_value(params));
            let mut fetched = 0;
            while fetched < max_pages && service.has_more(&state) {
                service.next_page(&mut state).await?;
                fetched += 1;
            }
            print_json(&json!({
                "pages": state.pages(),
                "items": state.item_count(),
                "hasMore": service.has_more(&state),
            }))
        }
        Commands::Get { id } => {
            let record = service.detail(&RecordId::from(id)).await?;
            print_json(&record)
        }
        Commands::Create { body } => {
            let record = service.create(&read_body(body)?).await?;
            print_json(&record)
        }
        Commands::Update { id, body } => {
            let record = service.update(&RecordId::from(id), &read_body(body)?).await?;
            print_json(&record)
        }
        Commands::Patch { id, body } => {
            let record = service
                .partial_update(&RecordId::from(id), &read_body(body)?)
                .await?;
            print_json(&record)
        }
        Commands::Delete { id } => {
            service.remove(&RecordId::from(id.clone())).await?;
            print_json(&json!({ "deleted": id }))
        }
    }
}
