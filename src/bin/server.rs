// Switchboard server binary
// Loads definitions, validates them against service contracts, and serves
// the /ui surface. Run with: cargo run --bin server

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use switchboard::capability::{CapabilityResolver, PolicyEvaluator};
use switchboard::config::Settings;
use switchboard::definitions::loader::DefinitionLoader;
use switchboard::definitions::registry::DefinitionRegistry;
use switchboard::definitions::validator::validate_definitions;
use switchboard::invoker::http::OpenApiInvoker;
use switchboard::invoker::sdk::SdkInvoker;
use switchboard::invoker::InvokerRegistry;
use switchboard::models::{CapabilitySet, RequestContext};
use switchboard::openapi::OpenApiIndex;
use switchboard::providers::{
    ActionProvider, FormProvider, LookupProvider, MenuProvider, PageProvider, SearchProvider,
};
use switchboard::server::{serve, AppState};
use switchboard::workflow::engine::WorkflowEngine;
use switchboard::workflow::postgres::PostgresWorkflowStore;
use switchboard::workflow::store::{InMemoryWorkflowStore, WorkflowStore};

#[derive(Parser, Debug)]
#[command(name = "switchboard-server", about = "Metadata-driven BFF server")]
struct Args {
    /// Configuration file (YAML/TOML); SWITCHBOARD_* env vars override
    #[arg(long, env = "SWITCHBOARD_CONFIG")]
    config: Option<String>,
}

/// Development-only evaluator granting every capability. A deployment wires
/// a real policy service behind [`PolicyEvaluator`] instead.
struct PermissiveEvaluator;

#[async_trait]
impl PolicyEvaluator for PermissiveEvaluator {
    async fn evaluate(&self, _rctx: &RequestContext) -> switchboard::Result<CapabilitySet> {
        Ok(CapabilitySet::wildcard())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("loading configuration")?;

    // definition pipeline: load -> index -> validate -> snapshot
    let loader = Arc::new(DefinitionLoader::new(settings.definitions.dirs.clone()));
    let definitions = loader.load_all().context("loading definitions")?;

    let spec_sources: Vec<_> = settings.services.iter().map(|s| s.spec_source()).collect();
    let index = OpenApiIndex::load(&spec_sources).context("loading service specs")?;
    info!(operations = index.len(), services = settings.services.len(), "service contracts indexed");

    let errors = validate_definitions(&definitions, &index);
    if !errors.is_empty() {
        for err in &errors {
            error!("{err}");
        }
        bail!("{} validation error(s), refusing to start", errors.len());
    }

    let registry = Arc::new(DefinitionRegistry::with_definitions(definitions));
    info!(checksum = %registry.checksum(), "definition registry ready");

    // invokers: HTTP transport first, SDK handlers second
    let client_configs = settings.services.iter().map(|s| s.client_config()).collect();
    let openapi_invoker =
        Arc::new(OpenApiInvoker::new(index, client_configs).context("building http invoker")?);
    let sdk_invoker = Arc::new(SdkInvoker::new());
    let mut invoker_registry = InvokerRegistry::new();
    invoker_registry.register(openapi_invoker.clone());
    invoker_registry.register(sdk_invoker);
    let invokers = Arc::new(invoker_registry);

    // workflow store: durable when a database is configured
    let store: Arc<dyn WorkflowStore> = match &settings.workflow.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("connecting to workflow database")?;
            let store = PostgresWorkflowStore::new(pool);
            store.ensure_schema().await.context("preparing workflow schema")?;
            info!("using postgres workflow store");
            Arc::new(store)
        }
        None => {
            warn!("no workflow database configured, instances are in-memory only");
            Arc::new(InMemoryWorkflowStore::new())
        }
    };

    let engine = Arc::new(
        WorkflowEngine::new(registry.clone(), store, invokers.clone())
            .with_chain_limit(settings.workflow.chain_limit),
    );

    warn!("capability evaluation is permissive; wire a policy evaluator for production");
    let capabilities = Arc::new(CapabilityResolver::new(
        Arc::new(PermissiveEvaluator),
        Duration::from_millis(settings.capabilities.ttl_ms),
        settings.capabilities.cache_capacity,
    ));

    let state = AppState {
        registry: registry.clone(),
        menu: Arc::new(MenuProvider::new(registry.clone())),
        pages: Arc::new(PageProvider::new(registry.clone(), invokers.clone())),
        forms: Arc::new(FormProvider::new(registry.clone(), invokers.clone())),
        actions: Arc::new(ActionProvider::new(registry.clone(), invokers.clone())),
        lookups: Arc::new(LookupProvider::new(
            registry.clone(),
            invokers.clone(),
            settings.lookups.cache_capacity,
        )),
        search: Arc::new(SearchProvider::new(
            registry.clone(),
            invokers.clone(),
            Duration::from_millis(settings.search.provider_timeout_ms),
        )),
        engine: engine.clone(),
        capabilities,
        loader,
        spec_sources: Arc::new(spec_sources),
        openapi_invoker,
    };

    // background timeout sweep; one instance failing never stops the loop
    let sweep_engine = engine.clone();
    let sweep_interval = Duration::from_millis(settings.workflow.sweep_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweep_engine.process_timeouts(&CancellationToken::new()).await {
                Ok(0) => {}
                Ok(count) => info!(count, "processed workflow timeouts"),
                Err(err) => error!(error = %err, "timeout sweep failed"),
            }
        }
    });

    let addr: SocketAddr = format!("{}:{}", settings.http.host, settings.http.port)
        .parse()
        .context("parsing listen address")?;
    serve(state, addr).await?;
    Ok(())
}
