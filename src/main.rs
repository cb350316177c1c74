use std::{process, sync::Arc};

use rowcache::{
    application::{
        crud::{CrudManager, FindOptions},
        error::AppError,
        pagination::PageRequest,
        repos::Store,
    },
    cache::{self, CacheConfig, CacheCoordinator},
    config::{self, Command, FindOneArgs, ListArgs},
    domain::{
        model::ModelRegistry,
        query::{Filter, OrderBy},
        record::RecordId,
    },
    infra::{db::PostgresStore, error::InfraError, telemetry},
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let registry = Arc::new(settings.registry()?);
    let command = cli_args.command.unwrap_or(Command::Check);

    match command {
        Command::Check => run_check(&settings, &registry),
        Command::FindOne(args) => run_find_one(&settings, registry, args).await,
        Command::List(args) => run_list(&settings, registry, args).await,
    }
}

fn run_check(settings: &config::Settings, registry: &ModelRegistry) -> Result<(), AppError> {
    for model in registry.models() {
        info!(
            target = "rowcache::check",
            model = %model.name,
            table = model.table_name(),
            cached = model.cache_ttl().is_some(),
            relations = model.relations.len(),
            "Model registered"
        );
    }
    info!(
        target = "rowcache::check",
        models = registry.len(),
        cache_enabled = settings.cache.enabled,
        database_configured = settings.database.url.is_some(),
        "Configuration is valid"
    );
    Ok(())
}

async fn run_find_one(
    settings: &config::Settings,
    registry: Arc<ModelRegistry>,
    args: FindOneArgs,
) -> Result<(), AppError> {
    let manager = build_manager(settings, registry, &args.model).await?;

    let mut options = FindOptions::default();
    if !args.select.is_empty() {
        options = options.select(args.select);
    }
    for relation in args.include {
        options = options.include(relation);
    }

    let Ok(id) = args.id.parse::<RecordId>();
    let row = manager
        .find_one(id, &options)
        .await?
        .ok_or(AppError::NotFound)?;
    print_json(&row)
}

async fn run_list(
    settings: &config::Settings,
    registry: Arc<ModelRegistry>,
    args: ListArgs,
) -> Result<(), AppError> {
    let manager = build_manager(settings, registry, &args.model).await?;

    let filter = match args.where_json.as_deref() {
        Some(json) => serde_json::from_str::<Filter>(json)
            .map_err(|err| AppError::validation(format!("invalid --where filter: {err}")))?,
        None => Filter::All,
    };
    let page = PageRequest::new(args.page, args.per_page)
        .map_err(|err| AppError::validation(err.to_string()))?;

    let mut options = FindOptions::default().order_by(args.order_by.iter().map(|column| {
        match column.strip_prefix('-') {
            Some(column) => OrderBy::desc(column),
            None => OrderBy::asc(column),
        }
    }));
    if !args.select.is_empty() {
        options = options.select(args.select);
    }

    let result = manager.find_list(filter, page, &options).await?;
    print_json(&result)
}

async fn build_manager(
    settings: &config::Settings,
    registry: Arc<ModelRegistry>,
    model: &str,
) -> Result<CrudManager, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresStore::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(pool));

    let coordinator = Arc::new(CacheCoordinator::new(
        registry,
        CacheConfig::from(&settings.cache),
    ));
    if cache::spawn_sweeper(Arc::clone(&coordinator)).is_some() {
        info!(
            target = "rowcache::cache",
            interval = ?settings.cache.sweep_interval,
            "Cache sweeper started"
        );
    }
    Ok(CrudManager::new(model, store, coordinator)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::validation(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
