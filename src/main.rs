use cohortix::cli::{Cli, Commands, ConfigAction};
use cohortix::config::Config;
use cohortix::embedding::{create_provider, DimensionAdvisor, EmbeddingCache};
use cohortix::error::{CohortixError, Result};
use cohortix::ingest::{ContextRecord, IngestOptions, IngestPipeline};
use cohortix::search::{FusedSearchEngine, SearchQuery};
use cohortix::storage::{PatientAttributes, SqliteStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One entry of the ingest file: the context record plus the structured
/// attributes seeded into the store for candidate narrowing
#[derive(Debug, Deserialize)]
struct PatientRecord {
    entity_id: String,
    context_text: String,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    age_bucket: Option<String>,
    #[serde(default)]
    conditions: Vec<String>,
    #[serde(default)]
    last_visit: Option<i64>,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();

    match cli.command {
        Commands::Ingest {
            file,
            profile,
            json,
        } => {
            cmd_ingest(cli.config, &file, profile, json)?;
        }
        Commands::Search { query, top_k, json } => {
            cmd_search(cli.config, &query, top_k, json)?;
        }
        Commands::Stats => {
            cmd_stats(cli.config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cohortix=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_ingest(
    config_path: Option<PathBuf>,
    file: &Path,
    profile: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;

    let content = std::fs::read_to_string(file).map_err(|e| CohortixError::Io {
        source: e,
        context: format!("Failed to read records file: {:?}", file),
    })?;
    let patients: Vec<PatientRecord> =
        serde_json::from_str(&content).map_err(|e| CohortixError::Json {
            source: e,
            context: format!("Failed to parse records file: {:?}", file),
        })?;

    let store = Arc::new(open_store(&config)?);
    let provider = create_provider(&config.provider)?;
    let advisor = Arc::new(DimensionAdvisor::new(config.provider.dimension));
    let cache = Arc::new(EmbeddingCache::new());

    // Seed structured attributes; the pipeline itself only sees
    // (entity_id, context_text)
    let attributes: Vec<PatientAttributes> = patients
        .iter()
        .map(|p| PatientAttributes {
            entity_id: p.entity_id.clone(),
            gender: p.gender.clone(),
            age_bucket: p.age_bucket.clone(),
            conditions: p.conditions.clone(),
            last_visit: p.last_visit,
        })
        .collect();
    store.upsert_patients(&attributes)?;

    let records: Vec<ContextRecord> = patients
        .into_iter()
        .map(|p| ContextRecord {
            entity_id: p.entity_id,
            context_text: p.context_text,
        })
        .collect();

    let pipeline = IngestPipeline::new(
        provider,
        store,
        cache,
        advisor,
        IngestOptions::from_config(&config.ingest, config.provider.probe_on_start),
    );

    let rt = tokio::runtime::Runtime::new().map_err(|e| CohortixError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    let report = rt.block_on(async {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received; finishing in-flight chunks");
                cancel_on_signal.store(true, Ordering::SeqCst);
            }
        });

        pipeline.run_with_cancel(records, cancel).await
    })?;

    if json {
        let rendered = serde_json::to_string_pretty(&report).map_err(|e| CohortixError::Json {
            source: e,
            context: "Failed to serialize ingest report".to_string(),
        })?;
        println!("{}", rendered);
    } else {
        println!("✓ Ingestion run {}", report.run_id);
        println!(
            "  {} succeeded ({} unchanged), {} failed, {} cache hits",
            report.succeeded,
            report.unchanged,
            report.failed(),
            report.cache_hits
        );
        println!(
            "  {} provider calls, {} retries, {}ms",
            report.provider_calls, report.retries, report.duration_ms
        );
        for failure in &report.failures {
            println!(
                "  ✗ {} [{}]: {}",
                failure.entity_id,
                failure.kind.as_str(),
                failure.message
            );
        }
    }

    Ok(())
}

fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, None)?;

    let store = Arc::new(open_store(&config)?);
    let provider = create_provider(&config.provider)?;

    // Pin the advisor to the provisioned width so a query embedded at a
    // different dimension is rejected, not silently ranked
    let dimension = config.provider.dimension.or(store.collection_dimension()?);
    let advisor = Arc::new(DimensionAdvisor::new(dimension));

    let engine = FusedSearchEngine::new(provider, store, advisor);
    let search_query = SearchQuery::new(query, top_k.unwrap_or(config.search.top_k));

    let rt = tokio::runtime::Runtime::new().map_err(|e| CohortixError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    let results = rt
        .block_on(engine.search(&search_query))
        .map_err(|e| CohortixError::Other(anyhow::anyhow!(e)))?;

    if json {
        let rendered = serde_json::to_string_pretty(&results).map_err(|e| CohortixError::Json {
            source: e,
            context: "Failed to serialize search results".to_string(),
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    if results.is_empty() {
        println!("No matching patients");
        return Ok(());
    }

    for result in results {
        let matched = if result.matched_predicates.is_empty() {
            String::from("no filters")
        } else {
            result
                .matched_predicates
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:>3}. {}  score={:.4}  [{}]",
            result.rank, result.entity_id, result.similarity_score, matched
        );
    }

    Ok(())
}

fn cmd_stats(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;
    let store = open_store(&config)?;
    let stats = store.stats()?;

    println!("Cohortix Store");
    println!("==============");
    println!("Patients:   {}", stats.patient_count);
    println!("Embeddings: {}", stats.embedding_count);
    match stats.dimension {
        Some(dim) => println!("Dimension:  {}", dim),
        None => println!("Dimension:  (not provisioned)"),
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| CohortixError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CohortixError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let data_dir = expand_path(&config.storage.data_dir)?;
    SqliteStore::new(&data_dir.join("store").join("cohortix.db"))
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'cohortix config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile);
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| CohortixError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| CohortixError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
