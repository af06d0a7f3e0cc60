use std::cell::RefCell;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kforge_core::{Gvk, SchemaError};
use kforge_persist::{SchemaCacheStore, SqliteSchemaCache};
use kforge_schema::{
    DocumentSource, FileSource, IndexerOptions, LoadSummary, ResolutionStrategy, SchemaIndexer, DEFAULT_FLATTEN_DEPTH,
    DEFAULT_MAX_REF_DEPTH,
};
use kforge_search::{ResourceSearch, SearchOpts};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kforgectl", version, about = "Browse and resolve Kubernetes resource schemas")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Path to a `_definitions.json` document
    #[arg(long = "definitions", env = "KFORGE_DEFINITIONS", global = true)]
    definitions: Option<PathBuf>,

    /// Origin tag attached to every indexed resource
    #[arg(long = "source", global = true, default_value = "kubernetes")]
    source: String,

    /// Cache the raw document under this version tag (e.g. the cluster's resourceVersion)
    #[arg(long = "version-tag", global = true)]
    version_tag: Option<String>,

    #[arg(long = "max-ref-depth", global = true, default_value_t = DEFAULT_MAX_REF_DEPTH)]
    max_ref_depth: usize,

    /// Resolve every definition right after loading
    #[arg(long = "eager", global = true, action = ArgAction::SetTrue)]
    eager: bool,

    #[arg(long = "load-timeout-secs", global = true, default_value_t = 30)]
    load_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every indexed kind
    Kinds,
    /// Resolve all versions of a kind
    Versions { kind: String },
    /// Resolve one resource schema
    Get {
        /// GVK key, e.g. "v1/Pod", "core/v1/Pod" or "apps/v1/Deployment"
        gvk: String,
    },
    /// Search indexed resources by kind, display name or description
    Search {
        query: String,
        /// Rank with the fuzzy matcher; accepts g:, v: and src: filters
        #[arg(long = "fuzzy", action = ArgAction::SetTrue)]
        fuzzy: bool,
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Flatten a resolved schema into dotted property paths
    Flatten {
        gvk: String,
        #[arg(long = "depth", default_value_t = DEFAULT_FLATTEN_DEPTH)]
        depth: usize,
    },
    /// Index and cache statistics
    Stats,
    /// Validate a YAML manifest against a resolved schema
    #[cfg(feature = "validate")]
    Validate { gvk: String, file: PathBuf },
}

fn init_tracing() {
    let env = std::env::var("KFORGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KFORGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KFORGE_METRICS_ADDR; expected host:port");
        }
    }
}

/// File source fronted by the persistent document cache. Bytes read on a miss
/// are held until [`CachedSource::persist`] is called after a successful load.
struct CachedSource {
    file: FileSource,
    store: Option<(SqliteSchemaCache, String)>,
    schema_key: String,
    fetched: RefCell<Option<Vec<u8>>>,
}

impl CachedSource {
    fn new(path: PathBuf, schema_key: &str, version_tag: Option<&str>) -> Self {
        let store = version_tag.and_then(|tag| match SqliteSchemaCache::open_default() {
            Ok(store) => Some((store, tag.to_string())),
            Err(e) => {
                warn!(error = %e, "schema cache unavailable; reading definitions directly");
                None
            }
        });
        Self::with_store(path, schema_key, store)
    }

    fn with_store(path: PathBuf, schema_key: &str, store: Option<(SqliteSchemaCache, String)>) -> Self {
        Self { file: FileSource::new(path), store, schema_key: schema_key.to_string(), fetched: RefCell::new(None) }
    }

    fn persist(&self) {
        let (Some((store, tag)), Some(bytes)) = (&self.store, self.fetched.borrow_mut().take()) else { return };
        match store.put(tag, &self.schema_key, &bytes) {
            Ok(true) => info!(version_tag = %tag, bytes = bytes.len(), "definitions cached"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to cache definitions"),
        }
    }

    fn usage(&self) -> Option<kforge_persist::CacheUsage> {
        let (store, _) = self.store.as_ref()?;
        store.usage().map_err(|e| warn!(error = %e, "schema cache usage unavailable")).ok()
    }
}

impl DocumentSource for CachedSource {
    fn describe(&self) -> String {
        match &self.store {
            Some((_, tag)) => format!("{} (cache tag {})", self.file.describe(), tag),
            None => self.file.describe(),
        }
    }

    async fn fetch(&self) -> Result<Vec<u8>, SchemaError> {
        if let Some((store, tag)) = &self.store {
            match store.get(tag, &self.schema_key) {
                Ok(Some(bytes)) if serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).is_ok() => {
                    info!(version_tag = %tag, "definitions served from cache");
                    return Ok(bytes);
                }
                // written by a build with different compression, or truncated; replaced after this load
                Ok(Some(_)) => warn!(version_tag = %tag, "cached definitions unreadable; refetching"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "schema cache read failed"),
            }
        }
        let bytes = self.file.fetch().await?;
        if self.store.is_some() {
            *self.fetched.borrow_mut() = Some(bytes.clone());
        }
        Ok(bytes)
    }
}

fn emit<T: Serialize>(output: Output, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    match output {
        Output::Human => human(value),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn parse_gvk(key: &str) -> Result<Gvk> {
    Gvk::parse_key(key).ok_or_else(|| anyhow!("invalid GVK key {:?}; expected version/Kind or group/version/Kind", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let path = cli.definitions.clone().ok_or_else(|| anyhow!("no definitions document; pass --definitions or set KFORGE_DEFINITIONS"))?;
    let strategy = if cli.eager { ResolutionStrategy::Eager } else { ResolutionStrategy::Lazy };
    let options = IndexerOptions::default()
        .with_source_tag(cli.source.clone())
        .with_max_ref_depth(cli.max_ref_depth)
        .with_strategy(strategy);
    let source = CachedSource::new(path, &cli.source, cli.version_tag.as_deref());
    let mut indexer = SchemaIndexer::new(options);
    let summary: LoadSummary = tokio::time::timeout(Duration::from_secs(cli.load_timeout_secs), indexer.load(&source))
        .await
        .map_err(|_| anyhow!("loading definitions timed out after {}s", cli.load_timeout_secs))?
        .with_context(|| format!("loading {}", source.describe()))?;
    source.persist();
    info!(resources = summary.resources, kinds = summary.kinds, ?strategy, "index ready");

    match cli.command {
        Commands::Kinds => {
            let kinds = indexer.available_kinds();
            emit(cli.output, &kinds, |kinds| kinds.iter().for_each(|k| println!("{}", k)))?;
        }
        Commands::Versions { kind } => {
            let versions = indexer.kind_versions(&kind);
            if versions.is_empty() {
                return Err(anyhow!("no resources of kind {:?}", kind));
            }
            emit(cli.output, &versions, |versions| {
                println!("{:<48} {:<36} SOURCE", "KEY", "APIVERSION");
                for r in versions {
                    println!("{:<48} {:<36} {}", r.metadata.key, r.api_version(), r.metadata.source.as_deref().unwrap_or("-"));
                }
            })?;
        }
        Commands::Get { gvk } => {
            let gvk = parse_gvk(&gvk)?;
            let resource = indexer
                .schema_by_gvk(&gvk.group, &gvk.version, &gvk.kind)
                .ok_or_else(|| anyhow!("{} is not indexed", gvk))?;
            emit(cli.output, &resource, |r| {
                println!("kind: {}", r.metadata.kind);
                println!("apiVersion: {}", r.api_version());
                println!("display: {}", r.metadata.display_name);
                if let Some(desc) = &r.metadata.description {
                    println!("description: {}", desc);
                }
                match serde_json::to_string_pretty(r.schema.as_ref()) {
                    Ok(s) => println!("{}", s),
                    Err(e) => warn!(error = %e, "failed to render schema"),
                }
            })?;
        }
        Commands::Search { query, fuzzy, limit } => {
            let rows = if fuzzy {
                let search = ResourceSearch::build(indexer.index().iter());
                search
                    .search(&query, SearchOpts { limit, min_score: None })
                    .into_iter()
                    .filter_map(|h| search.doc(h.doc).cloned())
                    .collect::<Vec<_>>()
            } else {
                let mut rows = indexer.search_resources(&query);
                rows.truncate(limit);
                rows
            };
            emit(cli.output, &rows, |rows| {
                println!("{:<48} DISPLAY", "KEY");
                for m in rows {
                    println!("{:<48} {}", m.key, m.display_name);
                }
            })?;
        }
        Commands::Flatten { gvk, depth } => {
            let gvk = parse_gvk(&gvk)?;
            let resource = indexer
                .schema_by_gvk(&gvk.group, &gvk.version, &gvk.kind)
                .ok_or_else(|| anyhow!("{} is not indexed", gvk))?;
            let flat = resource.flatten(depth);
            emit(cli.output, &flat, |flat| {
                for (path, node) in &flat.properties {
                    let ty = node.get("type").and_then(|t| t.as_str()).unwrap_or("-");
                    let req = if flat.required.iter().any(|r| r == path) { " (required)" } else { "" };
                    println!("{:<56} {}{}", path, ty, req);
                }
            })?;
        }
        Commands::Stats => {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Stats {
                load: LoadSummary,
                cache: kforge_schema::CacheStats,
                #[serde(skip_serializing_if = "Option::is_none")]
                persistent_cache: Option<kforge_persist::CacheUsage>,
            }
            let stats = Stats { load: summary, cache: indexer.cache_stats(), persistent_cache: source.usage() };
            emit(cli.output, &stats, |s| {
                println!("definitions: {}", s.load.definitions);
                println!("resources:   {}", s.load.resources);
                println!("kinds:       {}", s.cache.total_kinds);
                println!("cached:      {} (hit ratio {:.2})", s.cache.cached_schemas, s.cache.cache_hit_ratio);
                if let Some(u) = &s.persistent_cache {
                    println!("persistent:  {} entries, {}/{} bytes", u.entries, u.bytes, u.max_bytes);
                }
            })?;
        }
        #[cfg(feature = "validate")]
        Commands::Validate { gvk, file } => {
            let gvk = parse_gvk(&gvk)?;
            let resource = indexer
                .schema_by_gvk(&gvk.group, &gvk.version, &gvk.kind)
                .ok_or_else(|| anyhow!("{} is not indexed", gvk))?;
            let yaml = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let issues = kforge_schema::validate::validate_yaml(&resource.schema, &yaml)?;
            emit(cli.output, &issues, |issues| {
                if issues.is_empty() {
                    println!("{}: valid {}", file.display(), gvk);
                }
                for i in issues {
                    let path = if i.path.is_empty() { "/" } else { i.path.as_str() };
                    match &i.hint {
                        Some(h) => println!("{}: {} ({})", path, i.error, h),
                        None => println!("{}: {}", path, i.error),
                    }
                }
            })?;
            if !issues.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kforge_schema::BytesSource;

    fn temp_path(name: &str, ext: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("kforgectl-test-{}-{}.{}", name, nanos, ext))
    }

    const DOC: &str = r#"{"definitions": {"io.k8s.api.core.v1.Pod": {
        "type": "object",
        "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Pod"}]
    }}}"#;

    fn store(name: &str) -> SqliteSchemaCache {
        SqliteSchemaCache::open(&temp_path(name, "db").to_string_lossy()).unwrap()
    }

    #[tokio::test]
    async fn unreadable_cache_entry_falls_back_to_file_and_is_replaced() {
        let defs = temp_path("defs", "json");
        std::fs::write(&defs, DOC).unwrap();
        let cache = store("unreadable");
        cache.put("v1.29", "kubernetes", &[0x28, 0xb5, 0x2f, 0xfd, 0x00]).unwrap();

        let source = CachedSource::with_store(defs.clone(), "kubernetes", Some((cache, "v1.29".into())));
        let mut ix = SchemaIndexer::new(IndexerOptions::default());
        ix.load(&source).await.unwrap();
        assert!(ix.schema_by_gvk("", "v1", "Pod").is_some());
        source.persist();

        let (cache, _) = source.store.as_ref().unwrap();
        let cached = cache.get("v1.29", "kubernetes").unwrap().unwrap();
        assert_eq!(cached, DOC.as_bytes());
    }

    #[tokio::test]
    async fn readable_cache_entry_is_served_without_the_file() {
        let cache = store("hit");
        cache.put("v1.29", "kubernetes", DOC.as_bytes()).unwrap();
        let source = CachedSource::with_store(temp_path("absent", "json"), "kubernetes", Some((cache, "v1.29".into())));
        let mut ix = SchemaIndexer::new(IndexerOptions::default());
        ix.load(&source).await.unwrap();
        assert_eq!(ix.index().len(), 1);
        assert!(source.fetched.borrow().is_none());

        let mut plain = SchemaIndexer::new(IndexerOptions::default());
        plain.load(&BytesSource::new("doc", DOC)).await.unwrap();
        assert_eq!(plain.available_kinds(), ix.available_kinds());
    }
}
