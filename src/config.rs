use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub storage_dir: String,
    pub upstream_dir: String,
    pub prefix: String,
    pub suffix: String,
    pub concurrency: usize,
    pub max_retries: u32,
    pub attempt_timeout: Option<Duration>,
    pub render_cmd: String,
    pub compress_cmd: String,
    pub start_after: Option<String>,
    pub force: bool,
    pub max_pages: Option<usize>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Back up and recompress outfit preview images")]
pub struct Args {
    /// Database URL (overrides PREVIEW_COMPACTOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where object payloads are stored (overrides PREVIEW_COMPACTOR_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory of `<entity-id>.json` upstream documents
    /// (overrides PREVIEW_COMPACTOR_UPSTREAM_DIR)
    #[arg(long)]
    pub upstream_dir: Option<String>,

    /// Key prefix to walk (overrides PREVIEW_COMPACTOR_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Only keys ending with this suffix are processed (overrides PREVIEW_COMPACTOR_SUFFIX)
    #[arg(long)]
    pub suffix: Option<String>,

    /// Number of keys processed concurrently (overrides PREVIEW_COMPACTOR_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Retries per key and per page listing (overrides PREVIEW_COMPACTOR_MAX_RETRIES)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in seconds (overrides PREVIEW_COMPACTOR_ATTEMPT_TIMEOUT_SECS)
    #[arg(long)]
    pub attempt_timeout_secs: Option<u64>,

    /// Render command; receives payload JSON on stdin and the size class as last argument
    /// (overrides PREVIEW_COMPACTOR_RENDER_CMD)
    #[arg(long)]
    pub render_cmd: Option<String>,

    /// Compress command; receives image bytes on stdin (overrides PREVIEW_COMPACTOR_COMPRESS_CMD)
    #[arg(long)]
    pub compress_cmd: Option<String>,

    /// Resume after this key (the cursor printed by a previous run)
    #[arg(long)]
    pub start_after: Option<String>,

    /// Recompress keys even if already tagged compressed or compression-failed
    #[arg(long)]
    pub force: bool,

    /// Stop after this many pages
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

const ENV_PREFIX: &str = "PREVIEW_COMPACTOR_";

/// Read `PREVIEW_COMPACTOR_<name>`, treating absence as `None`.
fn env_var(name: &str) -> Result<Option<String>> {
    let var = format!("{ENV_PREFIX}{name}");
    match env::var(&var) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {var}")),
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(name)? {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`")),
        None => Ok(None),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win, then environment, then defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let database_url = args
            .database_url
            .or(env_var("DATABASE_URL")?)
            .unwrap_or_else(|| "sqlite://./data/meta/objects.db".into());
        let storage_dir = args
            .storage_dir
            .or(env_var("STORAGE_DIR")?)
            .unwrap_or_else(|| "./data/objects".into());
        let upstream_dir = args
            .upstream_dir
            .or(env_var("UPSTREAM_DIR")?)
            .unwrap_or_else(|| "./data/upstream".into());
        let prefix = args
            .prefix
            .or(env_var("PREFIX")?)
            .unwrap_or_else(|| "outfits/".into());
        let suffix = args
            .suffix
            .or(env_var("SUFFIX")?)
            .unwrap_or_else(|| ".png".into());
        let concurrency = match args.concurrency {
            Some(value) => value,
            None => env_parse("CONCURRENCY")?.unwrap_or(10),
        };
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        let max_retries = match args.max_retries {
            Some(value) => value,
            None => env_parse("MAX_RETRIES")?.unwrap_or(2),
        };
        let attempt_timeout = match args.attempt_timeout_secs {
            Some(secs) => Some(secs),
            None => env_parse::<u64>("ATTEMPT_TIMEOUT_SECS")?,
        }
        .map(Duration::from_secs);

        // Only required when actually processing; `--migrate` runs without them.
        let render_cmd = args
            .render_cmd
            .or(env_var("RENDER_CMD")?)
            .unwrap_or_default();
        let compress_cmd = args
            .compress_cmd
            .or(env_var("COMPRESS_CMD")?)
            .unwrap_or_default();

        Ok(Self {
            database_url,
            storage_dir,
            upstream_dir,
            prefix,
            suffix,
            concurrency,
            max_retries,
            attempt_timeout,
            render_cmd,
            compress_cmd,
            start_after: args.start_after,
            force: args.force,
            max_pages: args.max_pages,
        })
    }

    /// Shared fetch cache capacity: sibling keys of one entity arrive close
    /// together, so twice the worker count is enough.
    pub fn fetch_cache_capacity(&self) -> usize {
        self.concurrency * 2
    }
}
