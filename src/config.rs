use crate::errors::SweepResult;
use crate::models::bucket::DEFAULT_REGION;
use crate::models::selector::DeleteSelector;
use crate::services::filter::{parse_age, parse_size};
use crate::services::pool::DEFAULT_CONCURRENCY;
use crate::services::rate_limit::DEFAULT_RATE_LIMIT;
use crate::services::retry::RetryConfig;
use crate::services::s3_api::ClientSettings;
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub concurrency: usize,
    pub rate_limit: f64,
    pub max_retries: u32,
    pub verbosity: Verbosity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Find and clean up incomplete S3 multipart uploads")]
pub struct Cli {
    /// AWS profile (overrides SWEEPER_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Region to focus on (overrides SWEEPER_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Custom S3 endpoint, enables path-style addressing (overrides SWEEPER_ENDPOINT)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Parallel workers, 1-100 (overrides SWEEPER_CONCURRENCY)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Requests per second per client (overrides SWEEPER_RATE_LIMIT)
    #[arg(long, global = true)]
    pub rate_limit: Option<f64>,

    /// Retries for transient failures (overrides SWEEPER_MAX_RETRIES)
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List incomplete multipart uploads
    List(ListArgs),
    /// Report the storage held by incomplete uploads
    Size(SizeArgs),
    /// Show how old incomplete uploads are
    Age(AgeArgs),
    /// Estimate the monthly storage cost of incomplete uploads
    Cost(CostArgs),
    /// Abort incomplete uploads
    Delete(DeleteArgs),
    /// Validate a filter query without contacting S3
    CheckFilter {
        /// Query such as `age>7d,size<100MB`
        query: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Age,
    Size,
    Bucket,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only this bucket
    #[arg(long)]
    pub bucket: Option<String>,

    /// Filter query, e.g. `age>7d,storageClass=STANDARD`
    #[arg(long)]
    pub filter: Option<String>,

    #[arg(long, value_enum, default_value_t = SortKey::Age)]
    pub sort_by: SortKey,

    /// Maximum uploads to return
    #[arg(long)]
    pub limit: Option<usize>,

    /// Uploads to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Look up part sizes for every upload
    #[arg(long)]
    pub with_sizes: bool,

    #[arg(long)]
    pub json: bool,

    /// Write the listing to a file; `.csv` for CSV, anything else for JSON
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SizeArgs {
    #[arg(long)]
    pub bucket: Option<String>,

    #[arg(long)]
    pub filter: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CostArgs {
    #[arg(long)]
    pub bucket: Option<String>,

    #[arg(long)]
    pub filter: Option<String>,

    /// Fail on storage classes without a known price
    #[arg(long)]
    pub strict: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AgeArgs {
    #[arg(long)]
    pub bucket: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[arg(long)]
    pub bucket: Option<String>,

    /// Minimum age, e.g. `7d`, `2w`
    #[arg(long)]
    pub older_than: Option<String>,

    /// Only uploads smaller than this, e.g. `100MB`
    #[arg(long)]
    pub smaller_than: Option<String>,

    /// Only uploads larger than this, e.g. `1GB`
    #[arg(long)]
    pub larger_than: Option<String>,

    /// Show what would be deleted
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub json: bool,

    /// Save the dry-run preview; `.csv` for CSV, anything else for JSON
    #[arg(long, short, requires = "dry_run")]
    pub output: Option<PathBuf>,
}

impl DeleteArgs {
    pub fn selector(&self) -> SweepResult<DeleteSelector> {
        let selector = DeleteSelector {
            bucket: self.bucket.clone(),
            older_than: self.older_than.as_deref().map(parse_age).transpose()?,
            smaller_than: self.smaller_than.as_deref().map(parse_size).transpose()?,
            larger_than: self.larger_than.as_deref().map(parse_size).transpose()?,
            dry_run: self.dry_run,
            force: self.force,
        };
        selector.validate()?;
        Ok(selector)
    }
}

fn read_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<Option<String>>,
{
    match lookup(name)? {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {name} value `{value}`")),
        None => Ok(None),
    }
}

/// `xx-yyyy-N` shape: at least three lowercase parts, numeric last part.
pub fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    parts.len() >= 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
        && parts
            .last()
            .is_some_and(|last| last.chars().all(|c| c.is_ascii_digit()))
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let cli = Cli::parse();
        Self::from_parts(cli, read_env)
    }

    /// Merge `cli` over values from `lookup`, then validate.
    pub fn from_parts<F>(cli: Cli, lookup: F) -> Result<(Self, Command)>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        // --- Environment fallback ---
        let env_profile = lookup("SWEEPER_PROFILE")?;
        let env_region = lookup("SWEEPER_REGION")?;
        let env_endpoint = lookup("SWEEPER_ENDPOINT")?;
        let env_concurrency = parse_env::<usize, _>(&lookup, "SWEEPER_CONCURRENCY")?;
        let env_rate_limit = parse_env::<f64, _>(&lookup, "SWEEPER_RATE_LIMIT")?;
        let env_max_retries = parse_env::<u32, _>(&lookup, "SWEEPER_MAX_RETRIES")?;

        let verbosity = match (cli.verbose, cli.quiet) {
            (true, true) => bail!("--verbose and --quiet cannot be used together"),
            (true, false) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        };

        // --- Merge ---
        let cfg = Self {
            profile: cli.profile.or(env_profile),
            region: cli.region.or(env_region),
            endpoint: cli.endpoint.or(env_endpoint),
            concurrency: cli
                .concurrency
                .or(env_concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY),
            rate_limit: cli
                .rate_limit
                .or(env_rate_limit)
                .unwrap_or(DEFAULT_RATE_LIMIT),
            max_retries: cli
                .max_retries
                .or(env_max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            verbosity,
        };
        cfg.validate()?;

        Ok((cfg, cli.command))
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            bail!(
                "concurrency must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            );
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            bail!("rate limit must be greater than zero, got {}", self.rate_limit);
        }
        if let Some(region) = &self.region
            && !is_valid_region(region)
        {
            bail!("invalid region format `{region}`, expected something like `us-east-1`");
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            profile: self.profile.clone(),
            endpoint: self.endpoint.clone(),
            rate_limit: self.rate_limit,
            retry: RetryConfig::new().with_max_retries(self.max_retries),
        }
    }

    /// Region of the client used for bucket enumeration and location lookups.
    pub fn home_region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}
