use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use upload_sweeper::config::{
    AgeArgs, AppConfig, Command, CostArgs, DeleteArgs, ListArgs, SizeArgs, SortKey,
};
use upload_sweeper::models::report::{format_age, format_bytes};
use upload_sweeper::models::{ListScope, UploadRecord};
use upload_sweeper::services::cost::FlatRateEstimator;
use upload_sweeper::services::deletion::{DeleteOutcome, PromptConfirmer, TracingReporter};
use upload_sweeper::services::export::{export_uploads, save_dry_run};
use upload_sweeper::services::filter::{FilterEngine, QueryFilter};
use upload_sweeper::{Collaborators, SweepError, SweepService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.verbosity.default_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting upload-sweeper with config: {:?}", cfg);

    if let Command::CheckFilter { query } = &command {
        QueryFilter.validate(query)?;
        println!("Filter is valid: {query}");
        return Ok(());
    }

    // --- Cancel in-flight work on Ctrl-C ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let estimator = match &command {
        Command::Cost(args) if args.strict => FlatRateEstimator::default().without_fallback(),
        _ => FlatRateEstimator::default(),
    };

    // --- Initialize core service ---
    let service = SweepService::connect(
        cfg.client_settings(),
        cfg.home_region(),
        cfg.concurrency,
        Collaborators {
            confirmer: Arc::new(PromptConfirmer::stdio()),
            reporter: Arc::new(TracingReporter),
            cost: Arc::new(estimator.clone()),
        },
    )
    .await
    .context("failed to initialize storage clients")?;

    match command {
        Command::List(args) => run_list(&service, &cfg, args, &cancel).await,
        Command::Size(args) => run_size(&service, &cfg, args, &cancel).await,
        Command::Age(args) => run_age(&service, &cfg, args, &cancel).await,
        Command::Cost(args) => run_cost(&service, &cfg, args, &cancel).await,
        Command::Delete(args) => run_delete(&service, &cfg, args, &estimator, &cancel).await,
        Command::CheckFilter { .. } => Ok(()),
    }
}

fn scope_for(cfg: &AppConfig, bucket: Option<&String>) -> ListScope {
    let scope = match bucket {
        Some(bucket) => ListScope::bucket(bucket),
        None => ListScope::all(),
    };
    match &cfg.region {
        Some(region) => scope.in_region(region),
        None => scope,
    }
}

/// Collect uploads, logging buckets that could not be listed.
async fn collect(
    service: &SweepService,
    scope: &ListScope,
    cancel: &CancellationToken,
) -> Result<(Vec<UploadRecord>, Option<SweepError>)> {
    let listing = service.list_uploads(scope, cancel).await?;
    let failure = listing.failure.map(|failure| {
        tracing::warn!("{failure}");
        SweepError::from(failure)
    });
    Ok((listing.records, failure))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_list(
    service: &SweepService,
    cfg: &AppConfig,
    args: ListArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut scope = scope_for(cfg, args.bucket.as_ref());
    // Without a filter the page can be cut during collection.
    if args.filter.is_none() {
        scope.offset = args.offset;
        scope.max_results = args.limit;
    }

    let (mut records, failure) = collect(service, &scope, cancel).await?;
    if args.with_sizes {
        let sized = service.size_uploads(records, cancel).await?;
        for bucket in &sized.inaccessible_buckets {
            tracing::warn!(bucket = %bucket, "could not read part sizes");
        }
        records = sized.records;
    }
    if let Some(query) = &args.filter {
        let filter = service.parse_filter(query)?;
        records = service.apply_filter(&records, &filter);
        records = records
            .into_iter()
            .skip(args.offset)
            .take(args.limit.unwrap_or(usize::MAX))
            .collect();
    }

    match args.sort_by {
        SortKey::Age => records.sort_by_key(|r| r.initiated),
        SortKey::Size => records.sort_by(|a, b| b.size.cmp(&a.size)),
        SortKey::Bucket => records.sort_by(|a, b| (&a.bucket, &a.key).cmp(&(&b.bucket, &b.key))),
    }

    if let Some(path) = &args.output {
        export_uploads(path, &records)?;
        println!("Exported {} uploads to {}", records.len(), path.display());
    } else if args.json {
        print_json(&records)?;
    } else if records.is_empty() {
        println!("No incomplete multipart uploads found.");
    } else {
        for record in &records {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                record.bucket,
                record.key,
                record.upload_id,
                format_age(record.age()),
                format_bytes(record.size),
                record.storage_class,
                record.region
            );
        }
        println!("{} uploads", records.len());
    }

    failure.map_or(Ok(()), |err| Err(err.into()))
}

async fn run_size(
    service: &SweepService,
    cfg: &AppConfig,
    args: SizeArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let (mut records, failure) = collect(service, &scope_for(cfg, args.bucket.as_ref()), cancel).await?;
    if let Some(query) = &args.filter {
        records = service.apply_filter(&records, &service.parse_filter(query)?);
    }

    let report = service.size_report(records, cancel).await?;
    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "{} uploads, {} total, ~${:.2}/month",
            report.total_uploads,
            format_bytes(report.total_size),
            report.estimated_monthly_cost
        );
        for (bucket, totals) in &report.by_bucket {
            println!("  {bucket}: {} uploads, {}", totals.uploads, format_bytes(totals.size));
        }
        for bucket in &report.inaccessible_buckets {
            println!("  {bucket}: inaccessible");
        }
    }

    failure.map_or(Ok(()), |err| Err(err.into()))
}

async fn run_age(
    service: &SweepService,
    cfg: &AppConfig,
    args: AgeArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let (records, failure) = collect(service, &scope_for(cfg, args.bucket.as_ref()), cancel).await?;
    let distribution = service.age_report(&records, args.bucket.as_deref());

    if args.json {
        print_json(&distribution)?;
    } else {
        for band in &distribution.bands {
            println!("{:<18} {:>6} uploads  {}", band.label, band.uploads, format_bytes(band.size));
        }
        println!("{} uploads", distribution.total_uploads);
    }

    failure.map_or(Ok(()), |err| Err(err.into()))
}

async fn run_cost(
    service: &SweepService,
    cfg: &AppConfig,
    args: CostArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let (mut records, failure) = collect(service, &scope_for(cfg, args.bucket.as_ref()), cancel).await?;
    if let Some(query) = &args.filter {
        records = service.apply_filter(&records, &service.parse_filter(query)?);
    }

    let breakdown = service.cost_report(records, cancel).await?;
    if args.json {
        print_json(&breakdown)?;
    } else {
        println!(
            "{} uploads, {} total, ~{:.2} {}/month",
            breakdown.total_uploads,
            format_bytes(breakdown.total_size),
            breakdown.total_monthly_cost,
            breakdown.currency
        );
        for (region, totals) in &breakdown.by_region {
            println!("  {region}: {} uploads, ~{:.2}/month", totals.uploads, totals.estimated_cost);
        }
        for (class, totals) in &breakdown.by_storage_class {
            println!("  {class}: {} uploads, ~{:.2}/month", totals.uploads, totals.estimated_cost);
        }
    }

    failure.map_or(Ok(()), |err| Err(err.into()))
}

async fn run_delete(
    service: &SweepService,
    cfg: &AppConfig,
    args: DeleteArgs,
    estimator: &FlatRateEstimator,
    cancel: &CancellationToken,
) -> Result<()> {
    let selector = args.selector()?;
    let (records, failure) = collect(service, &scope_for(cfg, args.bucket.as_ref()), cancel).await?;
    if failure.is_some() {
        tracing::warn!("Continuing with the uploads that could be listed");
    }

    match service.delete_uploads(records, &selector, cancel).await {
        Ok(DeleteOutcome::DryRun(report)) => {
            if let Some(path) = &args.output {
                save_dry_run(path, &report, estimator)?;
                println!("Saved dry run to {}", path.display());
            }
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "Dry run: would delete {} uploads ({}), saving ~${:.2}/month",
                    report.total_uploads,
                    format_bytes(report.total_size),
                    report.estimated_monthly_savings
                );
                println!("Filters applied: {}", report.filters);
            }
            Ok(())
        }
        Ok(DeleteOutcome::Deleted(result)) => {
            if args.json {
                print_json(&result)?;
            } else {
                println!(
                    "Deleted {} uploads, freed {}",
                    result.succeeded,
                    format_bytes(result.bytes_freed)
                );
            }
            Ok(())
        }
        Err(SweepError::Declined) => {
            println!("Deletion cancelled.");
            Ok(())
        }
        Err(SweepError::NothingToDelete) => {
            println!("No uploads match the specified criteria.");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
