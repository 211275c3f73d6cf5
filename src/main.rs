//! churnserve CLI - Main entry point.

use churnserve::cli::{CanaryCommands, Cli, Commands, ModelCommands};
use churnserve::compute::dataset;
use churnserve::compute::SyntheticGenerator;
use churnserve::config::ChurnConfig;
use churnserve::{observability, App};
use std::collections::BTreeMap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = load_config(&cli)?;
    observability::init(&config.observability)?;

    match cli.command {
        Commands::Serve {
            bind_addr,
            router_seed,
        } => {
            let mut config = config;
            if let Some(addr) = bind_addr {
                config.server.bind_addr = addr.parse()?;
            }
            if router_seed.is_some() {
                config.serving.router_seed = router_seed;
            }

            churnserve::run(config).await?;
        }

        Commands::Train { data, model_type } => {
            let data = data.unwrap_or_else(|| config.storage.raw_data_path());
            let model_type = model_type.unwrap_or_else(|| config.training.model_type.to_string());

            let rows = dataset::read_labeled(&data)?;
            println!("Loaded {} rows from {}", rows.len(), data.display());

            let app = App::open(config).await?;
            let outcome = app.training_pipeline().train_named(rows, &model_type).await?;

            println!("Registered {} ({})", outcome.version.version, outcome.version.model_type);
            println!("  Run: {}", outcome.run_id);
            println!("  Local artifact: {}", outcome.local_path.display());
            println!("  Rows: {} train / {} test", outcome.train_rows, outcome.test_rows);
            let metrics: BTreeMap<_, _> = outcome.metrics.to_map().into_iter().collect();
            for (name, value) in metrics {
                println!("  {:<10} {:.4}", name, value);
            }
        }

        Commands::GenerateData {
            samples,
            output,
            seed,
        } => {
            let output = output.unwrap_or_else(|| config.storage.raw_data_path());
            let rows = SyntheticGenerator::new(seed).generate(samples);
            dataset::write_labeled(&output, &rows)?;

            let churned = rows.iter().filter(|r| r.churn).count();
            println!("Wrote {} customers to {}", rows.len(), output.display());
            if !rows.is_empty() {
                println!("Churn rate: {:.2}%", 100.0 * churned as f64 / rows.len() as f64);
            }
        }

        Commands::BatchInference { input, output } => {
            let input = input.unwrap_or_else(|| config.storage.raw_data_path());
            let output = output.unwrap_or_else(|| config.storage.batch_output_path());

            let app = App::open(config).await?;
            let response = app.prediction_service().predict_file(&input, &output).await?;

            let churned = response.predictions.iter().filter(|p| p.prediction == 1).count();
            println!(
                "Scored {} customers with {} ({} predicted to churn)",
                response.total, response.model_version, churned
            );
            println!("Wrote {}", output.display());
        }

        Commands::Canary { command } => {
            let default_traffic = config.serving.canary_traffic_percent;
            let app = App::open(config).await?;
            let registry = &app.registry;

            match command {
                CanaryCommands::Setup { version, traffic } => {
                    let traffic = traffic.unwrap_or(default_traffic);
                    let canary = registry.promote_to_canary(&version, traffic).await?;
                    println!(
                        "{} is now canary at {}% traffic",
                        canary.version, canary.traffic_percent
                    );
                }
                CanaryCommands::Promote { version } => {
                    let active = registry.promote_canary_to_active(&version).await?;
                    println!("{} is now active", active.version);
                }
                CanaryCommands::Rollback => match registry.rollback_canary().await? {
                    Some(previous) => println!("Rolled back canary {}", previous.version),
                    None => println!("No canary to roll back"),
                },
            }
            println!("Running servers pick this up on POST /api/v1/models/reload");
        }

        Commands::Models { command } => {
            let app = App::open(config).await?;
            match command {
                ModelCommands::List => {
                    let versions = app.registry.list_all().await;
                    if versions.is_empty() {
                        println!("No registered models");
                    }
                    for v in versions {
                        println!(
                            "{:<24} {:<18} {:<10} {:>3}%  {}",
                            v.version,
                            v.model_type.as_str(),
                            v.status.as_str(),
                            v.traffic_percent,
                            v.created_at.to_rfc3339()
                        );
                    }
                }
                ModelCommands::Show { version } => {
                    let v = app.registry.get(&version).await?;
                    println!("Version: {}", v.version);
                    println!("  Type: {}", v.model_type);
                    println!("  Status: {}", v.status);
                    println!("  Traffic: {}%", v.traffic_percent);
                    println!("  Artifact: {}", v.artifact_ref);
                    println!("  Created: {}", v.created_at.to_rfc3339());
                    for metric in app.registry.metrics_for(&version).await? {
                        println!("  {:<10} {:.4}", metric.metric_name, metric.metric_value);
                    }
                }
            }
        }

        Commands::Version => {
            println!("churnserve v{}", env!("CARGO_PKG_VERSION"));
            println!("Churn prediction serving with versioned models and canary routing");
        }
    }

    Ok(())
}

/// Config file (or defaults) with global CLI flags applied on top.
fn load_config(cli: &Cli) -> anyhow::Result<ChurnConfig> {
    let mut config = match &cli.config {
        Some(path) => ChurnConfig::from_file(path)?,
        None => ChurnConfig::default(),
    };

    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if cli.json_logs {
        config.observability.json_logs = true;
    }
    if let Some(uri) = &cli.tracking_uri {
        config.tracking.uri = uri.clone();
    }
    if let Some(path) = &cli.model_registry_path {
        config.storage.model_registry_path = path.clone();
    }
    if let Some(dir) = &cli.database_dir {
        config.storage.database_dir = Some(dir.clone());
    }

    config.validate()?;
    Ok(config)
}
