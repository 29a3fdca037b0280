use anyhow::Context as _;
use bluegreen_deployer::chart::{
    ensure_bluegreen_chart, ensure_microservice_chart, load_values, values_path,
};
use bluegreen_deployer::config::DeployerConfig;
use bluegreen_deployer::deployer::cdevents::HttpEventSink;
use bluegreen_deployer::deployer::cluster::KubeCluster;
use bluegreen_deployer::deployer::helm::HelmCli;
use bluegreen_deployer::deployer::manifest::YamlManifestDiffer;
use bluegreen_deployer::deployer::standard::{deploy_standard, microservice_edits};
use bluegreen_deployer::deployer::{run_cutover, Context, CutoverRequest};
use bluegreen_deployer::validation::{
    parse_app_name, parse_app_version, parse_chart_dir, parse_target_env,
};
use clap::{Args, Parser, Subcommand};
use kube::config::KubeConfigOptions;
use kube::Client;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "bluegreen-deployer",
    about = "Deploy Helm charts with blue/green cutover and automatic rollback",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy to the offline colour, then move the live service onto it
    Bluegreen {
        #[command(flatten)]
        chart: ChartArgs,
        #[command(flatten)]
        version: VersionArgs,
    },
    /// Deploy `{env}-{app}` with the environment values as they are
    StandardChart {
        #[command(flatten)]
        chart: ChartArgs,
    },
    /// Deploy `{env}-{app}` from a chart built on the microservice chart
    Microservice {
        #[command(flatten)]
        chart: ChartArgs,
        #[command(flatten)]
        version: VersionArgs,
    },
}

#[derive(Args, Debug)]
struct ChartArgs {
    /// Chart directory holding Chart.yaml and `{env}.yaml` values
    #[arg(long, default_value = "./chart", value_parser = parse_chart_dir)]
    chart_dir: PathBuf,

    #[arg(long, value_parser = parse_app_name)]
    app_name: String,

    /// prod or staging
    #[arg(long, value_parser = parse_target_env)]
    target_env: String,
}

#[derive(Args, Debug)]
struct VersionArgs {
    #[arg(long, value_parser = parse_app_version)]
    app_version: String,
}

/// Kubernetes client, honouring an explicit kubeconfig context
async fn kube_client(config: &DeployerConfig) -> anyhow::Result<Client> {
    let Some(context) = &config.kube_context else {
        return Ok(Client::try_default().await?);
    };
    let options = KubeConfigOptions {
        context: Some(context.clone()),
        ..Default::default()
    };
    let kube_config = kube::Config::from_kubeconfig(&options)
        .await
        .with_context(|| format!("failed to load kubeconfig context {context}"))?;
    Ok(Client::try_from(kube_config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // reqwest and kube both sit on rustls; pick the provider once
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    let config = DeployerConfig::from_env().context("failed to read configuration")?;
    config.validate()?;

    let chart = match &cli.command {
        Commands::Bluegreen { chart, .. } => {
            ensure_bluegreen_chart(&chart.chart_dir)?;
            chart
        }
        Commands::Microservice { chart, .. } => {
            ensure_microservice_chart(&chart.chart_dir)?;
            chart
        }
        Commands::StandardChart { chart } => chart,
    };
    let base_values = load_values(&values_path(&chart.chart_dir, &chart.target_env))?;

    let client = match kube_client(&config).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e);
        }
    };
    info!(namespace = %config.namespace, "Connected to Kubernetes cluster");

    let manager = HelmCli::new(&config);
    let events = HttpEventSink::new(&config.cdevents);
    let ctx = Context::new(
        config,
        manager,
        YamlManifestDiffer,
        KubeCluster::new(client),
        events,
    );

    match &cli.command {
        Commands::Bluegreen { chart, version } => {
            let report = run_cutover(
                &ctx,
                &CutoverRequest {
                    target_env: &chart.target_env,
                    app_name: &chart.app_name,
                    app_version: &version.app_version,
                    chart_dir: &chart.chart_dir,
                    base_values: &base_values,
                },
            )
            .await?;
            info!(
                colour = %report.colour,
                offline_colour = %report.offline_colour,
                offline_scaled_down = report.offline_scaled_down,
                "Blue/green deploy complete"
            );
        }
        Commands::StandardChart { chart } => {
            deploy_standard(
                &ctx,
                &chart.target_env,
                &chart.app_name,
                &chart.chart_dir,
                &base_values,
                &[],
            )
            .await?;
        }
        Commands::Microservice { chart, version } => {
            deploy_standard(
                &ctx,
                &chart.target_env,
                &chart.app_name,
                &chart.chart_dir,
                &base_values,
                &microservice_edits(&version.app_version),
            )
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
