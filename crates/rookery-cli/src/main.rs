//! # Rookery CLI Entry Point
//!
//! Operational front end for the rookery registry client.
//!
//! ## Usage
//!
//! ```bash
//! # Register this service and keep the lease alive until Ctrl-C
//! rookery run --config config/ --filename registry-client
//!
//! # One-shot discovery query by application id
//! rookery instances --config config/ accounts-service
//!
//! # One-shot discovery query by vip address
//! rookery instances --config config/ --vip accounts.service
//! ```

use anyhow::Result;
use argh::FromArgs;

use rookery_client::{ClientEvent, RookeryClient};
use rookery_common::ClientConfig;

/// Rookery - service-registry registration and discovery client
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
    Instances(InstancesArgs),
}

/// register with the configured registry and heartbeat until interrupted
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
struct RunArgs {
    /// directory holding the configuration files
    #[argh(option, short = 'c', default = "\"config/\".into()")]
    config: String,

    /// configuration file basename (without extension)
    #[argh(option, short = 'f', default = "\"registry-client\".into()")]
    filename: String,
}

/// query cached instances once and print them as JSON lines
#[derive(FromArgs)]
#[argh(subcommand, name = "instances")]
struct InstancesArgs {
    /// directory holding the configuration files
    #[argh(option, short = 'c', default = "\"config/\".into()")]
    config: String,

    /// configuration file basename (without extension)
    #[argh(option, short = 'f', default = "\"registry-client\".into()")]
    filename: String,

    /// look up by vip address instead of application id
    #[argh(switch)]
    vip: bool,

    /// application id (or vip address with --vip)
    #[argh(positional)]
    key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `instances` output clean for unix tool usage (piping to jq).
    if matches!(cli.command, Commands::Run(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Instances(args) => instances(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = ClientConfig::load(&args.config, &args.filename)?;
    tracing::info!(
        "starting registry client for app {} against {}",
        config.instance.app,
        config.eureka.host
    );

    let client = RookeryClient::new(config)?;
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!("client event: {}", event.name());
        }
    });

    client.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("deregistering from the registry...");
    client.stop().await?;
    Ok(())
}

async fn instances(args: InstancesArgs) -> Result<()> {
    let mut config = ClientConfig::load(&args.config, &args.filename)?;
    // discovery only: no registration traffic for a read-only query
    config.eureka.register_with_eureka = false;

    let client = RookeryClient::new(config)?;
    client.fetch_registry().await?;

    let instances = if args.vip {
        client.instances_by_vip_address(&args.key).await?
    } else {
        client.instances_by_app_id(&args.key).await?
    };
    for instance in instances {
        println!("{}", serde_json::to_string(&instance)?);
    }
    Ok(())
}
