use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tr064::{LoggingMode, Tr064Client, Tr064Config};

/// TR-064 command line client
///
/// Lists the services of a home gateway, invokes actions and streams events.
#[derive(Parser, Debug)]
#[command(name = "tr064")]
#[command(about = "Talk to TR-064/UPnP home gateways")]
#[command(version)]
pub struct Args {
    /// Gateway base URL [default: http://fritz.box:49000]
    #[arg(short, long)]
    pub url: Option<String>,

    /// Username for digest authentication
    #[arg(short = 'U', long)]
    pub username: Option<String>,

    /// Password for digest authentication
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// JSON configuration file; command line options override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stay on plain HTTP instead of switching to the secure port
    #[arg(long)]
    pub no_ssl: bool,

    /// Skip the IGD descriptor
    #[arg(long)]
    pub no_igd: bool,

    /// Log output: silent, development, debug or json
    #[arg(long, default_value = "development")]
    pub log_mode: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List services, their actions and whether they send events
    Describe {
        /// Print the full description of every service as JSON
        #[arg(long)]
        json: bool,
    },
    /// Invoke an action
    Exec {
        /// Service id or service type
        service: String,
        /// Action name, e.g. GetInfo
        action: String,
        /// Input arguments as NAME=VALUE
        #[arg(value_parser = parse_argument)]
        arguments: Vec<(String, String)>,
    },
    /// Subscribe to every evented service and print events
    Observe {
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Show the host table, or the given MAC addresses only
    Hosts {
        #[arg(long = "mac")]
        macs: Vec<String>,
    },
    /// Print the WAN IPv4 address
    ExternalIp,
}

impl Args {
    /// Build the client configuration from the file, environment and flags
    pub fn to_config(&self) -> Result<Tr064Config> {
        self.to_config_with(|key| std::env::var(key).ok())
    }

    /// Layer the file, then `env`, then the command line flags
    fn to_config_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<Tr064Config> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Tr064Config::from_json_str(&json)?
            }
            None => Tr064Config::new(),
        };

        if let Some(url) = env("TR064_URL") {
            config.url = url;
        }
        if let Some(username) = env("TR064_USERNAME") {
            config.username = Some(username);
        }
        if let Some(password) = env("TR064_PASSWORD") {
            config.password = Some(password);
        }

        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(username) = &self.username {
            config.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if self.no_ssl {
            config.auto_ssl = false;
        }
        if self.no_igd {
            config.igd = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// `NAME=VALUE` -> (`NAME`, `VALUE`); the value may contain `=`
fn parse_argument(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", s))?;
    if name.is_empty() {
        return Err(anyhow!("argument name must not be empty"));
    }
    Ok((name.to_string(), value.to_string()))
}

async fn describe(client: &Tr064Client, json: bool) -> Result<()> {
    if json {
        let mut descriptions = Vec::new();
        for service in client.registry().await?.services() {
            descriptions.push(service.describe().await?);
        }
        println!("{}", serde_json::to_string_pretty(&descriptions)?);
        return Ok(());
    }

    for summary in client.describe().await? {
        let marker = if summary.sends_events { " [events]" } else { "" };
        println!("{}{}", summary.id, marker);
        for action in summary.actions {
            println!("  {}", action);
        }
    }
    Ok(())
}

async fn exec(client: &Tr064Client, service: &str, action: &str, arguments: &[(String, String)]) -> Result<()> {
    let arguments: Vec<(&str, &str)> = arguments
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let outputs = client
        .exec(service, action, &arguments)
        .await
        .with_context(|| format!("{} on {} failed", action, service))?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

async fn observe(client: &Tr064Client, count: Option<usize>) -> Result<()> {
    let mut events = client.observe().await?;
    info!("Waiting for events, press Ctrl+C to stop");

    let mut received = 0;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    received += 1;
                    if count.is_some_and(|limit| received >= limit) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event output fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

async fn hosts(client: &Tr064Client, macs: &[String]) -> Result<()> {
    let hosts = if macs.is_empty() {
        client.all_hosts().await?
    } else {
        client.host_infos(macs).await?
    };

    for host in hosts {
        println!(
            "{:<17}  {:<15}  {:<6}  {}",
            host.mac,
            host.ip.as_deref().unwrap_or("-"),
            if host.active { "active" } else { "-" },
            host.name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = args.to_config()?;
    info!(url = %config.url, "Connecting");
    let client = Tr064Client::new(config)?;

    let result = match &args.command {
        Command::Describe { json } => describe(&client, *json).await,
        Command::Exec {
            service,
            action,
            arguments,
        } => exec(&client, service, action, arguments).await,
        Command::Observe { count } => observe(&client, *count).await,
        Command::Hosts { macs } => hosts(&client, macs).await,
        Command::ExternalIp => {
            let ip = client.external_ipv4().await?;
            println!("{}", ip);
            Ok(())
        }
    };

    if let Err(e) = client.shutdown().await {
        warn!(error = %e, "Shutdown incomplete");
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mode = match std::env::var("TR064_LOG_MODE") {
        Ok(mode) => mode.parse::<LoggingMode>()?,
        Err(_) => args.log_mode.parse::<LoggingMode>()?,
    };
    tr064::init_logging(mode)?;

    run(args).await
}
