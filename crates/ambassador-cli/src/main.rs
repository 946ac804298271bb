//! # Ambassador CLI Entry Point
//!
//! The ambassador binary runs alongside a container (typically wrapping its
//! main process) and keeps the container's services advertised in etcd.
//!
//! ## Usage
//!
//! ```bash
//! # Wrap a command: publish this container's services while it runs
//! ambassador run --etcd http://127.0.0.1:2379 -- rackup
//!
//! # Publish without wrapping anything (pure sidecar)
//! ambassador run
//!
//! # Call a discovered service (outputs raw JSON)
//! ambassador call user --id 12345
//! ambassador call internal.admin --action activate --method POST
//! ```

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use argh::FromArgs;
use tokio::sync::watch;
use tracing::{info, warn};

use ambassador_agent::{ContainerDescriptor, DockerInspector, Publisher, PublisherConfig};
use ambassador_common::{EtcdStore, KeyValueStore, PropertyTree};
use ambassador_services::{CallOptions, Method, ServiceClient};

mod config;

use config::Config;

/// Ambassador - publish and discover container services through etcd
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
    Call(CallArgs),
}

/// Arguments for the publishing sidecar.
///
/// With a command given, the command is spawned with shared properties
/// injected into its environment and supervised until it exits; the
/// heartbeat loop runs alongside and is shut down when the command stops.
/// Without a command, the heartbeat runs until SIGINT/SIGTERM.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// publish this container's services, optionally wrapping a command
struct RunArgs {
    /// etcd endpoint, e.g. http://127.0.0.1:2379 (env: ETCD_URL)
    #[argh(option)]
    etcd: Option<String>,

    /// docker engine endpoint, e.g. tcp://127.0.0.1:2375 (env: DOCKER_URL)
    #[argh(option)]
    docker: Option<String>,

    /// root path services are advertised under (env: PUBLISHER_PATH)
    #[argh(option)]
    services_path: Option<String>,

    /// root path of shared properties injected into the wrapped command
    /// (env: PROPERTIES_PATH)
    #[argh(option)]
    properties_path: Option<String>,

    /// ttl in seconds for published entries; the republish period is 2/3
    /// of this (env: PUBLISHER_TTL)
    #[argh(option)]
    ttl: Option<u64>,

    /// container identifier to inspect, defaulting to this host's hostname
    #[argh(option)]
    container: Option<String>,

    /// command to wrap, with its arguments
    #[argh(positional, greedy)]
    command: Vec<String>,
}

/// Arguments for a one-shot service call.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a discovered service and print the JSON response
struct CallArgs {
    /// service name; dots select nested services (internal.user)
    #[argh(positional)]
    service: String,

    /// entity id appended as a path segment
    #[argh(option)]
    id: Option<String>,

    /// trailing verb segment for a generic call
    #[argh(option)]
    action: Option<String>,

    /// HTTP method: GET, POST, PUT, PATCH or DELETE
    #[argh(option, short = 'm', default = "\"GET\".to_string()")]
    method: String,

    /// JSON attributes: query string for GET, body otherwise
    #[argh(option, short = 'a', default = "\"{}\".to_string()")]
    args: String,

    /// etcd endpoint (env: ETCD_URL)
    #[argh(option)]
    etcd: Option<String>,

    /// root path services are advertised under (env: PUBLISHER_PATH)
    #[argh(option)]
    services_path: Option<String>,
}

fn parse_method(raw: &str) -> Result<Method> {
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::Get),
        "POST" => Ok(Method::Post),
        "PUT" => Ok(Method::Put),
        "PATCH" => Ok(Method::Patch),
        "DELETE" => Ok(Method::Delete),
        other => Err(anyhow!("unsupported method: {}", other)),
    }
}

/// Reads the shared properties subtree into environment-variable shape.
///
/// `mysql/host` becomes `MYSQL_HOST`. Failure is a warning: a missing or
/// unreachable properties subtree must not keep the wrapped command from
/// starting.
async fn shared_env(
    store: Arc<dyn KeyValueStore>,
    properties_path: &str,
) -> std::collections::HashMap<String, String> {
    let tree = PropertyTree::new(store, properties_path);
    let mut env = std::collections::HashMap::new();
    if let Err(e) = tree
        .inject_into(&mut env, |key| key.replace('/', "_").to_uppercase())
        .await
    {
        warn!(error = %e, "unable to inject shared properties into environment");
    }
    env
}

async fn run(args: RunArgs) -> Result<i32> {
    let config = Config::from_env()?.with_overrides(
        args.etcd,
        args.docker,
        args.services_path,
        args.properties_path,
        args.ttl,
    )?;

    let store: Arc<dyn KeyValueStore> = Arc::new(EtcdStore::new(&config.etcd_url));
    let inspector = Arc::new(DockerInspector::new(&config.docker_url));

    let mut descriptor = ContainerDescriptor::new(inspector);
    if let Some(container) = args.container {
        descriptor = descriptor.with_ident(container);
    }

    let publisher = Publisher::new(
        descriptor,
        store.clone(),
        &config.services_path,
        PublisherConfig {
            ttl: config.ttl,
            ..Default::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = publisher.spawn(shutdown_rx);

    let exit_code = if args.command.is_empty() {
        info!("no command to wrap, publishing until interrupted");
        wait_for_signal().await?;
        0
    } else {
        let env = shared_env(store, &config.properties_path).await;
        supervise(&args.command, env).await?
    };

    // Stop the heartbeat between iterations; outstanding writes finish
    // before the task observes the flag.
    let _ = shutdown_tx.send(true);
    let _ = heartbeat.await;

    Ok(exit_code)
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

/// Spawns the wrapped command and supervises it to completion.
///
/// SIGINT/SIGTERM stop the child; the publisher is torn down by the caller
/// once the child is gone, so a shutdown never leaves a half-written
/// heartbeat behind.
async fn supervise(
    command: &[String],
    extra_env: std::collections::HashMap<String, String>,
) -> Result<i32> {
    let mut child = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .envs(extra_env)
        .spawn()
        .with_context(|| format!("failed to start command: {}", command[0]))?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping wrapped command");
                let _ = child.start_kill();
            }
            _ = sigterm.recv() => {
                info!("termination requested, stopping wrapped command");
                let _ = child.start_kill();
            }
        }
    };

    Ok(status.code().unwrap_or(1))
}

async fn call(args: CallArgs) -> Result<()> {
    let config = Config::from_env()?.with_overrides(
        args.etcd,
        None,
        args.services_path,
        None,
        None,
    )?;

    let attrs: serde_json::Value =
        serde_json::from_str(&args.args).context("attributes are not valid JSON")?;
    let method = parse_method(&args.method)?;

    let store: Arc<dyn KeyValueStore> = Arc::new(EtcdStore::new(&config.etcd_url));
    let client = ServiceClient::new(store, &config.services_path);
    let service = client.service(&args.service);

    let request = match (args.id, args.action) {
        (Some(id), Some(action)) => service
            .context([id])
            .call(&action, attrs, CallOptions::method(method)),
        (Some(id), None) => match method {
            Method::Get => service.find(&id, attrs),
            _ => service.context([id]).call("", attrs, CallOptions::method(method)),
        },
        (None, Some(action)) => service.call(&action, attrs, CallOptions::method(method)),
        (None, None) => match method {
            Method::Post => service.create(attrs),
            _ => service.call("", attrs, CallOptions::method(method)),
        },
    };

    let value = client.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `call` output clean for unix tool usage (piping to jq, etc.).
    if !matches!(&cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Run(args) => {
            let code = run(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Call(args) => call(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_with_command() {
        let args: Cli = Cli::from_args(
            &["ambassador"],
            &["run", "--etcd", "http://127.0.0.1:2379", "--ttl", "60", "rackup", "-p", "8080"],
        )
        .unwrap();
        match args.command {
            Commands::Run(RunArgs { etcd, ttl, command, .. }) => {
                assert_eq!(etcd.as_deref(), Some("http://127.0.0.1:2379"));
                assert_eq!(ttl, Some(60));
                assert_eq!(command, vec!["rackup", "-p", "8080"]);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_without_command() {
        let args: Cli = Cli::from_args(&["ambassador"], &["run"]).unwrap();
        match args.command {
            Commands::Run(RunArgs { command, etcd, .. }) => {
                assert!(command.is_empty());
                assert_eq!(etcd, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(
            &["ambassador"],
            &["call", "user", "--id", "12345", "-a", r#"{"page":2}"#],
        )
        .unwrap();
        match args.command {
            Commands::Call(CallArgs { service, id, method, args, .. }) => {
                assert_eq!(service, "user");
                assert_eq!(id.as_deref(), Some("12345"));
                assert_eq!(method, "GET");
                assert_eq!(args, r#"{"page":2}"#);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_with_action_and_method() {
        let args: Cli = Cli::from_args(
            &["ambassador"],
            &["call", "internal.admin", "--action", "activate", "-m", "POST"],
        )
        .unwrap();
        match args.command {
            Commands::Call(CallArgs { service, action, method, .. }) => {
                assert_eq!(service, "internal.admin");
                assert_eq!(action.as_deref(), Some("activate"));
                assert_eq!(method, "POST");
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::Get);
        assert_eq!(parse_method("POST").unwrap(), Method::Post);
        assert_eq!(parse_method("delete").unwrap(), Method::Delete);
        assert!(parse_method("TRACE").is_err());
    }
}
