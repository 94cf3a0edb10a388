//! Command line interface for the relay bridge. Publishes signed events to
//! every configured relay, queries them with merged results, and streams
//! live subscriptions.

use std::{fs, path::Path, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};

use relayr::config::Settings;
use relayr::{Event, Filter, RelayPool, SubscriptionCoordinator};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "relayr",
    author,
    version,
    about = "Fan-out publish/subscribe bridge for Nostr relays"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Publish one or more signed event files to every configured relay.
    Publish {
        /// Paths to JSON event files to publish.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Query all relays and print the merged, deduplicated events.
    Query {
        /// JSON filters, one per argument.
        #[arg(required = true)]
        filters: Vec<String>,
    },
    /// Stream live events matching the filters until interrupted.
    Listen {
        /// JSON filters, one per argument.
        #[arg(required = true)]
        filters: Vec<String>,
        /// Subscription id shared across relays.
        #[arg(long, default_value = "listen")]
        id: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let pool = RelayPool::new(&cfg.relays, cfg.tor_socks.clone())?;
    match cli.command {
        Commands::Publish { files } => {
            for file in files {
                let data = fs::read_to_string(&file)?;
                let event: Event = serde_json::from_str(&data)?;
                let summary = pool.publish(&event).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Commands::Query { filters } => {
            let filters = parse_filters(&filters)?;
            for event in pool.query(&filters, "cli-query").await {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Commands::Listen { filters, id } => {
            let filters = parse_filters(&filters)?;
            let coordinator = SubscriptionCoordinator::new(pool.connections().to_vec())?;
            coordinator
                .create_subscription(
                    &id,
                    &filters,
                    Arc::new(|event: Event| {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{line}");
                        }
                    }),
                    Arc::new(|| tracing::info!("all relays reached end of stored events")),
                    Arc::new(|reason: String| {
                        tracing::warn!(%reason, "subscription closed by relay")
                    }),
                )
                .await?;
            tokio::signal::ctrl_c().await?;
            coordinator.close_subscription(&id);
        }
    }
    Ok(())
}

/// Parse one JSON filter per CLI argument.
fn parse_filters(args: &[String]) -> Result<Vec<Filter>> {
    args.iter()
        .map(|raw| serde_json::from_str(raw).map_err(Into::into))
        .collect()
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(env_path, "RELAYS=\nTOR_SOCKS=\n")?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_vars() {
        for v in ["RELAYS", "TOR_SOCKS"] {
            std::env::remove_var(v);
        }
    }

    fn signed_event_json() -> Value {
        json!({
            "id": "11".repeat(32),
            "pubkey": "ab".repeat(32),
            "kind": 1,
            "created_at": 1,
            "tags": [],
            "content": "",
            "sig": "cd".repeat(64),
        })
    }

    #[test]
    fn parse_filters_accepts_json_objects() {
        let filters = parse_filters(&[
            r#"{"kinds":[1],"limit":5}"#.to_string(),
            r##"{"#t":["news"]}"##.to_string(),
        ])
        .unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].kinds, Some(vec![1]));
        assert_eq!(filters[1].tags["#t"], vec!["news".to_string()]);
    }

    #[test]
    fn parse_filters_rejects_garbage() {
        assert!(parse_filters(&["not json".to_string()]).is_err());
    }

    #[test]
    fn ensure_env_file_scaffolds_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/.env");
        ensure_env_file(path.to_str().unwrap()).unwrap();
        let data = fs::read_to_string(&path).unwrap();
        assert!(data.contains("RELAYS="));
        // An existing file is left alone.
        fs::write(&path, "RELAYS=ws://keep\n").unwrap();
        ensure_env_file(path.to_str().unwrap()).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("ws://keep"));
    }

    #[tokio::test]
    async fn run_publish_prints_summary() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(TMsg::Text(text))) = ws.next().await {
                let val: Value = serde_json::from_str(&text).unwrap();
                if val[0] == "EVENT" {
                    let id = val[1]["id"].as_str().unwrap();
                    ws.send(TMsg::Text(json!(["OK", id, true, "stored"]).to_string()))
                        .await
                        .unwrap();
                }
            }
        });

        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, format!("RELAYS={url}\n")).unwrap();
        let ev_path = dir.path().join("ev.json");
        fs::write(&ev_path, signed_event_json().to_string()).unwrap();

        run(Cli {
            env: env_path.to_str().unwrap().into(),
            command: Commands::Publish {
                files: vec![ev_path.to_str().unwrap().into()],
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_query_merges_relay_answers() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            if let Some(Ok(TMsg::Text(text))) = ws.next().await {
                let val: Value = serde_json::from_str(&text).unwrap();
                let sub = val[1].as_str().unwrap().to_string();
                ws.send(TMsg::Text(
                    json!(["EVENT", sub, signed_event_json()]).to_string(),
                ))
                .await
                .unwrap();
                ws.send(TMsg::Text(json!(["EOSE", sub]).to_string()))
                    .await
                    .unwrap();
            }
            while ws.next().await.is_some() {}
        });

        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, format!("RELAYS={url}\n")).unwrap();

        run(Cli {
            env: env_path.to_str().unwrap().into(),
            command: Commands::Query {
                filters: vec![r#"{"kinds":[1]}"#.to_string()],
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_errors_without_relays() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "RELAYS=\n").unwrap();
        let result = run(Cli {
            env: env_path.to_str().unwrap().into(),
            command: Commands::Query {
                filters: vec!["{}".to_string()],
            },
        })
        .await;
        assert!(result.is_err());
    }
}
