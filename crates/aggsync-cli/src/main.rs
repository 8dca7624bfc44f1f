//! # AggSync CLI
//!
//! Producer (`put`) and consumer (`get`) tools for the aggregator.

use aggsync_client::{load_reading, AggClient, ClientConfig, ServerAddress};
use aggsync_core::Snapshot;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "put" => {
            if args.len() < 4 {
                eprintln!("Usage: aggsync put <url> <file> [--every <seconds>]");
                std::process::exit(1);
            }
            let every = parse_every(&args[4..])?;
            put(&args[2], Path::new(&args[3]), every).await?;
        }
        "get" => {
            let address = args.get(2).map_or("", String::as_str);
            get(address).await?;
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_every(rest: &[String]) -> Result<Option<Duration>> {
    match rest {
        [] => Ok(None),
        [flag, secs] if flag == "--every" => {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid --every value '{secs}'"))?;
            if secs == 0 {
                bail!("--every must be at least 1 second");
            }
            Ok(Some(Duration::from_secs(secs)))
        }
        _ => bail!("Unexpected arguments: {}", rest.join(" ")),
    }
}

fn client_for(address: &str) -> Result<AggClient> {
    let address = ServerAddress::parse(address).context("Invalid aggregator address")?;
    let config = ClientConfig {
        address,
        ..ClientConfig::default()
    };
    AggClient::new(config).context("Failed to create client")
}

async fn put(address: &str, file: &Path, every: Option<Duration>) -> Result<()> {
    let mut client = client_for(address)?;
    println!("Sending to {}", client.address());

    let Some(period) = every else {
        return put_once(&mut client, file).await;
    };

    tracing::info!(period_secs = period.as_secs(), file = %file.display(), "Sending periodically");
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Keep going on failure: the next round may succeed.
                if let Err(err) = put_once(&mut client, file).await {
                    tracing::warn!(error = %format!("{err:#}"), "PUT failed, retrying next round");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(clock = client.clock(), "Shutdown signal received");
                println!("Stopped");
                return Ok(());
            }
        }
    }
}

async fn put_once(client: &mut AggClient, file: &Path) -> Result<()> {
    // Re-read each round so edits to the file are picked up.
    let reading = load_reading(file).await?;
    if reading.is_empty() {
        tracing::warn!(file = %file.display(), "Data file has no key:value lines");
    }
    let reply = client.put(&reading).await.context("PUT request failed")?;

    println!(
        "{} {} (server clock {}, local clock {})",
        reply.status.code(),
        reply.status.reason(),
        reply
            .server_clock
            .map_or_else(|| "-".to_string(), |c| c.to_string()),
        reply.local_clock
    );
    Ok(())
}

async fn get(address: &str) -> Result<()> {
    let mut client = client_for(address)?;
    let reply = client.get().await.context("GET request failed")?;
    tracing::debug!(
        keys = reply.data.len(),
        server_clock = ?reply.server_clock,
        local_clock = reply.local_clock,
        "GET reply"
    );

    print!("{}", render(&reply.data));
    Ok(())
}

fn render(data: &Snapshot) -> String {
    if data.is_empty() {
        return "No data received.\n".to_string();
    }
    data.iter().fold(String::new(), |mut out, (key, value)| {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
        out
    })
}

fn print_help() {
    println!(
        r"AggSync CLI

USAGE:
    aggsync <COMMAND> [OPTIONS]

COMMANDS:
    put <url> <file> [--every <seconds>]
                      Send key:value lines from <file> to the aggregator;
                      with --every, resend on an interval until Ctrl+C
    get [address]     Print the aggregated data, one 'key: value' per line
    help              Show this help message

ADDRESSES:
    http://host:port, host:port or host (default port 4567)

EXAMPLES:
    aggsync put http://localhost:4567 station.txt --every 10
    aggsync get localhost:4567
"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lines() {
        let data: Snapshot = [("air_temp", "13.3"), ("id", "IDS60901")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(render(&data), "air_temp: 13.3\nid: IDS60901\n");
        assert_eq!(render(&Snapshot::new()), "No data received.\n");
    }

    #[test]
    fn every_flag() {
        assert_eq!(parse_every(&[]).unwrap(), None);
        let args = vec!["--every".to_string(), "15".to_string()];
        assert_eq!(parse_every(&args).unwrap(), Some(Duration::from_secs(15)));
        let zero = vec!["--every".to_string(), "0".to_string()];
        assert!(parse_every(&zero).is_err());
        assert!(parse_every(&["--often".to_string()]).is_err());
    }

    #[tokio::test]
    async fn put_once_reports_unreachable_aggregator() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"temp:20\n").unwrap();

        // Nothing listens on port 1
        let mut client = client_for("127.0.0.1:1").unwrap();
        let err = put_once(&mut client, file.path()).await.unwrap_err();
        assert!(format!("{err:#}").contains("PUT request failed"));
    }

    #[tokio::test]
    async fn put_once_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = client_for("127.0.0.1:1").unwrap();

        let err = put_once(&mut client, &dir.path().join("station.txt"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("station.txt"));
    }
}
