use anyhow::{anyhow, bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use messengerd::config::ServerConfig;
use messengerd::server;

#[derive(Debug, Default)]
struct Args {
    listen: Option<SocketAddr>,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--listen" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--listen requires a value"))?;
                    parsed.listen = Some(
                        SocketAddr::from_str(&value)
                            .with_context(|| format!("invalid --listen value: {value}"))?,
                    );
                }
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    parsed.db = Some(PathBuf::from(value));
                }
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--config requires a value"))?;
                    parsed.config = Some(PathBuf::from(value));
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {other}"),
            }
        }
        Ok(parsed)
    }
}

fn print_help() {
    println!("messengerd [--listen HOST:PORT] [--db PATH] [--config PATH]");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "messengerd=info,libmessenger=info".into()),
        )
        .init();

    let args = Args::parse()?;
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }

    server::run(config).await
}
