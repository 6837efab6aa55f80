//! `trove` – inspects a store.
//!
//! Reads the configuration (`trove.toml` in the working directory, or the
//! file named by the first argument, then `TROVE_*` variables), opens the
//! store and lists its tables with their row counts. With a second argument
//! that statement is run and its result printed.

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use trove::{ExecuteOptions, QueryResult, Statement, Store, StoreConfig};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).compact().init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> trove::Result<()> {
    let mut arguments = std::env::args().skip(1);
    let file = arguments.next().unwrap_or_else(|| "trove".to_owned());
    let config = StoreConfig::load(&file)?;
    info!(path = %config.path, client = ?config.client, "opening store");
    let store = Store::open(config).await?;

    for table in store.tables().await? {
        let count = Statement::new(format!("select count(*) from {}", trove::sql::quote(&table)));
        let rows = match store.execute(count, ExecuteOptions::rows()).await? {
            QueryResult::Rows(rows) => rows,
            _ => Vec::new(),
        };
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(|(_, value)| value.as_i64())
            .unwrap_or(0);
        println!("{table}\t{count}");
    }

    if let Some(sql) = arguments.next() {
        match store.execute(sql, ExecuteOptions::rows()).await? {
            QueryResult::Rows(rows) => {
                for row in rows {
                    let line: Vec<String> = row.iter().map(|(c, v)| format!("{c}={v}")).collect();
                    println!("{}", line.join("\t"));
                }
            }
            QueryResult::Affected(n) => println!("{n} rows affected"),
            QueryResult::Present(present) => println!("{present}"),
        }
    }
    store.close().await
}
