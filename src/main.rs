use anyhow::Context;
use serde_json::json;
use splitledger::{config::Config, db::init_db_with, Ledger, Repository, User, UserId};
use std::sync::Arc;

const USAGE: &str = "usage: splitledger [settle|balances|merge]";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let command = std::env::args().nth(1).unwrap_or_else(|| "settle".to_string());

    if let Err(e) = run(&config, &command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: &Config, command: &str) -> anyhow::Result<()> {
    let pool = init_db_with(&config.database_path, config.max_connections)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let ledger = Ledger::from_config(Arc::new(Repository::new(pool)), config);

    let output = match command {
        "settle" => {
            let users = ledger.users().await?;
            let settlements = ledger.settlements().await?;
            let lines: Vec<_> = settlements
                .iter()
                .map(|s| {
                    json!({
                        "from": name_of(&users, &s.from_user),
                        "to": name_of(&users, &s.to_user),
                        "amount": s.amount.format(s.currency),
                        "currency": s.currency,
                        "settlement": s,
                    })
                })
                .collect();
            json!({ "settlements": lines })
        }
        "balances" => json!({ "balances": ledger.balances().await? }),
        "merge" => serde_json::to_value(ledger.merge_bills().await?)?,
        other => anyhow::bail!("unknown command {:?}; {}", other, USAGE),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn name_of<'a>(users: &'a [User], id: &UserId) -> &'a str {
    users
        .iter()
        .find(|u| &u.id == id)
        .map(|u| u.name.as_str())
        .unwrap_or("unknown user")
}
