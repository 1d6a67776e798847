use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::Write;

use pgdiff::config::{self, Config, ConnectionConfig};
use pgdiff::utils::init_logging;
use pgdiff::PgDiffClient;

/// Print the SQL that makes TARGET structurally match SOURCE
#[derive(Debug, Parser)]
#[command(name = "pgdiff", version, about)]
struct Args {
    /// Schema to copy from
    source: String,
    /// Schema to migrate
    target: String,

    /// TOML or YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Host for both schemas
    #[arg(long)]
    host: Option<String>,
    /// Port for both schemas
    #[arg(long)]
    port: Option<u16>,
    /// Database for both schemas
    #[arg(long)]
    db: Option<String>,
    /// Username for both schemas
    #[arg(long)]
    user: Option<String>,
    /// Password for both schemas
    #[arg(long = "pass")]
    password: Option<String>,

    /// Host for the source schema
    #[arg(long)]
    host1: Option<String>,
    /// Database for the source schema
    #[arg(long)]
    db1: Option<String>,
    /// Username for the source schema
    #[arg(long)]
    user1: Option<String>,
    /// Password for the source schema
    #[arg(long = "pass1")]
    password1: Option<String>,

    /// Host for the target schema
    #[arg(long)]
    host2: Option<String>,
    /// Database for the target schema
    #[arg(long)]
    db2: Option<String>,
    /// Username for the target schema
    #[arg(long)]
    user2: Option<String>,
    /// Password for the target schema
    #[arg(long = "pass2")]
    password2: Option<String>,

    /// Compare constraints by content instead of by name
    #[arg(long)]
    normalize_constraints: bool,
    /// Never emit ALTER SEQUENCE
    #[arg(long)]
    no_alter_sequences: bool,
    /// Ask for defaults of columns that become NOT NULL
    #[arg(long)]
    prompt: bool,

    /// Write statements to a file instead of stdout
    #[arg(short, long)]
    output: Option<String>,
    /// Emit one JSON record per statement
    #[arg(long)]
    json: bool,
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> Result<(Config, Output)> {
        let mut config = match &self.config {
            Some(path) => config::load_from_file(path).with_context(|| format!("loading {}", path))?,
            None => Config::default(),
        };

        overlay(&mut config.database, self.host, self.port, self.db, self.user, self.password);
        if self.host1.is_some() || self.db1.is_some() || self.user1.is_some() || self.password1.is_some() {
            let side = config.source.get_or_insert_with(ConnectionConfig::default);
            overlay(side, self.host1, None, self.db1, self.user1, self.password1);
        }
        if self.host2.is_some() || self.db2.is_some() || self.user2.is_some() || self.password2.is_some() {
            let side = config.target.get_or_insert_with(ConnectionConfig::default);
            overlay(side, self.host2, None, self.db2, self.user2, self.password2);
        }

        config.diff.normalize_constraints |= self.normalize_constraints;
        config.diff.no_alter_sequences |= self.no_alter_sequences;
        config.diff.prompt_for_defaults |= self.prompt;

        let output = Output {
            source: self.source,
            target: self.target,
            path: self.output,
            json: self.json,
            verbose: self.verbose,
        };
        Ok((config, output))
    }
}

struct Output {
    source: String,
    target: String,
    path: Option<String>,
    json: bool,
    verbose: u8,
}

fn overlay(
    connection: &mut ConnectionConfig,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
) {
    connection.host = host.or(connection.host.take());
    connection.port = port.or(connection.port);
    connection.database = database.or(connection.database.take());
    connection.user = user.or(connection.user.take());
    connection.password = password.or(connection.password.take());
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, output) = Args::parse().into_config()?;
    init_logging(&config.logging, output.verbose)?;

    let client = PgDiffClient::new(config).await?;
    let statements = client
        .migration_sql(&output.source, &output.target)
        .await
        .with_context(|| format!("comparing {} to {}", output.source, output.target))?;

    let mut rendered = String::new();
    if output.json {
        rendered.push_str(&serde_json::to_string_pretty(&statements)?);
        rendered.push('\n');
    } else {
        for statement in &statements {
            rendered.push_str(&statement.sql);
            rendered.push_str("\n\n");
        }
    }

    match &output.path {
        Some(path) => fs::write(path, rendered).with_context(|| format!("writing {}", path))?,
        None => std::io::stdout().write_all(rendered.as_bytes())?,
    }
    Ok(())
}
