//! Schema migration runner.
//!
//! `migration [up|down|status|fresh]`, default `up`. Reads the database URL from
//! `DATABASE_URL`, falling back to the application configuration.

use anyhow::{bail, Context};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use food_order_api::{
    config,
    db::{self, DbConfig},
    migrator::Migrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());

    let db_config = match std::env::var("DATABASE_URL") {
        Ok(url) => DbConfig {
            url,
            ..DbConfig::default()
        },
        Err(_) => {
            let cfg = config::load_config().context("failed to load configuration")?;
            DbConfig::from(&cfg)
        }
    };

    let conn = db::establish_connection_with_config(&db_config)
        .await
        .context("failed to connect to database")?;

    match command.as_str() {
        "up" => {
            info!("Applying pending migrations");
            Migrator::up(&conn, None).await?;
        }
        "down" => {
            info!("Rolling back the last migration");
            Migrator::down(&conn, Some(1)).await?;
        }
        "fresh" => {
            info!("Dropping all tables and re-applying migrations");
            Migrator::fresh(&conn).await?;
        }
        "status" => {
            Migrator::status(&conn).await?;
        }
        other => bail!("unknown command '{}': expected up, down, status or fresh", other),
    }

    info!("Migration command '{}' completed", command);
    Ok(())
}
