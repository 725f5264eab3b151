use anyhow::{Context, Result};
use clap::Parser;
use music_catalog::auth::UserStore;
use music_catalog::db;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "create-user")]
#[command(about = "Create a catalog user and print its API token", long_about = None)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "catalog.db")]
    database: PathBuf,

    /// Name of the new user
    username: String,

    /// Grant administrator rights (create, update and delete tracks)
    #[arg(long, default_value = "false")]
    admin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    let username = cli.username.trim();
    if username.is_empty() {
        anyhow::bail!("Username must not be empty");
    }

    tracing::info!("Database: {}", cli.database.display());

    let pool = db::connect(&cli.database)
        .await
        .context("Failed to open catalog database")?;

    let (user, token) = UserStore::new(pool)
        .create(username, cli.admin)
        .await
        .context("Failed to create user")?;

    println!("Created user '{}' (id {})", user.username, user.id);
    if user.is_admin {
        println!("Role: admin");
    }
    println!("Token: {}", token);
    println!();
    println!("The token is shown only once. Send it as 'Authorization: Bearer <token>'.");

    Ok(())
}
