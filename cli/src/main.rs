mod config;
mod server;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::process;

use crate::config::Config;
use journal_core::auth;
use journal_core::db::Database;

#[derive(Parser)]
#[command(
    name = "journal",
    version,
    about = "A personal journaling backend",
    long_about = "Daily entries, habit tracking, and quick notes behind a small REST API."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
    /// Create a user account directly in the database
    Register {
        /// Username
        username: String,
        /// Password (at least 4 characters)
        password: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            let (jwt_secret, _new) = config.load_or_create_jwt_secret()?;
            server::start_server(db, port, &bind, jwt_secret).await
        }
        Commands::Register { username, password } => {
            if password.len() < 4 {
                bail!("Password must be at least 4 characters");
            }
            if db.get_user_by_username(&username)?.is_some() {
                bail!("Username '{username}' already exists");
            }
            let hash = auth::hash_password(&password)?;
            let user = db.create_user(&username, &hash)?;
            println!("Created user '{}' (id {})", user.username, user.id);
            Ok(())
        }
    }
}
