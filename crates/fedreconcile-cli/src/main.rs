//! FedReconcile CLI
//!
//! Command-line client for a running FedReconcile relay: log in, submit a
//! GTAS/ERP pair for validation and collect the returned reports.

mod client;
mod credentials;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use client::RelayClient;
use fedreconcile_core::ClientSession;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "fedreconcile")]
#[command(about = "FedReconcile - GTAS/ERP trial balance validation client", long_about = None)]
struct Cli {
    /// Base URL of the relay server
    #[arg(
        long,
        env = "FEDRECONCILE_SERVER",
        default_value = "http://127.0.0.1:3000",
        global = true
    )]
    server: String,

    /// Where the login credential is kept (default: ~/.fedreconcile/credential)
    #[arg(long, env = "FEDRECONCILE_CREDENTIAL_FILE", global = true)]
    credential_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "330", global = true)]
    timeout_secs: u64,

    /// Log verbosely
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and save the credential
    Login {
        #[arg(short, long, env = "FEDRECONCILE_USERNAME")]
        username: String,

        #[arg(short, long, env = "FEDRECONCILE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Print the credential instead of only saving it
        #[arg(long)]
        print: bool,
    },
    /// Discard the saved credential
    Logout,
    /// Show who the saved credential belongs to
    Whoami,
    /// Validate a GTAS report against ERP balances and download the results
    Validate {
        /// GTAS trial balance file
        #[arg(long, value_name = "FILE")]
        gtas: PathBuf,

        /// ERP balances file
        #[arg(long, value_name = "FILE")]
        erp: PathBuf,

        /// Directory the returned reports are written to
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,

        /// Log in with these credentials instead of the saved one
        #[arg(short, long, env = "FEDRECONCILE_USERNAME", requires = "password")]
        username: Option<String>,

        #[arg(short, long, env = "FEDRECONCILE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let credential_path = match cli.credential_file {
        Some(path) => path,
        None => credentials::default_path()?,
    };
    let client = RelayClient::new(&cli.server, Duration::from_secs(cli.timeout_secs))?;

    match cli.command {
        Commands::Login {
            username,
            password,
            print,
        } => {
            let session = client.login(&username, &password).await?;
            credentials::save(&credential_path, &session)?;
            println!(
                "Logged in as {} ({}); credential expires {}",
                session.subject_id(),
                session.role(),
                session.claims().expires_at
            );
            if print {
                println!("{}", session.credential());
            }
        }
        Commands::Logout => {
            if let Some(session) = credentials::load(&credential_path)? {
                session.logout();
            }
            if credentials::remove(&credential_path)? {
                println!("Logged out");
            } else {
                println!("No saved credential");
            }
        }
        Commands::Whoami => match credentials::load(&credential_path)? {
            Some(session) => println!(
                "{} ({}), expires {}",
                session.subject_id(),
                session.role(),
                session.claims().expires_at
            ),
            None => bail!("Not logged in. Run `fedreconcile login` first."),
        },
        Commands::Validate {
            gtas,
            erp,
            out,
            username,
            password,
        } => {
            let session = match (username, password) {
                (Some(username), Some(password)) => client.login(&username, &password).await?,
                _ => saved_session(&credential_path)?,
            };

            let reply = client.validate(&session, &gtas, &erp).await?;
            println!("{}", reply.message);

            // Artifacts disappear once the grace window closes; fetch them right away
            let urls = [reply.exception_report_url, reply.fbdi_journal_url];
            let mut saved = 0;
            for url in urls.iter().flatten() {
                let artifact = client.download(url, &out).await?;
                println!("  {} ({} bytes)", artifact.path.display(), artifact.bytes);
                saved += 1;
            }
            if saved == 0 {
                println!("  No reports were returned");
            }
        }
    }

    Ok(())
}

fn saved_session(path: &std::path::Path) -> Result<ClientSession> {
    match credentials::load(path)? {
        Some(session) => Ok(session),
        None => bail!("Not logged in or session expired. Run `fedreconcile login` first."),
    }
}
