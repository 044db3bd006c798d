//! `cf-session` command line entry point.
//!
//! ```bash
//! cf-session config   # store handle/email and password, then log in
//! cf-session test     # check connectivity and login state
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cf_session::config::{default_config_path, default_session_path};
use cf_session::{Client, ClientConfig, ClientError, ConfigError, Credentials, ProbeStatus};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "cf-session")]
struct Cli {
    /// Config file with `host` and `proxy` (default: ~/.cf/config)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Session file (default: ~/.cf/session)
    #[arg(long, value_name = "PATH", global = true)]
    session: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store login credentials and log in
    Config,
    /// Probe the site with the stored session
    Test,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to read input: {0}")]
    Input(#[from] io::Error),
    #[error("{0}")]
    Usage(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let session_path = match cli.session {
        Some(path) => path,
        None => default_session_path()?,
    };
    let config = ClientConfig::from_file(&config_path)?
        .with_session_path(session_path)
        .build()?;
    let client = Client::new(config).await?;

    match cli.command {
        Command::Config => configure(&client).await,
        Command::Test => test_connection(&client).await,
    }
}

async fn configure(client: &Client) -> Result<(), CliError> {
    let current = client.handle_or_email();
    let label = if current.is_empty() {
        "Handle or email:".to_string()
    } else {
        format!("Handle or email [{current}]:")
    };
    let mut handle_or_email = prompt(&label)?;
    if handle_or_email.is_empty() {
        handle_or_email = current;
    }
    if handle_or_email.is_empty() {
        return Err(CliError::Usage("a handle or email is required".into()));
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        return Err(CliError::Usage("a password is required".into()));
    }

    store_credentials(client, Credentials::new(handle_or_email, password)).await;
    let handle = client.login().await?;
    println!("Logged in as {handle}");
    Ok(())
}

/// Keep the credentials in memory even if they cannot be written out; the
/// login that follows still works and the next run asks again.
async fn store_credentials(client: &Client, credentials: Credentials) {
    if let Err(err) = client.set_credentials(credentials).await {
        log::warn!("credentials not saved: {err}; continuing with this run only");
    }
}

async fn test_connection(client: &Client) -> Result<(), CliError> {
    if !client.has_credentials() {
        return Err(CliError::Usage(
            "no credentials stored; run `cf-session config` first".into(),
        ));
    }

    println!("Testing connection to {}", client.config().host);
    match client.probe().await? {
        ProbeStatus::Healthy => {
            println!("OK, logged in as {}", client.current_handle());
            Ok(())
        }
        status => Err(CliError::Usage(status.to_string())),
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use cf_session::{Session, SessionError, SessionStore};

    /// Store that refuses every write.
    struct ReadOnlyStore;

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn load(&self) -> Result<Session, SessionError> {
            Err(SessionError::NotFound {
                path: PathBuf::from("/read-only/session"),
            })
        }

        async fn save(&self, _session: &Session) -> Result<(), SessionError> {
            Err(SessionError::Io {
                path: Path::new("/read-only/session").to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn describe(&self) -> String {
            "read-only".to_string()
        }
    }

    #[tokio::test]
    async fn unsaved_credentials_are_still_used() {
        let config = ClientConfig::builder().build().unwrap();
        let client = Client::builder(config)
            .with_store(std::sync::Arc::new(ReadOnlyStore))
            .build()
            .await
            .unwrap();

        store_credentials(&client, Credentials::new("tourist", "hunter2")).await;

        assert!(client.has_credentials());
        assert_eq!(client.handle_or_email(), "tourist");
    }
}
