use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use elroi::auth::PasswordHasher;
use elroi::config::ServerConfig;
use elroi::rbac::ProtectedEntities;
use elroi::rbac::catalog::{bootstrap_root_user, seed};
use elroi::server::{AppState, create_router};
use elroi::store::{SqliteStore, Store};
use elroi::types::NewUser;

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "elroi")]
#[command(about = "A personal notes and files hub with role-based administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        #[command(flatten)]
        location: ConfigArgs,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the database and stored files
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create the database, seed roles and permissions, and create the root user
    Init {
        #[command(flatten)]
        location: ConfigArgs,

        /// Skip interactive prompts; root user fields must be passed as flags
        #[arg(long)]
        non_interactive: bool,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        email: Option<String>,

        /// Root password (falls back to ELROI_ROOT_PASSWORD)
        #[arg(long, env = "ELROI_ROOT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Re-apply the seeded roles and permissions
    Seed {
        #[command(flatten)]
        location: ConfigArgs,
    },
}

struct RootUserInput {
    name: Option<String>,
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

fn open_store(config: &ServerConfig) -> anyhow::Result<SqliteStore> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    #[cfg(unix)]
    set_restrictive_permissions(&db_path);
    Ok(store)
}

fn prompt_text(label: &str, given: Option<String>) -> anyhow::Result<String> {
    match given {
        Some(value) => Ok(value),
        None => Ok(inquire::Text::new(label)
            .with_validator(|input: &str| {
                if input.trim().is_empty() {
                    Ok(inquire::validator::Validation::Invalid(
                        "Value cannot be empty".into(),
                    ))
                } else {
                    Ok(inquire::validator::Validation::Valid)
                }
            })
            .prompt()?),
    }
}

fn collect_root_user(input: RootUserInput, non_interactive: bool) -> anyhow::Result<NewUser> {
    let (name, username, email, password) = if non_interactive {
        let require = |value: Option<String>, flag: &str| {
            value.ok_or_else(|| anyhow::anyhow!("--{flag} is required with --non-interactive"))
        };
        (
            require(input.name, "name")?,
            require(input.username, "username")?,
            require(input.email, "email")?,
            require(input.password, "password")?,
        )
    } else {
        let name = prompt_text("Root user name:", input.name)?;
        let username = prompt_text("Root username:", input.username)?;
        let email = prompt_text("Root email:", input.email)?;
        let password = match input.password {
            Some(password) => password,
            None => inquire::Password::new("Root password:").prompt()?,
        };
        (name, username, email, password)
    };

    if username.trim().is_empty() || username.contains(char::is_whitespace) {
        bail!("Username cannot be empty or contain whitespace");
    }
    if password.chars().count() < 8 {
        bail!("Password must be at least 8 characters");
    }

    Ok(NewUser {
        name: name.trim().to_string(),
        username,
        email: email.trim().to_string(),
        password_hash: PasswordHasher::new().hash(&password)?,
        email_verified_at: Some(Utc::now()),
    })
}

fn run_init(config: &ServerConfig, input: RootUserInput, non_interactive: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;

    if store.count_users()? > 0 {
        bail!(
            "Server already initialized. Database exists at: {}",
            config.db_path().display()
        );
    }

    let protected = ProtectedEntities::default();
    let report = seed(&store, &config.default_guard, &protected)?;
    let root_user = collect_root_user(input, non_interactive)?;
    let root = bootstrap_root_user(&store, &root_user, &config.default_guard, &protected)?;

    println!();
    println!("========================================");
    println!(
        "Seeded {} permissions and {} roles.",
        report.permissions_created, report.roles_created
    );
    println!("Created root user '{}' (id {}).", root.username, root.id);
    println!("Database: {}", config.db_path().display());
    println!("========================================");
    println!();

    Ok(())
}

fn run_seed(config: &ServerConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let report = seed(&store, &config.default_guard, &ProtectedEntities::default())?;
    println!(
        "Seeded {} new permissions and {} new roles.",
        report.permissions_created, report.roles_created
    );
    Ok(())
}

async fn run_serve(config: ServerConfig) -> anyhow::Result<()> {
    if !config.db_path().exists() {
        bail!("Server not initialized. Run 'elroi admin init' first to create the database.");
    }

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    if store.count_users()? == 0 {
        bail!("Server not initialized. Run 'elroi admin init' first to create the root user.");
    }
    fs::create_dir_all(config.blob_dir())?;

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(Arc::new(store), config));
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("elroi=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                location,
                non_interactive,
                name,
                username,
                email,
                password,
            } => {
                let config = location.load()?;
                let input = RootUserInput {
                    name,
                    username,
                    email,
                    password,
                };
                run_init(&config, input, non_interactive)?;
            }
            AdminCommands::Seed { location } => {
                run_seed(&location.load()?)?;
            }
        },
        Commands::Serve {
            location,
            host,
            port,
        } => {
            let mut config = location.load()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            run_serve(config).await?;
        }
    }

    Ok(())
}
