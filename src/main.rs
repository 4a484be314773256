use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use lbe::auth;
use lbe::config::Config;
use lbe::forms::RegistrationInput;
use lbe::import;
use lbe::mail::{LogMailer, Mailer, SmtpMailer};
use lbe::render::Theme;
use lbe::server::{self, AppState};
use lbe::store::{NewUser, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lbe", version, about = "A small personal blog server")]
struct Cli {
    /// Directory to search (along with its ancestors) for `lbe.yaml`.
    #[arg(long, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the blog.
    Serve,

    /// Create any missing database tables.
    Migrate,

    /// Load markdown articles from a directory, replacing articles with the
    /// same slug.
    Import { directory: PathBuf },

    /// Create a user who can see unpublished articles and whose comments
    /// skip moderation.
    Createsuperuser {
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Approve a held comment.
    Approve { id: i64 },

    /// Set a site setting such as `site_title` or `site_description`.
    Set { name: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lbe=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_directory(&cli.project)?;
    let store = Store::connect(&config.database_url)
        .await
        .with_context(|| format!("opening `{}`", config.database_url))?;
    store.migrate().await?;

    match cli.command {
        Command::Serve => {
            let theme = Theme::load(&config.templates)?;
            let mailer: Arc<dyn Mailer> = match &config.smtp {
                Some(smtp) => Arc::new(SmtpMailer::new(smtp)),
                None => Arc::new(LogMailer),
            };
            server::serve(AppState {
                store,
                theme: Arc::new(theme),
                config: Arc::new(config),
                mailer,
            })
            .await?;
        }
        Command::Migrate => info!("database is up to date"),
        Command::Import { directory } => {
            let sources = import::parse_sources(&directory)?;
            let count = import::import(&store, &sources).await?;
            info!("imported {} articles from {}", count, directory.display());
        }
        Command::Createsuperuser {
            username,
            email,
            password,
        } => {
            let account = RegistrationInput {
                username,
                email,
                password,
                website: String::new(),
            }
            .validate_account()
            .map_err(|errors| anyhow!("invalid account: {}", errors))?;
            let user = store
                .create_user(
                    &NewUser {
                        username: account.username,
                        email: account.email,
                        password_hash: auth::hash_password_blocking(account.password).await?,
                        is_superuser: true,
                    },
                    "",
                )
                .await?;
            info!(user = %user.username, "superuser created");
        }
        Command::Approve { id } => {
            if !store.approve_comment(id).await? {
                return Err(anyhow!("no comment with id {}", id));
            }
            info!(comment = id, "comment approved");
        }
        Command::Set { name, value } => {
            store.set_setting(&name, &value).await?;
            info!(setting = %name, "setting updated");
        }
    }
    Ok(())
}
