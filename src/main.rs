use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use mailsync::db::models::Provider;

#[derive(Debug, Parser)]
#[command(name = "mailsync", version, about = "Mailbox synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// SQLite store path
    #[arg(long, global = true, env = "MAILSYNC_DB_PATH")]
    db: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch new mail since each account's checkpoint
    Sync(SyncArgs),
    /// Re-fetch the lookback window and reclassify stored mail
    Reprocess(ScopeArgs),
    /// Check a credential without touching the store
    Test(TestArgs),
    /// Manage configured accounts
    Accounts {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Show stored messages for one mailbox
    Messages(MessagesArgs),
    /// Show store statistics
    Stats,
}

#[derive(Debug, Args)]
struct ScopeArgs {
    /// Only this user's accounts
    #[arg(long)]
    user: Option<String>,
    /// Only this account id (wins over --user)
    #[arg(long)]
    account: Option<String>,
    #[arg(long)]
    provider: Option<Provider>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Access token to store on selected OAuth accounts before syncing
    #[arg(long)]
    access_token: Option<String>,
    /// Refresh token to store on selected OAuth accounts before syncing
    #[arg(long)]
    refresh_token: Option<String>,
}

#[derive(Debug, Args)]
struct TestArgs {
    #[arg(long)]
    provider: Provider,
    #[arg(long)]
    email: Option<String>,
    /// Password, or env:NAME to read it from the environment
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    access_token: Option<String>,
}

#[derive(Debug, Args)]
struct MessagesArgs {
    /// Mailbox address
    account: String,
    #[arg(long, default_value_t = 25)]
    limit: usize,
}

#[derive(Debug, Subcommand)]
enum AccountCommands {
    /// List configured accounts
    List,
    /// Add or replace an account
    Add(AddAccountArgs),
    /// Store iCloud credentials for a user
    Integration {
        user: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: String,
    },
}

#[derive(Debug, Args)]
struct AddAccountArgs {
    email: String,
    #[arg(long)]
    provider: Provider,
    #[arg(long)]
    user: String,
    /// Defaults to a generated id
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    display_name: Option<String>,
    /// Password, or env:NAME to read it from the environment at sync time
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    access_token: Option<String>,
    #[arg(long)]
    refresh_token: Option<String>,
    #[arg(long)]
    imap_host: Option<String>,
    #[arg(long)]
    imap_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{Context, Result};
    use uuid::Uuid;

    use mailsync::config::Config;
    use mailsync::connectors::{check_connection, CheckRequest};
    use mailsync::db::models::{Account, Credentials, UserIntegration};
    use mailsync::db::{AccountScope, Database};
    use mailsync::output::{self, AccountStatus, OutputFormat};
    use mailsync::sync::{FreshTokens, SyncEngine};

    use super::{AccountCommands, AddAccountArgs, Cli, Commands, ScopeArgs};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let mut config = Config::from_env().context("load configuration")?;
        if let Some(db) = cli.db {
            config.db_path = db;
        }
        let format = OutputFormat::from_json_flag(cli.json);

        match cli.command {
            Commands::Sync(args) => handle_sync(&config, args, format).await,
            Commands::Reprocess(args) => handle_reprocess(&config, args, format).await,
            Commands::Test(args) => handle_test(&config, args, format).await,
            Commands::Accounts { command } => handle_accounts(&config, command, format),
            Commands::Messages(args) => handle_messages(&config, args, format),
            Commands::Stats => handle_stats(&config, format),
        }
    }

    fn open_db(config: &Config) -> Result<Database> {
        Database::open(&config.db_path)
            .with_context(|| format!("open mailsync database at {}", config.db_path.display()))
    }

    fn scope(args: ScopeArgs) -> AccountScope {
        AccountScope {
            account_id: args.account,
            user_id: args.user,
            provider: args.provider,
        }
    }

    async fn handle_sync(config: &Config, args: super::SyncArgs, format: OutputFormat) -> Result<()> {
        let db = open_db(config)?;
        let engine = SyncEngine::from_config(config);
        let tokens = FreshTokens {
            access_token: args.access_token,
            refresh_token: args.refresh_token,
        };

        let summary = engine.run_sync(&db, &scope(args.scope), &tokens).await?;
        println!("{}", output::format_sync_summary(format, &summary)?);
        Ok(())
    }

    async fn handle_reprocess(config: &Config, args: ScopeArgs, format: OutputFormat) -> Result<()> {
        let db = open_db(config)?;
        let engine = SyncEngine::from_config(config);

        let summary = engine.run_reprocess(&db, &scope(args)).await?;
        println!("{}", output::format_sync_summary(format, &summary)?);
        Ok(())
    }

    async fn handle_test(config: &Config, args: super::TestArgs, format: OutputFormat) -> Result<()> {
        let request = CheckRequest {
            provider: Some(args.provider),
            email: args.email,
            password: args.password,
            host: args.host,
            port: args.port,
            access_token: args.access_token,
        };
        let result = check_connection(config, &request).await;
        println!("{}", output::format_check(format, &result)?);
        Ok(())
    }

    fn handle_accounts(config: &Config, command: AccountCommands, format: OutputFormat) -> Result<()> {
        let db = open_db(config)?;

        match command {
            AccountCommands::List => {
                let accounts = db.list_accounts()?;
                let statuses: Vec<AccountStatus> = accounts.iter().map(AccountStatus::from).collect();
                println!("{}", output::format_accounts(format, &statuses)?);
            }
            AccountCommands::Add(args) => {
                let account = build_account(args);
                db.insert_account(&account)
                    .with_context(|| format!("store account {}", account.email_address))?;
                println!("Added account: {} ({})", account.id, account.email_address);
            }
            AccountCommands::Integration {
                user,
                email,
                password,
            } => {
                db.upsert_user_integration(&UserIntegration {
                    user_id: user.clone(),
                    icloud_email: email,
                    icloud_password: Some(password),
                })?;
                println!("Stored iCloud credentials for user {user}");
            }
        }
        Ok(())
    }

    fn build_account(args: AddAccountArgs) -> Account {
        let credentials = Credentials {
            password: args.password,
            access_token: args.access_token,
            refresh_token: args.refresh_token,
        };
        let has_credentials = credentials.password().is_some()
            || credentials.access_token().is_some()
            || credentials.refresh_token().is_some();

        Account {
            id: args.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: args.user,
            provider: args.provider,
            email_address: args.email.trim().to_string(),
            display_name: args.display_name,
            credentials: has_credentials.then_some(credentials),
            imap_host: args.imap_host,
            imap_port: args.imap_port,
            is_active: true,
            last_sync_at: None,
            sync_error: None,
        }
    }

    fn handle_messages(config: &Config, args: super::MessagesArgs, format: OutputFormat) -> Result<()> {
        let db = open_db(config)?;
        let emails = db.list_cached_emails(args.account.trim(), args.limit)?;
        println!("{}", output::format_messages(format, &emails)?);
        Ok(())
    }

    fn handle_stats(config: &Config, format: OutputFormat) -> Result<()> {
        let db = open_db(config)?;
        let stats = db.get_stats()?;
        println!("{}", output::format_stats(format, &stats)?);
        Ok(())
    }
}
