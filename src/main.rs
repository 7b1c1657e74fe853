mod cli;
mod core;
mod models;
mod output;
mod utils;

use clap::{Parser, Subcommand};
use models::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inboxsync")]
#[command(version)]
#[command(about = "IMAP sync and unified-inbox cache for multi-tenant mail accounts", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Account management commands
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Show a folder, syncing first when the cache is empty or --force-sync is given
    Inbox {
        /// Account id (defaults to the default account)
        #[arg(long, short)]
        account: Option<String>,
        /// Logical folder: INBOX, Sent, TRASH, ...
        #[arg(long, short, default_value = "INBOX")]
        folder: String,
        /// Maximum messages to fetch and show
        #[arg(long, short)]
        limit: Option<u32>,
        /// Sync even when cached mail exists
        #[arg(long)]
        force_sync: bool,
        /// Output format (json or table)
        #[arg(long, short)]
        output: Option<String>,
    },
    /// Sync INBOX and Sent for an account
    Sync {
        #[arg(long, short)]
        account: Option<String>,
        #[arg(long, short)]
        limit: Option<u32>,
    },
    /// Send an email and keep a copy in Sent
    Send {
        #[arg(long, short)]
        account: Option<String>,
        /// Recipient address(es), `addr` or `Name <addr>`
        #[arg(long, required = true)]
        to: Vec<String>,
        #[arg(long, short = 's', default_value = "")]
        subject: String,
        /// Plain-text body
        #[arg(long, conflicts_with = "text_file")]
        text: Option<String>,
        /// Read plain-text body from file
        #[arg(long)]
        text_file: Option<String>,
        /// HTML body
        #[arg(long, conflicts_with = "html_file")]
        html: Option<String>,
        /// Read HTML body from file
        #[arg(long)]
        html_file: Option<String>,
    },
    /// Mark cached messages read (or unread) and push the flag to the server
    Mark {
        #[arg(long, short)]
        account: Option<String>,
        #[arg(long, short, default_value = "INBOX")]
        folder: String,
        /// Message uid(s) as shown in folder listings
        #[arg(long = "uid", required = true, allow_negative_numbers = true)]
        uids: Vec<i64>,
        /// Clear the read flag instead of setting it
        #[arg(long)]
        unread: bool,
    },
    /// List every cached message marked read
    ReadStatus {
        #[arg(long, short)]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Add a new account and store its secret in the keychain
    Add {
        /// Account id
        id: String,
        /// Mailbox address
        email: String,
        #[arg(long)]
        tenant: String,
        /// Owning user id
        #[arg(long)]
        owner: String,
        /// Mail host used for both IMAP and SMTP unless overridden
        #[arg(long)]
        host: String,
        /// Login name (defaults to the address)
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        imap_host: Option<String>,
        #[arg(long)]
        imap_port: Option<u16>,
        #[arg(long)]
        smtp_host: Option<String>,
        #[arg(long)]
        smtp_port: Option<u16>,
        /// Use STARTTLS on 143/587 instead of implicit TLS on 993/465
        #[arg(long)]
        starttls: bool,
        /// Reject self-signed and unverifiable server certificates
        #[arg(long)]
        strict_tls: bool,
    },
    /// List all accounts
    List,
    /// Remove an account
    Remove {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Test account connection
    Test {
        #[arg(long, short)]
        account: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        Config::load()
            .map(|c| c.preferences.log_level)
            .unwrap_or_else(|_| "info".to_string())
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,inboxsync={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Account { action } => match action {
            AccountAction::Add {
                id,
                email,
                tenant,
                owner,
                host,
                username,
                display_name,
                imap_host,
                imap_port,
                smtp_host,
                smtp_port,
                starttls,
                strict_tls,
            } => {
                cli::account::add_account(cli::account::AddArgs {
                    id,
                    email,
                    tenant,
                    owner,
                    host,
                    username,
                    display_name,
                    imap_host,
                    imap_port,
                    smtp_host,
                    smtp_port,
                    starttls,
                    strict_tls,
                })
                .await?
            }
            AccountAction::List => cli::account::list_accounts()?,
            AccountAction::Remove { id, yes } => cli::account::remove_account(&id, yes)?,
            AccountAction::Test { account } => cli::account::test_account(account.as_deref()).await?,
        },
        Commands::Inbox {
            account,
            folder,
            limit,
            force_sync,
            output,
        } => {
            cli::inbox::show_folder(account.as_deref(), &folder, limit, force_sync, output.as_deref())
                .await?
        }
        Commands::Sync { account, limit } => cli::sync::sync_account(account.as_deref(), limit).await?,
        Commands::Send {
            account,
            to,
            subject,
            text,
            text_file,
            html,
            html_file,
        } => {
            cli::send::send_email(cli::send::SendArgs {
                account,
                to,
                subject,
                text,
                text_file,
                html,
                html_file,
            })
            .await?
        }
        Commands::Mark {
            account,
            folder,
            uids,
            unread,
        } => cli::status::mark(account.as_deref(), &folder, &uids, unread).await?,
        Commands::ReadStatus { account } => cli::status::read_status(account.as_deref()).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mark_accepts_mirrored_uids() {
        let cli = Cli::try_parse_from([
            "inboxsync", "mark", "--folder", "Sent", "--uid", "4", "--uid", "-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Mark { uids, folder, .. } => {
                assert_eq!(uids, vec![4, -1]);
                assert_eq!(folder, "Sent");
            }
            _ => panic!("expected mark"),
        }
    }
}
