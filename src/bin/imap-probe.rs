#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for checking XOAUTH2 IMAP access to Gmail and Outlook accounts

use clap::{Parser, Subcommand};
use oauth_imap_probe::provider::{AccountCredentials, EnvFileSink, OAuthSource, TokenCache};
use oauth_imap_probe::{
    AccountConfig, ConnectionResult, Folder, Orchestrator, ProbeOptions, RunResults,
    accounts_from_env, env_file_path,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imap-probe")]
#[command(about = "Check OAuth2 (XOAUTH2) IMAP connectivity of configured accounts")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, authenticate and select a mailbox on every account
    Check {
        /// Mailbox to select
        #[arg(long)]
        mailbox: Option<String>,

        /// Number of recent messages to summarize
        #[arg(long)]
        fetch: Option<u32>,

        /// Accept any TLS certificate
        #[arg(long)]
        insecure: bool,

        /// Overall time limit in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List the accounts configured in the environment
    Accounts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let accounts = accounts_from_env()?;

    match &args.command {
        Command::Check {
            mailbox,
            fetch,
            insecure,
            timeout,
        } => {
            let mut options = ProbeOptions::from_env()?;
            if let Some(mailbox) = mailbox {
                options.mailbox_name = Folder::from(mailbox.as_str());
            }
            if let Some(fetch) = fetch {
                options.fetch_limit = *fetch;
            }
            if *insecure {
                options.tls_verify = false;
            }
            if let Some(secs) = timeout {
                options.overall_timeout = Duration::from_secs(*secs);
            }
            cmd_check(&args, &accounts, options).await?;
        }
        Command::Accounts => {
            cmd_accounts(&args, &accounts)?;
        }
    }

    Ok(())
}

async fn cmd_check(
    args: &Args,
    configs: &[AccountConfig],
    options: ProbeOptions,
) -> anyhow::Result<()> {
    if configs.is_empty() {
        anyhow::bail!(
            "No accounts configured. Set GMAIL_REFRESH_TOKEN or OUTLOOK_REFRESH_TOKEN (or *_ACCESS_TOKEN)."
        );
    }

    let mut source = OAuthSource::new()?.with_sink(EnvFileSink::new(env_file_path()));
    for config in configs {
        source.insert(config.account.id.clone(), config.credentials.clone());
    }
    let accounts: Vec<_> = configs.iter().map(|c| c.account.clone()).collect();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let orchestrator = Orchestrator::new(options, Arc::new(TokenCache::new(source)));
    let results = orchestrator.run_until_cancelled(&accounts, &cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(configs, &results);
    }

    let failed = results.values().filter(|r| !r.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} account(s) failed", results.len());
    }
    Ok(())
}

fn cmd_accounts(args: &Args, configs: &[AccountConfig]) -> anyhow::Result<()> {
    if args.json {
        let list: Vec<_> = configs
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.account.id,
                    "provider": c.account.provider,
                    "email": c.account.email,
                    "endpoint": c.account.endpoint,
                    "credentials": credential_kind(&c.credentials),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if configs.is_empty() {
        println!("No accounts configured.");
        return Ok(());
    }

    println!(
        "{:<10} {:<8} {:<32} {:<14} {}",
        "Account", "Provider", "Endpoint", "Credentials", "Email"
    );
    println!("{}", "-".repeat(90));
    for c in configs {
        println!(
            "{:<10} {:<8} {:<32} {:<14} {}",
            c.account.id,
            c.account.provider,
            format!("{} ({:?})", c.account.endpoint, c.account.endpoint.tls),
            credential_kind(&c.credentials),
            c.account.email.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

const fn credential_kind(credentials: &AccountCredentials) -> &'static str {
    match credentials {
        AccountCredentials::Refresh(_) => "refresh_token",
        AccountCredentials::AccessToken(_) => "access_token",
    }
}

fn print_results(configs: &[AccountConfig], results: &RunResults) {
    println!(
        "{:<10} {:<8} {:<14} {}",
        "Account", "Provider", "Result", "Detail"
    );
    println!("{}", "-".repeat(90));

    for config in configs {
        let Some(result) = results.get(&config.account.id) else {
            continue;
        };
        match result {
            ConnectionResult::Success(summary) => {
                println!(
                    "{:<10} {:<8} {:<14} {} as {}: {} message(s), {} recent{}",
                    config.account.id,
                    config.account.provider,
                    "ok",
                    summary.mailbox,
                    summary.user_identity,
                    summary.info.exists,
                    summary.info.recent,
                    if summary.token_refreshed {
                        " (token refreshed)"
                    } else {
                        ""
                    },
                );
                for message in &summary.recent_messages {
                    println!(
                        "{:<35} #{:<6} {:<30} {}",
                        "",
                        message.uid.unwrap_or(message.seq),
                        truncate(message.from.as_deref().unwrap_or("-"), 28),
                        truncate(message.subject.as_deref().unwrap_or("(no subject)"), 40),
                    );
                }
            }
            ConnectionResult::Failure { kind, detail } => {
                println!(
                    "{:<10} {:<8} {:<14} {}",
                    config.account.id,
                    config.account.provider,
                    kind.as_str(),
                    detail
                );
            }
        }
    }

    let ok = results.values().filter(|r| r.is_success()).count();
    println!("\n{ok}/{} account(s) reachable", results.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
