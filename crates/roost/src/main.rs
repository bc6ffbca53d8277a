//! Roost: tweet archiver
//!
//! Harness binary with subcommands:
//! - `fetch-user`: profile plus recent tweets
//! - `fetch-tweet`: a thread, from a permalink or id
//! - `fetch-likes`: a user's likes
//! - `login`: log in and store the session for later runs
//!
//! Every fetch prints the archived entities as JSON.

use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;
use roost_scraper::{
    ArchiveStore, FileSessionStore, Harvest, LoginOutcome, Permalink, Scraper, ScraperConfig,
    Session, SessionStore, TweetId, UserHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "roost")]
#[command(about = "Archive tweets, likes and threads", long_about = None)]
struct Cli {
    /// Base URL for REST endpoints
    #[arg(long, env = "ROOST_API_BASE")]
    api_base: Option<String>,

    /// Base URL for GraphQL endpoints
    #[arg(long, env = "ROOST_GRAPHQL_BASE")]
    graphql_base: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "ROOST_TIMEOUT_MS", default_value = "30000")]
    timeout_ms: u64,

    /// Directory holding saved sessions
    #[arg(long, env = "ROOST_SESSION_DIR", default_value = ".roost/sessions")]
    session_dir: String,

    /// Account whose saved session to use; guest mode when unset
    #[arg(long, env = "ROOST_ACCOUNT")]
    account: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a profile and optionally its recent tweets
    FetchUser {
        /// Handle, without the @
        handle: String,

        /// Tweets to fetch from the user's feed
        #[arg(long, default_value = "0")]
        tweets: usize,
    },

    /// Fetch a tweet and its conversation
    FetchTweet {
        /// Permalink URL or numeric tweet id
        target: String,

        /// Minimum entries to page through
        #[arg(long, default_value = "20")]
        min_entries: usize,
    },

    /// Fetch a user's likes
    FetchLikes {
        /// Handle, without the @
        handle: String,

        /// Minimum likes to page through
        #[arg(long, default_value = "50")]
        min_entries: usize,
    },

    /// Log in and save the session
    Login {
        /// Handle, without the @
        handle: String,

        /// Account password
        #[arg(long, env = "ROOST_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

impl Cli {
    fn config(&self) -> ScraperConfig {
        let mut config = ScraperConfig::default().with_timeout(Duration::from_millis(self.timeout_ms));
        if let Some(base) = &self.api_base {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(base) = &self.graphql_base {
            config.graphql_base = base.trim_end_matches('/').to_string();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "roost=info,roost_scraper=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let session = Session::new(cli.config()).map_err(|e| miette::miette!("{}", e))?;
    let store = FileSessionStore::new(&cli.session_dir);

    if let Some(account) = &cli.account {
        match store
            .load(&UserHandle::from(account.as_str()))
            .await
            .map_err(|e| miette::miette!("failed to load session: {}", e))?
        {
            Some(snapshot) => session.restore(snapshot).await,
            None => warn!(account = %account, "no saved session, continuing as guest"),
        }
    }

    let scraper = Scraper::new(session.clone());
    match cli.command {
        Commands::FetchUser { handle, tweets } => fetch_user(&scraper, &handle, tweets).await?,
        Commands::FetchTweet {
            target,
            min_entries,
        } => fetch_tweet(&scraper, &target, min_entries).await?,
        Commands::FetchLikes {
            handle,
            min_entries,
        } => fetch_likes(&scraper, &handle, min_entries).await?,
        Commands::Login { handle, password } => login(&session, &handle, &password).await?,
    }

    // Cookies rotate on every authenticated exchange.
    if let Some(snapshot) = session.snapshot().await {
        store
            .save(&snapshot)
            .await
            .map_err(|e| miette::miette!("failed to save session: {}", e))?;
    }
    Ok(())
}

fn report(harvest: &Harvest) {
    match harvest.interruption() {
        Some(e) => warn!(error = %e, pages = harvest.pages, "stopped early, output is partial"),
        None => info!(pages = harvest.pages, entries = harvest.entries, stop = ?harvest.stop, "done"),
    }
}

fn print(archive: &ArchiveStore) -> Result<()> {
    let json = serde_json::to_string_pretty(&archive.export())
        .map_err(|e| miette::miette!("failed to serialize output: {}", e))?;
    println!("{json}");
    Ok(())
}

async fn fetch_user(scraper: &Scraper, handle: &str, tweets: usize) -> Result<()> {
    let handle = UserHandle::from(handle.trim_start_matches('@'));
    let user = scraper
        .user_by_handle(&handle)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let archive = ArchiveStore::new();
    let user_id = user.id;
    let mut trove = roost_scraper::Trove::new();
    trove.insert_user(user);
    archive.save_trove(trove);

    if tweets > 0 {
        let harvest = scraper
            .user_feed(user_id, tweets)
            .await
            .map_err(|e| miette::miette!("{}", e))?;
        report(&harvest);
        archive.save_trove(harvest.trove);
    }
    print(&archive)
}

async fn fetch_tweet(scraper: &Scraper, target: &str, min_entries: usize) -> Result<()> {
    let harvest = match Permalink::parse(target) {
        Ok(link) => scraper.tweet_by_permalink(&link, min_entries).await,
        Err(_) => {
            let id: TweetId = target
                .parse()
                .map_err(|_| miette::miette!("{} is neither a permalink nor a tweet id", target))?;
            scraper.tweet_thread(id, None, min_entries).await
        }
    }
    .map_err(|e| miette::miette!("{}", e))?;
    report(&harvest);

    let archive = ArchiveStore::new();
    archive.save_trove(harvest.trove);
    print(&archive)
}

async fn fetch_likes(scraper: &Scraper, handle: &str, min_entries: usize) -> Result<()> {
    let handle = UserHandle::from(handle.trim_start_matches('@'));
    let user = scraper
        .user_by_handle(&handle)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let harvest = scraper
        .likes(user.id, min_entries)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    report(&harvest);

    let archive = ArchiveStore::new();
    archive.save_trove(harvest.trove);
    print(&archive)
}

async fn login(session: &Session, handle: &str, password: &str) -> Result<()> {
    let handle = UserHandle::from(handle.trim_start_matches('@'));
    let mut outcome = session
        .login(&handle, password)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match outcome {
            LoginOutcome::LoggedIn(identity) => {
                info!(handle = %identity.handle, user_id = %identity.user_id, "logged in");
                return Ok(());
            }
            LoginOutcome::Challenge(pending) => {
                eprint!("{}: ", pending.prompt);
                let answer = stdin
                    .next_line()
                    .await
                    .map_err(|e| miette::miette!("failed to read answer: {}", e))?
                    .ok_or_else(|| miette::miette!("login challenge left unanswered"))?;
                outcome = session
                    .resume_login(pending, answer.trim())
                    .await
                    .map_err(|e| miette::miette!("{}", e))?;
            }
        }
    }
}
