//! # tootline
//!
//! Follows one Mastodon feed and prints its events to stdout as JSON lines,
//! oldest first. Logs go to stderr or the configured log file.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use futures::TryStreamExt;
use tracing::{info, warn, Level};

use tootline_api::{ClientConfig, MastodonClient};
use tootline_core::entities::Status;
use tootline_core::{ApiClient, DomainEvent, Method, QueryParams};
use tootline_settings::Settings;
use tootline_stream::{Multiplexer, TransportConfig};
use tootline_telemetry::{init_telemetry, TelemetryConfig};
use tootline_timeline::{FeedSpec, Timeline, TimelineOptions};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FeedKind {
    Home,
    Local,
    Federated,
    Account,
    Hashtag,
    Notifications,
    Thread,
}

/// Follow a Mastodon feed from the terminal.
#[derive(Parser, Debug)]
#[command(name = "tootline", version, about)]
struct Cli {
    /// Which feed to follow.
    #[arg(long, value_enum, default_value = "home")]
    feed: FeedKind,

    /// Hashtag for `--feed hashtag`, with or without the leading `#`.
    #[arg(long)]
    tag: Option<String>,

    /// Only local posts for `--feed hashtag`.
    #[arg(long)]
    local: bool,

    /// Account name for `--feed account`, e.g. `alice@example.social`.
    #[arg(long)]
    account: Option<String>,

    /// Leave replies out of `--feed account`.
    #[arg(long)]
    no_replies: bool,

    /// Leave boosts out of `--feed account`.
    #[arg(long)]
    no_reblogs: bool,

    /// Status id for `--feed thread`.
    #[arg(long)]
    status: Option<String>,

    /// Follow the push stream as well as polling.
    #[arg(long)]
    streaming: bool,

    /// Poll every N seconds (0 disables polling unless streaming).
    #[arg(long)]
    refresh: Option<u64>,

    /// Page size for fetches.
    #[arg(long)]
    limit: Option<u32>,

    /// Print the first page and exit.
    #[arg(long)]
    once: bool,

    /// Settings file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if self.streaming {
            settings.timeline.streaming = true;
        }
        if let Some(refresh) = self.refresh {
            settings.timeline.refresh_secs = refresh;
        }
        if let Some(limit) = self.limit {
            settings.timeline.fetch_limit = limit;
        }
    }
}

fn telemetry_config(settings: &Settings) -> Result<TelemetryConfig> {
    let logging = &settings.logging;
    let log_level: Level = logging
        .level
        .parse()
        .with_context(|| format!("invalid log level {:?}", logging.level))?;
    let module_levels = logging
        .modules
        .iter()
        .map(|(module, level)| {
            level
                .parse()
                .map(|level| (module.clone(), level))
                .with_context(|| format!("invalid log level {level:?} for {module}"))
        })
        .collect::<Result<_>>()?;
    Ok(TelemetryConfig {
        log_level,
        module_levels,
        json: logging.json,
        log_file: logging.file.as_ref().map(PathBuf::from),
    })
}

async fn build_client(settings: &Settings) -> Result<MastodonClient> {
    let instance = &settings.instance;
    let mut config = ClientConfig::new(&instance.base_url);
    config.streaming_url = instance.streaming_url.clone();
    config.access_token = instance.access_token.clone();
    config.connect_timeout = Duration::from_secs(settings.stream.connect_timeout_secs);
    config.request_timeout = Duration::from_secs(settings.stream.request_timeout_secs);

    let mut client = MastodonClient::new(config).context("failed to build HTTP client")?;
    if settings.timeline.streaming && instance.streaming_url.is_none() {
        match client.discover_streaming_url().await {
            Ok(Some(url)) => {
                info!(url = %url, "using advertised streaming endpoint");
                client.set_streaming_url(&url)?;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "streaming endpoint discovery failed, using base URL"),
        }
    }
    Ok(client)
}

async fn build_feed(cli: &Cli, client: &Arc<dyn ApiClient>) -> Result<FeedSpec> {
    let feed = match cli.feed {
        FeedKind::Home => FeedSpec::home(),
        FeedKind::Local => FeedSpec::local(),
        FeedKind::Federated => FeedSpec::federated(),
        FeedKind::Notifications => FeedSpec::notifications(),
        FeedKind::Hashtag => {
            let Some(tag) = &cli.tag else {
                bail!("--feed hashtag needs --tag");
            };
            FeedSpec::hashtag(tag, cli.local, false)?
        }
        FeedKind::Account => {
            let Some(account) = &cli.account else {
                bail!("--feed account needs --account");
            };
            FeedSpec::account_by_name(client, account, !cli.no_replies, !cli.no_reblogs).await?
        }
        FeedKind::Thread => {
            let Some(id) = &cli.status else {
                bail!("--feed thread needs --status");
            };
            let response = client
                .request(Method::Get, &format!("/api/v1/statuses/{id}"), &QueryParams::new())
                .await
                .with_context(|| format!("failed to load status {id}"))?;
            let status: Status = response.json()?;
            FeedSpec::thread(status)
        }
    };
    Ok(feed)
}

fn print_events(events: &[DomainEvent]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for event in events {
        serde_json::to_writer(&mut stdout, event)?;
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => tootline_settings::load_settings_from_path(path),
        None => tootline_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply(&mut settings);
    tootline_settings::validate(&settings).context("invalid command-line options")?;

    let _telemetry = init_telemetry(telemetry_config(&settings)?)?;

    let client = build_client(&settings).await?;
    let streaming_url = client.streaming_url().to_string();
    let client: Arc<dyn ApiClient> = Arc::new(client);
    let mux = Multiplexer::new(
        client.clone(),
        streaming_url,
        TransportConfig {
            backoff: settings.stream.backoff(),
            read_timeout: settings.stream.read_timeout(),
        },
    );

    let feed = build_feed(&cli, &client).await?;
    info!(feed = feed.name(), "opening feed");
    let timeline = Arc::new(Timeline::new(
        feed,
        client,
        Some(mux),
        TimelineOptions {
            limit: settings.timeline.fetch_limit,
        },
    ));

    // Only the newest page; older history is not followed.
    timeline
        .fetch(None)
        .try_next()
        .await
        .context("initial fetch failed")?;
    print_events(&timeline.get_events().await)?;
    if cli.once {
        return Ok(());
    }

    let printer = {
        let timeline = timeline.clone();
        tokio::spawn(async move {
            loop {
                let events = timeline.get_events_wait().await;
                if let Err(e) = print_events(&events) {
                    warn!(error = %e, "stdout closed");
                    break;
                }
            }
        })
    };
    let notices = {
        let mut notices = timeline.notices();
        tokio::spawn(async move {
            while let Ok(notice) = notices.recv().await {
                info!(?notice, "timeline notice");
            }
        })
    };

    let feed = timeline.feed();
    if settings.timeline.streaming {
        if feed.can_stream() {
            timeline.streaming(true).await?;
        } else {
            warn!(feed = feed.name(), "feed cannot stream, polling only");
        }
    }
    match settings.timeline.effective_refresh() {
        Some(interval) if feed.can_update() => timeline.periodic_refresh(interval)?,
        Some(_) => warn!(feed = feed.name(), "feed cannot refresh"),
        None => {}
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    timeline.close().await?;
    printer.abort();
    notices.abort();
    Ok(())
}
