mod humanize;
mod portal;
mod reply;
mod retry;
mod selectors;
mod store;
mod tweet;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::portal::{PortalConfig, TwitterPortal};
use crate::reply::ReplyWriter;
use crate::retry::{with_retry, RetryPolicy};
use crate::selectors::SelectorTable;
use crate::store::{BotCredentials, BotStore};
use crate::tweet::find_most_viral;

#[derive(Parser, Debug)]
#[command(author, version, about = "X timeline bot with natural behaviour", long_about = None)]
struct Args {
    /// Bot name as registered in bots.toml
    bot: String,

    /// How many timeline posts to collect before ranking
    #[arg(short = 'n', long, default_value_t = 8)]
    max_tweets: usize,

    /// Run the browser headless
    #[arg(short = 'H', long)]
    headless: bool,

    /// WebDriver endpoint
    #[arg(long, default_value = "http://localhost:9515")]
    webdriver_url: String,

    /// Ollama model used for replies
    #[arg(short, long, default_value = "llama3.2:latest")]
    model: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "magpie=debug" } else { "magpie=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .init();

    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let store = BotStore::new(".");
    let bot = store
        .get_bot(&args.bot)?
        .with_context(|| format!("bot '{}' is not registered in bots.toml", args.bot))?;
    info!(bot = %bot.name, max_tweets = args.max_tweets, "starting run");

    let config = PortalConfig {
        webdriver_url: args.webdriver_url.clone(),
        headless: args.headless,
        selectors: SelectorTable::load(Path::new("selectors.toml"))?,
        ..PortalConfig::default()
    };
    let retry = config.retry.clone();

    let portal = TwitterPortal::open(config, bot.session.as_ref()).await?;

    // The browser is released whatever happens below; release failures are
    // logged inside close() and never replace the run's outcome.
    let outcome = drive(&portal, &store, &bot, &args, &retry).await;
    portal.close().await;
    outcome
}

async fn drive(
    portal: &TwitterPortal,
    store: &BotStore,
    bot: &BotCredentials,
    args: &Args,
    retry: &RetryPolicy,
) -> Result<()> {
    with_retry(retry, "open timeline", || {
        portal.ensure_authenticated(&bot.username, &bot.password)
    })
    .await?;

    let tweets =
        with_retry(retry, "collect timeline", || portal.collect_timeline(args.max_tweets)).await?;
    info!(collected = tweets.len(), "timeline collected");

    let blob = portal.export_session().await?;
    store.update_session(&bot.name, &blob)?;

    let Some(top) = find_most_viral(&tweets) else {
        info!("no eligible post found, nothing to do");
        return Ok(());
    };
    info!(
        author = %top.author,
        score = top.viral_score(),
        url = %top.url,
        "most viral post selected"
    );

    if store.reply_exists(top)? {
        info!("already replied to this post on a previous run");
        return Ok(());
    }

    let ledger_id = store.create(top)?;
    let reply = ReplyWriter::new(&args.model).generate(top).await?;
    portal.apply_actions(top, &reply).await?;
    store.attach_reply(&ledger_id, &reply)?;

    info!("run finished");
    Ok(())
}
