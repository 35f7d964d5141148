use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::Cookie;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::humanize::{self, Pacing};
use crate::retry::{with_retry, RetryPolicy};
use crate::selectors::{by, SelectorTable};
use crate::tweet::{parse_count, Tweet};

/// Short probe for an already-authenticated timeline.
const TIMELINE_PROBE_TIMEOUT: Duration = Duration::from_secs(7);
/// Individual login inputs and detail-view controls.
const ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);
/// Post-submit wait for the timeline to confirm the login.
const LOGIN_FINAL_TIMEOUT: Duration = Duration::from_secs(50);
/// Timeline container before a collection pass.
const TIMELINE_LOAD_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_5_1) AppleWebKit/537.36",
    "Mozilla/5.0 (Windows NT 6.3; Win64; x64) AppleWebKit/537.36",
];

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub webdriver_url: String,
    pub base_url: String,
    pub headless: bool,
    pub selectors: SelectorTable,
    pub pacing: Pacing,
    pub retry: RetryPolicy,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".into(),
            base_url: "https://x.com".into(),
            headless: true,
            selectors: SelectorTable::default(),
            pacing: Pacing::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Wire shape of one cookie inside the session blob. Only the lifecycle
/// reads or writes this; everything between export and restore treats
/// the blob as opaque JSON.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    secure: Option<bool>,
    #[serde(default)]
    http_only: Option<bool>,
    #[serde(default)]
    expires: Option<i64>,
}

impl StoredCookie {
    fn from_cookie(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie.domain().map(str::to_string),
            path: cookie.path().map(str::to_string),
            secure: cookie.secure(),
            http_only: cookie.http_only(),
            expires: cookie.expires_datetime().map(|t| t.unix_timestamp()),
        }
    }

    fn into_cookie(self) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.name, self.value);
        if let Some(domain) = self.domain {
            cookie.set_domain(domain);
        }
        if let Some(path) = self.path {
            cookie.set_path(path);
        }
        if let Some(secure) = self.secure {
            cookie.set_secure(secure);
        }
        if let Some(http_only) = self.http_only {
            cookie.set_http_only(http_only);
        }
        if let Some(ts) = self.expires {
            if let Ok(expiry) = OffsetDateTime::from_unix_timestamp(ts) {
                cookie.set_expires(expiry);
            }
        }
        cookie
    }
}

/// Where the login flow currently stands. `LoginFailed` is terminal and
/// aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    AwaitingIdentifier,
    AwaitingPassword,
    Authenticated,
    LoginFailed,
}

/// One browser session against the timeline. Owns the page for the whole
/// run; all commands against it are issued sequentially.
pub struct TwitterPortal {
    driver: WebDriver,
    config: PortalConfig,
    owns_driver: bool,
}

impl TwitterPortal {
    /// Launch a browser through the configured WebDriver endpoint and,
    /// when a previous session blob is given, restore its cookies.
    pub async fn open(config: PortalConfig, session: Option<&serde_json::Value>) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();

        let user_agent = {
            let mut rng = rand::thread_rng();
            USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
        };

        let mut chrome_args = vec![
            format!("--user-agent={}", user_agent),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
            "--disable-notifications".to_string(),
            "--disable-extensions".to_string(),
            "--disable-pdf-viewer".to_string(),
            "--disable-print-preview".to_string(),
            "--lang=en-US".to_string(),
        ];
        if config.headless {
            chrome_args.push("--headless=new".to_string());
            chrome_args.push("--window-size=1920,1080".to_string());
        }
        for arg in &chrome_args {
            caps.add_arg(arg)?;
        }
        caps.add_experimental_option("excludeSwitches", vec!["enable-automation"])?;
        caps.add_experimental_option("useAutomationExtension", false)?;

        let driver = WebDriver::new(&config.webdriver_url, caps).await.with_context(|| {
            format!(
                "failed to create WebDriver session; is chromedriver running on {}?",
                config.webdriver_url
            )
        })?;
        let _ = driver
            .execute(
                "const proto = navigator.__proto__; delete proto.webdriver; navigator.__proto__ = proto;",
                vec![],
            )
            .await;
        debug!(user_agent, "browser session created");

        let portal = Self { driver, config, owns_driver: true };
        if let Some(blob) = session {
            // the browser is already acquired here; a failed restore must
            // not leak the session
            if let Err(e) = portal.restore_session(blob).await {
                portal.close().await;
                return Err(e);
            }
        }
        Ok(portal)
    }

    /// Wrap an externally owned driver. `close` will release the page but
    /// leave the browser to its owner.
    #[allow(dead_code)]
    pub fn attach(driver: WebDriver, config: PortalConfig) -> Self {
        Self { driver, config, owns_driver: false }
    }

    /// Cookies can only be installed from within their origin, so land on
    /// the base URL first. Individually rejected cookies are not fatal.
    async fn restore_session(&self, blob: &serde_json::Value) -> Result<()> {
        let Some(raw) = blob.get("cookies") else {
            return Ok(());
        };
        let cookies: Vec<StoredCookie> =
            serde_json::from_value(raw.clone()).context("malformed session blob")?;

        self.driver.goto(&self.config.base_url).await?;
        let mut restored = 0usize;
        for cookie in cookies {
            match self.driver.add_cookie(cookie.into_cookie()).await {
                Ok(()) => restored += 1,
                Err(e) => debug!("cookie rejected: {e}"),
            }
        }
        info!(restored, "session restored from previous run");
        Ok(())
    }

    /// Serialize the current authentication state into an opaque blob.
    pub async fn export_session(&self) -> Result<serde_json::Value> {
        let cookies: Vec<StoredCookie> = self
            .driver
            .get_all_cookies()
            .await?
            .iter()
            .map(StoredCookie::from_cookie)
            .collect();
        Ok(json!({ "cookies": cookies }))
    }

    /// Release the page, then the browser if this portal launched it.
    /// Failures here are logged so they never mask the run's outcome.
    pub async fn close(self) {
        if let Err(e) = self.driver.close_window().await {
            warn!("failed to close page: {e}");
        }
        if self.owns_driver {
            if let Err(e) = self.driver.quit().await {
                warn!("failed to shut down browser: {e}");
            }
        }
    }

    /// Make sure an authenticated timeline is on screen, logging in with
    /// the given credentials when the session probe comes up empty, then
    /// switch to the Following tab.
    pub async fn ensure_authenticated(&self, username: &str, password: &str) -> Result<()> {
        info!("opening home timeline");
        self.driver
            .goto(format!("{}/home", self.config.base_url))
            .await
            .context("navigation to home failed")?;

        if self.wait_for_timeline(TIMELINE_PROBE_TIMEOUT).await.is_ok() {
            info!(state = ?AuthState::Authenticated, "already logged in");
        } else {
            info!(state = ?AuthState::Unauthenticated, "no timeline marker, driving login");
            self.login(username, password).await?;
        }

        self.open_following_tab().await?;
        Ok(())
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        let sel = &self.config.selectors;

        debug!(state = ?AuthState::AwaitingIdentifier, "waiting for identifier input");
        let identifier = self
            .driver
            .query(by(&sel.login_identifier))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("could not find the identifier input")?;
        humanize::type_like_human(&identifier, username, &self.config.pacing).await?;
        humanize::pause((500, 2000)).await;
        self.driver
            .query(by(&sel.login_next))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("could not find the Next control")?
            .click()
            .await?;

        debug!(state = ?AuthState::AwaitingPassword, "waiting for password input");
        let password_input = self
            .driver
            .query(by(&sel.login_password))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("could not find the password input")?;
        humanize::type_like_human(&password_input, password, &self.config.pacing).await?;
        humanize::pause((500, 2000)).await;
        self.driver
            .query(by(&sel.login_submit))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("could not find the login button")?
            .click()
            .await?;

        if self.wait_for_timeline(LOGIN_FINAL_TIMEOUT).await.is_err() {
            warn!(state = ?AuthState::LoginFailed, "timeline never appeared after submit");
            bail!("login failed for user {username}");
        }
        info!(state = ?AuthState::Authenticated, "login complete");
        Ok(())
    }

    async fn open_following_tab(&self) -> Result<()> {
        let tab = self
            .driver
            .query(by(&self.config.selectors.following_tab))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("could not find the Following tab")?;
        tab.click().await?;
        humanize::pause((1500, 2500)).await;
        Ok(())
    }

    async fn wait_for_timeline(&self, timeout: Duration) -> WebDriverResult<WebElement> {
        self.driver
            .query(by(&self.config.selectors.timeline))
            .wait(timeout, POLL_INTERVAL)
            .first()
            .await
    }

    /// Scroll-and-extract loop. Returns up to `max_count` deduplicated
    /// tweets in first-seen order. Keeps scrolling until the target is
    /// met; an exhausted feed that never yields new cards will keep this
    /// looping, matching the upstream behaviour.
    pub async fn collect_timeline(&self, max_count: usize) -> Result<Vec<Tweet>> {
        self.wait_for_timeline(TIMELINE_LOAD_TIMEOUT)
            .await
            .context("timeline container never appeared")?;
        info!("timeline loaded");

        let sel = &self.config.selectors;
        let mut batch = Batch::new(max_count);

        while !batch.is_full() {
            let cards = self.driver.find_all(by(&sel.card)).await?;
            for card in &cards {
                if batch.is_full() {
                    break;
                }

                // glance at the card; cards without a measurable box are
                // still extracted, just not hovered
                if let Ok(rect) = card.rect().await {
                    if let Err(e) =
                        humanize::move_into(&self.driver, &rect, &self.config.pacing).await
                    {
                        debug!("pointer move skipped: {e}");
                    }
                }

                // a card with a missing mandatory field extracts to None;
                // driver errors propagate to the call-site retry
                let Some(tweet) = self.extract_card(card).await? else {
                    continue;
                };

                if batch.push(tweet) {
                    debug!(n = batch.len(), max_count, "tweet collected");
                }
                humanize::pause(self.config.pacing.card_pause_ms).await;
            }

            if batch.is_full() {
                break;
            }
            humanize::scroll_feed(&self.driver, &self.config.pacing).await?;
        }

        Ok(batch.into_tweets())
    }

    /// Author, text and permalink are mandatory; a card missing any of
    /// them yields `None`. Counters default to 0 when absent.
    async fn extract_card(&self, card: &WebElement) -> Result<Option<Tweet>> {
        let sel = &self.config.selectors;

        let author = match card.find(by(&sel.author)).await {
            Ok(el) => el.text().await?.trim().to_string(),
            Err(_) => return Ok(None),
        };

        let text_nodes = card.find_all(by(&sel.text)).await.unwrap_or_default();
        let mut pieces = Vec::with_capacity(text_nodes.len());
        for node in &text_nodes {
            pieces.push(node.text().await?.trim().to_string());
        }
        let text = pieces.join(" ").trim().to_string();

        let url = match card.find(by(&sel.url)).await {
            Ok(el) => el.attr("href").await?,
            Err(_) => None,
        };
        let Some(url) = url else { return Ok(None) };
        if author.is_empty() || text.is_empty() {
            return Ok(None);
        }

        Ok(Some(Tweet {
            author,
            text,
            likes: self.read_count(card, &sel.like_count).await,
            retweets: self.read_count(card, &sel.retweet_count).await,
            replies: self.read_count(card, &sel.reply_count).await,
            views: self.read_count(card, &sel.view_count).await,
            url,
        }))
    }

    async fn read_count(&self, card: &WebElement, locator: &str) -> u64 {
        match card.find(by(locator)).await {
            Ok(el) => parse_count(&el.text().await.unwrap_or_default()),
            Err(_) => 0,
        }
    }

    /// Like, then reply, then retweet, each step with its own retries.
    /// When the post turns out to be liked already the rest is skipped;
    /// the run has nothing left to do there.
    pub async fn apply_actions(&self, tweet: &Tweet, reply_text: &str) -> Result<()> {
        let url = absolute_url(&self.config.base_url, &tweet.url);
        let retry = &self.config.retry;

        with_retry(retry, "open permalink", || async {
            self.driver.goto(&url).await.map_err(anyhow::Error::from)
        })
        .await?;

        let freshly_liked = with_retry(retry, "like", || self.acknowledge()).await?;
        if !freshly_liked {
            info!("post already liked, skipping reply and retweet");
            return Ok(());
        }

        with_retry(retry, "reply", || self.post_reply(reply_text)).await?;
        with_retry(retry, "retweet", || self.amplify()).await?;

        info!("bot actions applied");
        Ok(())
    }

    /// Returns `true` only when this run performed the like. An existing
    /// unlike control means the post was already liked.
    async fn acknowledge(&self) -> Result<bool> {
        let sel = &self.config.selectors;
        let article = self
            .driver
            .query(by(&sel.detail_article))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("post detail never rendered")?;
        humanize::pause((1500, 3000)).await;

        if article.find(by(&sel.detail_unlike)).await.is_ok() {
            info!("post already liked (unlike control present)");
            return Ok(false);
        }

        let like = article
            .find(by(&sel.detail_like))
            .await
            .context("like control missing")?;
        like.click().await?;
        humanize::pause((400, 900)).await;
        info!("post liked");
        Ok(true)
    }

    async fn post_reply(&self, text: &str) -> Result<()> {
        let sel = &self.config.selectors;
        self.driver
            .query(by(&sel.detail_reply))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("reply control missing")?
            .click()
            .await?;

        let textbox = self
            .driver
            .query(by(&sel.detail_reply_textbox))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("reply composer never opened")?;
        humanize::type_like_human(&textbox, text, &self.config.pacing).await?;
        humanize::pause((300, 700)).await;

        self.driver
            .query(by(&sel.detail_reply_submit))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("reply submit button missing")?
            .click()
            .await?;
        humanize::pause((800, 1500)).await;
        info!("reply posted");
        Ok(())
    }

    /// Retweeting needs the menu control and its confirmation; both must
    /// land for the retweet to count.
    async fn amplify(&self) -> Result<()> {
        let sel = &self.config.selectors;
        self.driver
            .query(by(&sel.detail_retweet))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("retweet control missing")?
            .click()
            .await?;
        humanize::pause((400, 900)).await;

        self.driver
            .query(by(&sel.detail_retweet_confirm))
            .wait(ELEMENT_TIMEOUT, POLL_INTERVAL)
            .first()
            .await
            .context("retweet confirmation missing")?
            .click()
            .await?;
        humanize::pause((400, 900)).await;
        info!("post retweeted");
        Ok(())
    }
}

/// Accumulates extracted tweets for one collection pass: first-seen
/// order, one record per permalink, capped at `max_count`.
struct Batch {
    tweets: Vec<Tweet>,
    seen: HashSet<String>,
    max_count: usize,
}

impl Batch {
    fn new(max_count: usize) -> Self {
        Self {
            tweets: Vec::new(),
            seen: HashSet::new(),
            max_count,
        }
    }

    fn is_full(&self) -> bool {
        self.tweets.len() >= self.max_count
    }

    fn len(&self) -> usize {
        self.tweets.len()
    }

    /// Returns whether the tweet was kept. Duplicate permalinks and
    /// tweets past the cap are dropped.
    fn push(&mut self, tweet: Tweet) -> bool {
        if self.is_full() {
            return false;
        }
        if !self.seen.insert(tweet.url.clone()) {
            debug!(url = %tweet.url, "duplicate card");
            return false;
        }
        self.tweets.push(tweet);
        true
    }

    fn into_tweets(mut self) -> Vec<Tweet> {
        self.tweets.truncate(self.max_count);
        self.tweets
    }
}

/// Timeline permalinks come back relative ("/user/status/123").
fn absolute_url(base: &str, url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("{base}{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet(url: &str) -> Tweet {
        Tweet {
            author: "ada".into(),
            text: format!("post at {url}"),
            likes: 1,
            retweets: 0,
            replies: 0,
            views: 0,
            url: url.to_string(),
        }
    }

    #[test]
    fn duplicate_permalinks_collapse_to_one_record() {
        let mut batch = Batch::new(8);
        assert!(batch.push(tweet("/ada/status/1")));
        assert!(!batch.push(tweet("/ada/status/1")));
        assert_eq!(batch.into_tweets().len(), 1);
    }

    #[test]
    fn batch_fills_to_max_count_in_first_seen_order() {
        let mut batch = Batch::new(8);
        for i in 0..20 {
            batch.push(tweet(&format!("/u/status/{i}")));
        }
        assert!(batch.is_full());
        let tweets = batch.into_tweets();
        assert_eq!(tweets.len(), 8);
        for (i, t) in tweets.iter().enumerate() {
            assert_eq!(t.url, format!("/u/status/{i}"));
        }
    }

    #[test]
    fn relative_permalinks_resolve_against_base() {
        assert_eq!(
            absolute_url("https://x.com", "/ada/status/1"),
            "https://x.com/ada/status/1"
        );
        assert_eq!(
            absolute_url("https://x.com", "https://x.com/ada/status/1"),
            "https://x.com/ada/status/1"
        );
    }

    #[test]
    fn stored_cookie_round_trip() {
        let mut cookie = Cookie::new("auth_token", "abc123");
        cookie.set_domain(".x.com");
        cookie.set_path("/");
        cookie.set_secure(true);
        cookie.set_http_only(true);

        let stored = StoredCookie::from_cookie(&cookie);
        let json = serde_json::to_value(&stored).unwrap();
        let back: StoredCookie = serde_json::from_value(json).unwrap();
        let restored = back.into_cookie();

        assert_eq!(restored.name(), "auth_token");
        assert_eq!(restored.value(), "abc123");
        assert_eq!(restored.domain(), Some(".x.com"));
        assert_eq!(restored.path(), Some("/"));
        assert_eq!(restored.secure(), Some(true));
        assert_eq!(restored.http_only(), Some(true));
    }

    #[test]
    fn blob_without_expiry_still_parses() {
        let raw = serde_json::json!({"name": "ct0", "value": "tok"});
        let stored: StoredCookie = serde_json::from_value(raw).unwrap();
        assert!(stored.expires.is_none());
        assert_eq!(stored.into_cookie().name(), "ct0");
    }
}
