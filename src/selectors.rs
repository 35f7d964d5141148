use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thirtyfour::By;

/// Logical locator table for the target site. Every field is a locator
/// string: CSS by default, XPath when it starts with `//`. Shipped defaults
/// match the current x.com markup; a `selectors.toml` next to the binary
/// overrides individual fields when the markup drifts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectorTable {
    pub timeline: String,
    pub card: String,
    pub author: String,
    pub text: String,
    pub url: String,
    pub like_count: String,
    pub retweet_count: String,
    pub reply_count: String,
    pub view_count: String,
    pub following_tab: String,
    pub login_identifier: String,
    pub login_next: String,
    pub login_password: String,
    pub login_submit: String,
    pub detail_article: String,
    pub detail_like: String,
    pub detail_unlike: String,
    pub detail_reply: String,
    pub detail_reply_textbox: String,
    pub detail_reply_submit: String,
    pub detail_retweet: String,
    pub detail_retweet_confirm: String,
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self {
            timeline: r#"div[aria-label="Home timeline"]"#.into(),
            card: r#"div[aria-label="Home timeline"] article"#.into(),
            author: r#"div[data-testid="User-Name"] span"#.into(),
            text: r#"div[data-testid="tweetText"] span, div[data-testid="tweetText"]"#.into(),
            url: r#"a[href*="/status/"]"#.into(),
            like_count: r#"button[data-testid="like"] div[dir="ltr"] span span span"#.into(),
            retweet_count: r#"button[data-testid="retweet"] div[dir="ltr"] span span span"#.into(),
            reply_count: r#"button[data-testid="reply"] div[dir="ltr"] span span span"#.into(),
            view_count: r#"a[href*="/analytics"] div[dir="ltr"] span span span"#.into(),
            following_tab: r#"//div[@role="tablist"]//span[text()="Following"]"#.into(),
            login_identifier: r#"input[name="text"]"#.into(),
            login_next: r#"//span[text()="Next"]"#.into(),
            login_password: r#"input[name="password"]"#.into(),
            login_submit: r#"//span[text()="Log in"]"#.into(),
            detail_article: r#"article[data-testid="tweet"]"#.into(),
            detail_like: r#"button[data-testid="like"]"#.into(),
            detail_unlike: r#"button[data-testid="unlike"]"#.into(),
            detail_reply: r#"button[data-testid="reply"]"#.into(),
            detail_reply_textbox: r#"div[role="dialog"] div[role="textbox"]"#.into(),
            detail_reply_submit: r#"button[data-testid="tweetButton"]"#.into(),
            detail_retweet: r#"button[data-testid="retweet"]"#.into(),
            detail_retweet_confirm: r#"div[data-testid="retweetConfirm"]"#.into(),
        }
    }
}

impl SelectorTable {
    /// Load overrides from `path` if it exists, otherwise the defaults.
    /// The table is validated either way.
    pub fn load(path: &Path) -> Result<Self> {
        let table = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("timeline", &self.timeline),
            ("card", &self.card),
            ("author", &self.author),
            ("text", &self.text),
            ("url", &self.url),
            ("like_count", &self.like_count),
            ("retweet_count", &self.retweet_count),
            ("reply_count", &self.reply_count),
            ("view_count", &self.view_count),
            ("following_tab", &self.following_tab),
            ("login_identifier", &self.login_identifier),
            ("login_next", &self.login_next),
            ("login_password", &self.login_password),
            ("login_submit", &self.login_submit),
            ("detail_article", &self.detail_article),
            ("detail_like", &self.detail_like),
            ("detail_unlike", &self.detail_unlike),
            ("detail_reply", &self.detail_reply),
            ("detail_reply_textbox", &self.detail_reply_textbox),
            ("detail_reply_submit", &self.detail_reply_submit),
            ("detail_retweet", &self.detail_retweet),
            ("detail_retweet_confirm", &self.detail_retweet_confirm),
        ] {
            if value.trim().is_empty() {
                bail!("selector '{}' is empty", name);
            }
        }
        Ok(())
    }
}

fn is_xpath(locator: &str) -> bool {
    locator.starts_with("//")
}

/// Turn a locator string into a thirtyfour `By`. XPath locators start
/// with `//`, everything else is CSS.
pub fn by(locator: &str) -> By {
    if is_xpath(locator) {
        By::XPath(locator)
    } else {
        By::Css(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SelectorTable::default().validate().unwrap();
    }

    #[test]
    fn empty_locator_is_rejected() {
        let mut table = SelectorTable::default();
        table.card = "  ".into();
        assert!(table.validate().is_err());
    }

    #[test]
    fn partial_override_keeps_defaults() {
        let table: SelectorTable =
            toml::from_str(r#"timeline = 'main[role="main"]'"#).unwrap();
        assert_eq!(table.timeline, r#"main[role="main"]"#);
        assert_eq!(table.card, SelectorTable::default().card);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let raw = "timeline = 'a'\ntimeline = 'b'\n";
        assert!(toml::from_str::<SelectorTable>(raw).is_err());
    }

    #[test]
    fn xpath_locators_are_detected() {
        assert!(is_xpath("//span[text()='Next']"));
        assert!(!is_xpath("div article"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let table = SelectorTable::load(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(table.author, SelectorTable::default().author);
    }
}
