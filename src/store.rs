use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::debug;

use crate::tweet::Tweet;

/// One entry in `bots.toml`. Passwords never live in the file; each bot
/// names the environment variable that holds its password.
#[derive(Debug, Clone, Deserialize)]
pub struct BotEntry {
    pub name: String,
    pub username: String,
    pub password_env: String,
}

#[derive(Debug, Deserialize)]
struct BotRegistry {
    bots: Vec<BotEntry>,
}

/// Credentials plus the previous run's session blob, if any.
#[derive(Debug)]
pub struct BotCredentials {
    pub name: String,
    pub username: String,
    pub password: String,
    pub session: Option<serde_json::Value>,
}

/// File-backed registry, session-blob storage and reply ledger, rooted at
/// the working directory:
///
/// ```text
/// bots.toml             bot registry
/// sessions/<name>.json  opaque session blob per bot
/// posted.txt            digest | timestamp | author | text prefix
/// replies.txt           digest | reply text
/// ```
pub struct BotStore {
    root: PathBuf,
}

impl BotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn get_bot(&self, name: &str) -> Result<Option<BotCredentials>> {
        let registry_path = self.root.join("bots.toml");
        let raw = fs::read_to_string(&registry_path)
            .with_context(|| format!("failed to read {}", registry_path.display()))?;
        let registry: BotRegistry =
            toml::from_str(&raw).context("failed to parse bots.toml")?;

        let Some(entry) = registry.bots.into_iter().find(|b| b.name == name) else {
            return Ok(None);
        };

        let password = std::env::var(&entry.password_env).with_context(|| {
            format!("environment variable {} is not set", entry.password_env)
        })?;

        let session = match fs::read_to_string(self.session_path(&entry.name)) {
            Ok(raw) => Some(serde_json::from_str(&raw).context("corrupt session blob")?),
            Err(_) => None,
        };

        Ok(Some(BotCredentials {
            name: entry.name,
            username: entry.username,
            password,
            session,
        }))
    }

    pub fn update_session(&self, name: &str, blob: &serde_json::Value) -> Result<()> {
        let path = self.session_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string(blob)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(bot = name, "session blob saved");
        Ok(())
    }

    /// Has this author/text pair been handled on a previous run?
    pub fn reply_exists(&self, tweet: &Tweet) -> Result<bool> {
        let digest = tweet_digest(tweet);
        let Ok(file) = fs::File::open(self.root.join("posted.txt")) else {
            return Ok(false);
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.split('|').next().map(str::trim) == Some(digest.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Record the tweet in the ledger; returns the ledger id for
    /// `attach_reply`.
    pub fn create(&self, tweet: &Tweet) -> Result<String> {
        let digest = tweet_digest(tweet);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("posted.txt"))?;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let preview: String = tweet.text.chars().take(80).collect();
        writeln!(file, "{} | {} | {} | {}", digest, timestamp, tweet.author, preview)?;
        Ok(digest)
    }

    pub fn attach_reply(&self, id: &str, reply: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("replies.txt"))?;
        writeln!(file, "{} | {}", id, reply.replace('\n', " "))?;
        Ok(())
    }

    fn session_path(&self, name: &str) -> PathBuf {
        self.root.join("sessions").join(format!("{name}.json"))
    }
}

fn tweet_digest(tweet: &Tweet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tweet.author.as_bytes());
    hasher.update(b"\x00");
    hasher.update(tweet.text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tweet() -> Tweet {
        Tweet {
            author: "someone".into(),
            text: "a reasonably interesting post".into(),
            likes: 3,
            retweets: 1,
            replies: 0,
            views: 40,
            url: "/someone/status/123".into(),
        }
    }

    fn store() -> (tempfile::TempDir, BotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BotStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn ledger_round_trip() {
        let (_dir, store) = store();
        let tweet = sample_tweet();
        assert!(!store.reply_exists(&tweet).unwrap());
        let id = store.create(&tweet).unwrap();
        assert!(store.reply_exists(&tweet).unwrap());
        store.attach_reply(&id, "nice one\nreally").unwrap();
    }

    #[test]
    fn different_text_is_a_different_ledger_entry() {
        let (_dir, store) = store();
        store.create(&sample_tweet()).unwrap();
        let mut other = sample_tweet();
        other.text = "something else entirely".into();
        assert!(!store.reply_exists(&other).unwrap());
    }

    #[test]
    fn session_blob_round_trip() {
        let (_dir, store) = store();
        let blob = json!({"cookies": [{"name": "auth", "value": "x"}]});
        store.update_session("main", &blob).unwrap();
        let raw = fs::read_to_string(store.session_path("main")).unwrap();
        let loaded: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded, blob);
    }

    #[test]
    fn unknown_bot_is_none() {
        let (dir, store) = store();
        fs::write(
            dir.path().join("bots.toml"),
            "[[bots]]\nname = \"main\"\nusername = \"u\"\npassword_env = \"MAGPIE_TEST_PW\"\n",
        )
        .unwrap();
        assert!(store.get_bot("other").unwrap().is_none());
    }
}
