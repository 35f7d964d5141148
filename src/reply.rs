use anyhow::{anyhow, Result};
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::Ollama;
use serde::Deserialize;
use std::fs;
use tracing::{debug, info};

use crate::tweet::Tweet;

const DEFAULT_PROMPT: &str = r#"You just read this post by {{AUTHOR}}:

{{TEXT}}

Write a short, friendly reply. One or two sentences, casual tone, no
hashtags, no quotation marks, don't sound like a bot. Just the reply,
nothing else:"#;

#[derive(Debug, Deserialize)]
struct PromptConfig {
    #[serde(default)]
    custom_prompt: Option<String>,
}

/// Generates reply text for a chosen tweet through a local Ollama model.
pub struct ReplyWriter {
    ollama: Ollama,
    model: String,
    template: String,
}

impl ReplyWriter {
    pub fn new(model: &str) -> Self {
        Self {
            ollama: Ollama::default(),
            model: model.to_string(),
            template: load_prompt_template(),
        }
    }

    pub async fn generate(&self, tweet: &Tweet) -> Result<String> {
        debug!(author = %tweet.author, "generating reply");
        let prompt = render_prompt(&self.template, tweet);
        let request = GenerationRequest::new(self.model.clone(), prompt);
        let response = self
            .ollama
            .generate(request)
            .await
            .map_err(|e| anyhow!("ollama failed: {e:?}"))?;
        let reply = tidy_reply(&response.response);
        if reply.is_empty() {
            return Err(anyhow!("model returned an empty reply"));
        }
        info!(reply = %reply, "reply generated");
        Ok(reply)
    }
}

fn load_prompt_template() -> String {
    match fs::read_to_string("prompt.toml") {
        Ok(content) => match toml::from_str::<PromptConfig>(&content) {
            Ok(config) => match config.custom_prompt {
                Some(custom) => {
                    debug!("loaded custom prompt from prompt.toml");
                    custom
                }
                None => DEFAULT_PROMPT.to_string(),
            },
            Err(e) => {
                debug!("failed to parse prompt.toml ({e}), using default prompt");
                DEFAULT_PROMPT.to_string()
            }
        },
        Err(_) => DEFAULT_PROMPT.to_string(),
    }
}

fn render_prompt(template: &str, tweet: &Tweet) -> String {
    let preview: String = tweet.text.chars().take(280).collect();
    template
        .replace("{{AUTHOR}}", &tweet.author)
        .replace("{{TEXT}}", &preview)
}

/// Models love wrapping output in quotes; strip them and flatten
/// whitespace at the edges.
fn tidy_reply(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '"' | '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}'))
        .trim()
        .to_string()
}
