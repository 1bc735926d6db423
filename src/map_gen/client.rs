//! Claude API map generator
//!
//! Sends the collected prompts to the Anthropic messages API and asks for a
//! JSON grid of tile ids back.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MapError, MapFuture, MapProvider, TileGrid};
use crate::game::constants::map;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;

pub struct ClaudeMapProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeMapProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    /// `ANTHROPIC_API_KEY` (required) and `MAP_GEN_MODEL` (optional)
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty())?;
        let model = std::env::var("MAP_GEN_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self::new(api_key, model))
    }

    async fn request_grid(&self, prompts: &[String]) -> Result<TileGrid, MapError> {
        let request = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: system_prompt(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message(prompts),
            }],
        };

        debug!("Requesting map for {} prompts", prompts.len());

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| MapError::Provider(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Claude API error: {} - {}", status, body);
            return Err(MapError::Provider(format!("API error: {}", status)));
        }

        let claude_response: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| MapError::Provider(format!("Failed to parse response: {}", e)))?;

        TileGrid::parse(&response_text(&claude_response)?)
    }
}

impl MapProvider for ClaudeMapProvider {
    fn generate<'a>(&'a self, prompts: &'a [String]) -> MapFuture<'a> {
        Box::pin(self.request_grid(prompts))
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}

fn system_prompt() -> String {
    format!(
        r#"You design small top-down island maps for a party game about pushing boulders uphill.
Answer with a JSON array of arrays of integers and nothing else.

- At most {max}x{max} tiles, every row the same length
- Tile ids: 0 water, 1 rock, 2 sand, 3 grass, 4 hill, 5 cliff, 6 lava, 7 ice, 8 forest, 9 goal
- Put exactly one goal tile on high ground
- Surround the map with rock"#,
        max = map::MAX_GRID_DIM
    )
}

fn user_message(prompts: &[String]) -> String {
    if prompts.is_empty() {
        return "Nobody submitted a prompt. Surprise us.".to_string();
    }
    let mut message = String::from("The players asked for:\n");
    for prompt in prompts {
        message.push_str("- ");
        message.push_str(prompt);
        message.push('\n');
    }
    message
}

fn response_text(response: &ClaudeResponse) -> Result<String, MapError> {
    response
        .content
        .iter()
        .find_map(|c| match c {
            ContentBlock::Text { text } => Some(text.clone()),
            ContentBlock::Other => None,
        })
        .ok_or_else(|| MapError::Provider("No text content in response".to_string()))
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
