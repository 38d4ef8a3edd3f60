//! HTTP fetch tool. Private-range targets are flagged by the approval
//! engine's builtin rules before execution.

use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

const DEFAULT_MAX_BYTES: usize = 512 * 1024;

#[derive(Debug, Deserialize)]
struct HttpFetchArgs {
    url: String,
    #[serde(default)]
    max_bytes: Option<usize>,
}

pub struct HttpFetchTool {
    http: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the response body as text."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"},
                "max_bytes": {"type": "integer", "description": "Truncate the body after this many bytes"}
            },
            "required": ["url"]
        })
    }

    async fn run(&self, args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
        let args: HttpFetchArgs = serde_json::from_value(args)?;
        let cap = args.max_bytes.unwrap_or(DEFAULT_MAX_BYTES);

        let resp = self.http.get(&args.url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("fetch failed ({}): {:.200}", status, body);
        }
        if body.len() > cap {
            let truncated: String = body.chars().take(cap).collect();
            return Ok(ToolPayload::Text(format!(
                "{}\n… (truncated, {} bytes total)",
                truncated,
                body.len()
            )));
        }
        Ok(ToolPayload::Text(body))
    }
}
