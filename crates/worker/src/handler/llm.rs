// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{TaskHandler, WorkerContext};
use async_trait::async_trait;
use em_core::{ErrorKind, Fault, Task};
use serde::Deserialize;
use serde_json::json;

/// Sends the input to the worker's OpenAI-compatible chat endpoint.
pub struct LlmHandler;

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

/// Pull the completion text out of a chat response body.
pub(crate) fn parse_completion(body: &str) -> Result<String, Fault> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Fault::internal(format!("malformed completion response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| Fault::internal("completion response had no choices"))
}

#[async_trait]
impl TaskHandler for LlmHandler {
    async fn run(&self, task: &Task, ctx: &WorkerContext) -> Result<String, Fault> {
        let endpoint = ctx.llm_endpoint.as_deref().ok_or_else(|| {
            Fault::new(ErrorKind::LlmEndpointUnreachable, "no llm endpoint configured")
        })?;

        let body = json!({
            "messages": [{"role": "user", "content": task.input}],
            "stream": false,
        });

        let response = ctx
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Fault::new(ErrorKind::LlmEndpointUnreachable, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Fault::new(
                ErrorKind::LlmEndpointUnreachable,
                format!("llm endpoint returned {}", response.status()),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Fault::new(ErrorKind::LlmEndpointUnreachable, e.to_string()))?;
        parse_completion(&text)
    }
}
