// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{TaskHandler, WorkerContext};
use async_trait::async_trait;
use em_core::{ErrorKind, Fault, Task};
use serde::Deserialize;
use serde_json::json;

/// Sends the prompt to the worker's local image endpoint and returns the
/// artifact location under the shared directory.
pub struct ImageHandler;

/// Accepted response shapes: either a path/URL the endpoint already
/// wrote, or raw image bytes we persist ourselves.
#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl TaskHandler for ImageHandler {
    async fn run(&self, task: &Task, ctx: &WorkerContext) -> Result<String, Fault> {
        let endpoint = ctx.image_endpoint.as_deref().ok_or_else(|| {
            Fault::new(ErrorKind::LlmEndpointUnreachable, "no image endpoint configured")
        })?;

        let body = json!({ "prompt": task.input });
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
                format!("image endpoint returned {}", response.status()),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Fault::new(ErrorKind::LlmEndpointUnreachable, e.to_string()))?;

        if content_type.starts_with("application/json") {
            let parsed: ImageResponse = serde_json::from_slice(&bytes)
                .map_err(|e| Fault::internal(format!("malformed image response: {e}")))?;
            if let Some(location) = parsed.url.or(parsed.path) {
                return Ok(location);
            }
            return Err(Fault::internal("image response had neither url nor path"));
        }

        // Raw bytes: persist under the shared directory.
        let file_name = format!("{}.png", task.id);
        let path = ctx.shared_dir.join(file_name);
        tokio::fs::create_dir_all(&ctx.shared_dir)
            .await
            .map_err(|e| Fault::internal(format!("shared dir unavailable: {e}")))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Fault::internal(format!("failed to write artifact: {e}")))?;
        Ok(path.display().to_string())
    }
}
