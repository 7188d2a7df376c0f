// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic keyword planner.
//!
//! Classifies the request text by keyword priority: image beats llm beats
//! fleet beats echo; anything else becomes a sysinfo probe of the
//! coordinator itself. Matching is ASCII case-insensitive and whole-word.
//! The keyword lists are English-only.

use super::{PlanContext, PlannerStrategy};
use async_trait::async_trait;
use em_core::{Fault, Plan, PlanRequest, PlanTask, TaskKind};

const IMAGE_KEYWORDS: &[&str] =
    &["image", "picture", "photo", "draw", "render", "diffusion", "stable"];

const LLM_KEYWORDS: &[&str] = &[
    "summarize", "summary", "code", "write", "generate", "explain", "translate", "ask", "chat",
    "complete",
];

const FLEET_KEYWORDS: &[&str] = &["status", "collect", "all devices", "fleet"];

const ECHO_KEYWORDS: &[&str] = &["echo", "ping"];

/// Floor for both prompt and output token estimates.
const MIN_TOKENS: u32 = 16;

/// Output estimate when the text gives no length hint.
const DEFAULT_OUTPUT_TOKENS: u32 = 200;

/// The always-available planner.
#[derive(Default)]
pub struct SmartPlanner;

impl SmartPlanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlannerStrategy for SmartPlanner {
    async fn plan(&self, request: &PlanRequest, ctx: &PlanContext) -> Result<Plan, Fault> {
        Ok(classify(request, ctx))
    }
}

/// Case-insensitive whole-word (or whole-phrase) match.
fn contains_word(text: &str, keyword: &str) -> bool {
    let text = text.to_ascii_lowercase();
    let mut start = 0;
    while let Some(pos) = text[start..].find(keyword) {
        let at = start + pos;
        let end = at + keyword.len();
        let left_ok = at == 0
            || !text.as_bytes()[at - 1].is_ascii_alphanumeric();
        let right_ok =
            end == text.len() || !text.as_bytes()[end].is_ascii_alphanumeric();
        if left_ok && right_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

fn first_match<'a>(text: &str, keywords: &'a [&str]) -> Option<&'a str> {
    keywords.iter().copied().find(|k| contains_word(text, k))
}

/// `prompt_tokens = max(ceil(len/4), 16)`.
fn estimate_prompt_tokens(text: &str) -> u32 {
    let quarters = (text.len() as u32).div_ceil(4);
    quarters.max(MIN_TOKENS)
}

/// 200 unless the text hints at a length ("in 50 words"); a hint scales
/// at roughly 4/3 tokens per word.
fn estimate_output_tokens(text: &str) -> u32 {
    match word_count_hint(text) {
        Some(words) => ((words * 4).div_ceil(3)).max(MIN_TOKENS),
        None => DEFAULT_OUTPUT_TOKENS,
    }
}

/// Find "in N words" or a trailing "N words" in the text.
fn word_count_hint(text: &str) -> Option<u32> {
    let lower = text.to_ascii_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    for window in words.windows(2) {
        if let [number, unit] = window {
            let unit = unit.trim_matches(|c: char| !c.is_ascii_alphanumeric());
            if unit == "words" || unit == "word" {
                if let Ok(n) = number.parse::<u32>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

fn compute_task(kind: TaskKind, request: &PlanRequest) -> PlanTask {
    let mut task = PlanTask::new(kind, request.text.clone());
    task.prompt_tokens = Some(estimate_prompt_tokens(&request.text));
    task.output_tokens = Some(estimate_output_tokens(&request.text));
    task.required_caps = request.required_capabilities.clone();
    task
}

fn classify(request: &PlanRequest, ctx: &PlanContext) -> Plan {
    let text = &request.text;

    if let Some(keyword) = first_match(text, IMAGE_KEYWORDS) {
        return Plan::single(
            compute_task(TaskKind::ImageGenerate, request),
            format!("image keyword '{keyword}'"),
        );
    }

    if let Some(keyword) = first_match(text, LLM_KEYWORDS) {
        return Plan::single(
            compute_task(TaskKind::LlmGenerate, request),
            format!("llm keyword '{keyword}'"),
        );
    }

    if let Some(keyword) = first_match(text, FLEET_KEYWORDS) {
        let mut fan_out: Vec<PlanTask> = ctx
            .live_devices()
            .map(|device| {
                let mut task = PlanTask::new(TaskKind::Sysinfo, "");
                task.device = Some(device.id().clone());
                // Best-effort collection: one unreachable box should not
                // fail the whole fleet report.
                task.critical = false;
                task.required_caps = request.required_capabilities.clone();
                task
            })
            .collect();
        if let Some(max) = request.max_workers {
            fan_out.truncate(max.max(1));
        }
        if !fan_out.is_empty() {
            let count = fan_out.len();
            return Plan {
                groups: vec![fan_out],
                rationale: format!("fleet keyword '{keyword}': sysinfo on {count} live devices"),
                notes: Vec::new(),
                used_ai: false,
            };
        }
        // Fall through to the coordinator probe when nothing is live.
    }

    if let Some(keyword) = first_match(text, ECHO_KEYWORDS) {
        let mut task = PlanTask::new(TaskKind::Echo, request.text.clone());
        task.required_caps = request.required_capabilities.clone();
        return Plan::single(task, format!("echo keyword '{keyword}'"));
    }

    let mut probe = PlanTask::new(TaskKind::Sysinfo, "");
    probe.device = ctx.local_device.clone();
    probe.required_caps = request.required_capabilities.clone();
    Plan::single(probe, "no keyword match: sysinfo on the coordinator")
}

#[cfg(test)]
#[path = "smart_tests.rs"]
mod tests;
