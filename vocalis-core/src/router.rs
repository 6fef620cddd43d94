//! Source router — admission filtering and voice resolution per source.
//!
//! Every submission runs under a named source (falling back to `default`):
//! the source decides the voice (unless overridden), the priority, the
//! speaking rate, and an optional regex allow-list. Patterns match
//! case-insensitively with no implicit anchoring; the regex crate's
//! automaton guarantees linear-time matching, so match time stays bounded
//! without a watchdog.

use std::collections::HashMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::VoiceCatalog;
use crate::queue::{CancelFlag, SpeechQueue, SpeechRequest};

/// Name of the fallback source every deployment is expected to configure.
pub const DEFAULT_SOURCE: &str = "default";

/// Priority assigned to sources that do not set one.
pub const DEFAULT_PRIORITY: u32 = 3;

/// Per-source configuration as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
    /// Voice id to speak with; unset defers to the catalog default.
    pub voice: Option<String>,
    /// Admission allow-list. Unset or empty means "admit all".
    pub filters: Option<Vec<String>>,
    /// Lower is more urgent.
    pub priority: u32,
    /// Speaking-rate multiplier.
    pub speed: f32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            voice: None,
            filters: None,
            priority: DEFAULT_PRIORITY,
            speed: 1.0,
        }
    }
}

/// Outcome of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Enqueued { request_id: String },
    /// Text was empty after trimming — malformed input.
    EmptyText,
    /// Request was well-formed but no filter pattern matched.
    FilterRejected,
    /// Neither the named source nor `default` is configured.
    NoSource,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Enqueued { .. })
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Admission::Enqueued { request_id } => Some(request_id),
            _ => None,
        }
    }
}

/// A source's filter list with its patterns compiled once.
///
/// A pattern that fails to compile is kept as a permanently-non-matching
/// slot: it cannot admit on its own, but it also does not turn a non-empty
/// list into "admit all".
struct FilterSet {
    slots: Vec<Option<Regex>>,
}

impl FilterSet {
    fn compile(source: &str, patterns: &[String]) -> Self {
        let slots = patterns
            .iter()
            .map(|pattern| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!(source, pattern, error = %e, "filter pattern failed to compile — treating as non-matching");
                        None
                    }
                }
            })
            .collect();
        Self { slots }
    }

    fn is_pass_through(&self) -> bool {
        self.slots.is_empty()
    }

    fn matches(&self, text: &str) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|regex| regex.is_match(text))
    }
}

struct CompiledSource {
    voice: Option<String>,
    filters: Option<FilterSet>,
    priority: u32,
    speed: f32,
}

/// Routes submissions into the speech queue.
pub struct SourceRouter {
    catalog: Arc<VoiceCatalog>,
    queue: Arc<SpeechQueue>,
    sources: HashMap<String, CompiledSource>,
}

impl SourceRouter {
    pub fn new(
        catalog: Arc<VoiceCatalog>,
        queue: Arc<SpeechQueue>,
        sources: HashMap<String, SourceConfig>,
    ) -> Self {
        let sources = sources
            .into_iter()
            .map(|(name, config)| {
                let compiled = CompiledSource {
                    filters: config
                        .filters
                        .as_deref()
                        .map(|patterns| FilterSet::compile(&name, patterns)),
                    voice: config.voice,
                    priority: config.priority,
                    speed: config.speed,
                };
                (name, compiled)
            })
            .collect();

        Self {
            catalog,
            queue,
            sources,
        }
    }

    /// Filter, resolve and enqueue one utterance.
    pub fn submit(
        &self,
        text: &str,
        source_name: Option<&str>,
        voice_override: Option<&str>,
    ) -> Admission {
        match self.route(text, source_name, voice_override) {
            Ok(request) => {
                let request_id = self.queue.enqueue(request);
                Admission::Enqueued { request_id }
            }
            Err(rejection) => rejection,
        }
    }

    /// Admission decision and request assembly, separated from enqueueing.
    fn route(
        &self,
        text: &str,
        source_name: Option<&str>,
        voice_override: Option<&str>,
    ) -> Result<SpeechRequest, Admission> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Admission::EmptyText);
        }

        let (resolved_name, source) = self.resolve_source(source_name).ok_or_else(|| {
            warn!(
                source = source_name.unwrap_or(DEFAULT_SOURCE),
                "no source config and no default — rejecting submission"
            );
            Admission::NoSource
        })?;

        if let Some(filters) = &source.filters {
            if !filters.is_pass_through() && !filters.matches(trimmed) {
                debug!(source = resolved_name, "no filter pattern matched — not admitted");
                return Err(Admission::FilterRejected);
            }
        }

        // Strict precedence: explicit override, then the source's voice,
        // then whatever the catalog falls back to.
        let requested_voice = voice_override
            .filter(|v| !v.is_empty())
            .or(source.voice.as_deref());
        let voice_id = self.catalog.resolve(requested_voice);

        Ok(SpeechRequest {
            id: uuid::Uuid::new_v4().to_string(),
            text: trimmed.to_string(),
            voice_id,
            priority: source.priority,
            source: resolved_name.to_string(),
            speed: source.speed,
            cancel: CancelFlag::new(),
        })
    }

    fn resolve_source<'a>(&'a self, source_name: Option<&'a str>) -> Option<(&'a str, &'a CompiledSource)> {
        if let Some(name) = source_name.filter(|n| !n.is_empty()) {
            if let Some(source) = self.sources.get(name) {
                return Some((name, source));
            }
        }
        self.sources
            .get_key_value(DEFAULT_SOURCE)
            .map(|(name, source)| (name.as_str(), source))
    }
}
