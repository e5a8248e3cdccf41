use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

// ── Source ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// CSV file that the mail collector keeps appending to.  Overridden at
    /// runtime by `DIGEST_SOURCE_CSV` when set.
    pub csv_path: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            csv_path: "email_database.csv".to_string(),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<category>.json` aggregate per category.
    pub reports_dir: String,
    /// Journal the processed message ids so a restart does not re-merge rows
    /// that were already folded into an aggregate.  With `false` the ledger
    /// lives in memory only and is rebuilt from scratch on every start.
    pub persist_ledger: bool,
    /// JSONL journal of processed message ids.  Only used when
    /// `persist_ledger` is `true`.
    pub ledger_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reports_dir: "outputs/category_reports".to_string(),
            persist_ledger: true,
            ledger_path: ".digest/ledger.jsonl".to_string(),
        }
    }
}

// ── Schedule ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between poll ticks.
    pub poll_interval_secs: u64,
    /// Pause between two categories of the same cycle.  Only a throttle for
    /// the generation provider; `0` disables it.
    pub inter_category_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            inter_category_delay_secs: 2,
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openrouter` (any OpenAI-compatible endpoint) or `ollama`.
    pub provider: String,
    pub openrouter_model: String,
    /// Base URL of the OpenAI-compatible API.  Point it at
    /// `https://api.openai.com/v1` to talk to OpenAI directly.
    pub openrouter_base_url: String,
    pub ollama_model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    /// Output budget passed with every generation request.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Fixed wait after a rate-limit response before the synthesis is retried.
    pub rate_limit_backoff_secs: u64,
    /// Attempt ceiling for rate-limited synthesis.  `0` retries forever, which
    /// is what the long-running poll loop wants.
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            rate_limit_backoff_secs: 20,
            max_attempts: 0,
            request_timeout_secs: 120,
        }
    }
}

// ── Categories ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    /// Recognized category labels, in display order.  Rows carrying any other
    /// label are dropped.
    pub allow: Vec<String>,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            allow: vec![
                "Finance".to_string(),
                "Creative".to_string(),
                "Global News".to_string(),
                "US News".to_string(),
                "Tech".to_string(),
                "Sports".to_string(),
            ],
        }
    }
}

// ── Compose ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Categories whose analyses are stitched into the final digest.
    pub categories: Vec<String>,
    /// Evaluate-and-refine rounds after the first draft.
    pub iterations: usize,
    /// Target words per category section, quoted in the prompts.
    pub section_words: usize,
    pub output_path: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                "Tech".to_string(),
                "Sports".to_string(),
                "Global News".to_string(),
                "US News".to_string(),
                "Finance".to_string(),
            ],
            iterations: 3,
            section_words: 450,
            output_path: "newsletter.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub schedule: ScheduleConfig,
    pub llm: LlmConfig,
    pub categories: CategoriesConfig,
    pub compose: ComposeConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.trim().is_empty() {
                config.llm.ollama_base_url = value;
            }
        }

        if let Ok(value) = env::var("DIGEST_SOURCE_CSV") {
            if !value.trim().is_empty() {
                config.source.csv_path = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("ollama") {
            &self.llm.ollama_model
        } else {
            &self.llm.openrouter_model
        }
    }

    /// Reject configurations the poll loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.categories.allow.iter().all(|c| c.trim().is_empty()) {
            bail!("categories.allow must name at least one category");
        }
        if self.schedule.poll_interval_secs == 0 {
            bail!("schedule.poll_interval_secs must be greater than zero");
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be greater than zero");
        }
        match self.llm.provider.to_ascii_lowercase().as_str() {
            "openrouter" | "openai" | "ollama" => Ok(()),
            other => bail!("unknown llm.provider '{other}' (expected openrouter or ollama)"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
