//! Analysis and keyword synthesis for one category.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use digest_llm::{GenerateError, Generator};

use crate::prompts::{self, MAX_KEYWORDS};
use crate::retry::{RetryPolicy, retry_on_rate_limit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub analysis: String,
    pub keywords: Vec<String>,
}

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*•]+\s*|\d+[.)]\s+)").expect("list marker pattern is valid")
});

/// Split a keyword response into at most [`MAX_KEYWORDS`] phrases.
///
/// A multi-line response is read as one keyword per line; a single line is
/// read as a comma-separated list.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let items: Vec<&str> = if lines.len() > 1 {
        lines
    } else {
        raw.split(',').collect()
    };

    items
        .into_iter()
        .map(|item| {
            let item = item.trim();
            LIST_MARKER
                .replace(item, "")
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .take(MAX_KEYWORDS)
        .collect()
}

/// Boundary to the generation provider for category synthesis.
#[derive(Clone)]
pub struct SynthesisInvoker {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
}

impl SynthesisInvoker {
    pub fn new(generator: Arc<dyn Generator>, retry: RetryPolicy) -> Self {
        Self { generator, retry }
    }

    /// Produce a fresh analysis of `full_content` and keywords for it.
    ///
    /// A rate limit on either call restarts both calls after the back-off;
    /// any other failure is returned as-is.
    pub async fn synthesize(
        &self,
        category: &str,
        full_content: &str,
    ) -> Result<Synthesis, GenerateError> {
        let synthesis = retry_on_rate_limit(self.retry, "synthesize", || {
            self.synthesize_once(category, full_content)
        })
        .await?;
        info!(
            category,
            analysis_chars = synthesis.analysis.len(),
            keywords = synthesis.keywords.len(),
            "synthesis complete"
        );
        Ok(synthesis)
    }

    async fn synthesize_once(
        &self,
        category: &str,
        full_content: &str,
    ) -> Result<Synthesis, GenerateError> {
        debug!(category, content_chars = full_content.len(), "requesting analysis");
        let analysis = self
            .generator
            .generate(
                prompts::ANALYSIS_SYSTEM,
                &prompts::analysis_prompt(category, full_content),
            )
            .await?;

        debug!(category, "requesting keywords");
        let raw_keywords = self
            .generator
            .generate(
                prompts::KEYWORD_SYSTEM,
                &prompts::keyword_prompt(category, &analysis),
            )
            .await?;

        Ok(Synthesis {
            keywords: parse_keywords(&raw_keywords),
            analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::test_support::ScriptedGenerator;

    #[test]
    fn comma_separated_keywords_are_trimmed_and_capped() {
        let raw = " AI chips , export rules,, startups, , a, b, c, d, e ";
        assert_eq!(
            parse_keywords(raw),
            vec!["AI chips", "export rules", "startups", "a", "b", "c", "d"]
        );
    }

    #[test]
    fn line_separated_keywords_strip_list_markers() {
        let raw = "1. Interest rates\n2) Bond yields\n- \"Earnings season\"\n\n* Crypto, regulation";
        assert_eq!(
            parse_keywords(raw),
            vec!["Interest rates", "Bond yields", "Earnings season", "Crypto, regulation"]
        );
    }

    #[test]
    fn numbers_inside_keywords_are_kept() {
        assert_eq!(parse_keywords("3.5% growth, 2024 elections"), vec!["3.5% growth", "2024 elections"]);
    }

    #[test]
    fn empty_response_yields_no_keywords() {
        assert!(parse_keywords("   \n ").is_empty());
    }

    #[tokio::test]
    async fn keywords_are_extracted_from_the_produced_analysis() {
        let generator = Arc::new(ScriptedGenerator::echo());
        let invoker = SynthesisInvoker::new(generator.clone(), RetryPolicy::default());
        let synthesis = invoker.synthesize("Tech", "X<<>>Y").await.unwrap();

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].system, prompts::ANALYSIS_SYSTEM);
        assert!(calls[0].prompt.contains("X<<>>Y"));
        assert_eq!(calls[1].system, prompts::KEYWORD_SYSTEM);
        assert!(calls[1].prompt.contains(&synthesis.analysis));
        assert_eq!(synthesis.keywords, vec!["alpha", "beta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_twice_then_success_uses_the_retried_result() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        // The keyword call is rate limited on the first two rounds, so each
        // round re-issues the analysis call too.
        let generator = Arc::new(ScriptedGenerator::new(move |call, system, _prompt| {
            if system == prompts::ANALYSIS_SYSTEM {
                let round = counter.fetch_add(1, Ordering::SeqCst);
                return Ok(format!("analysis round {round}"));
            }
            if call < 4 {
                Err(GenerateError::RateLimited { provider: "test" })
            } else {
                Ok("final, keywords".to_string())
            }
        }));
        let invoker = SynthesisInvoker::new(
            generator.clone(),
            RetryPolicy::new(Duration::from_secs(20), 0),
        );

        let started = tokio::time::Instant::now();
        let synthesis = invoker.synthesize("Finance", "content").await.unwrap();
        assert_eq!(synthesis.analysis, "analysis round 2");
        assert_eq!(synthesis.keywords, vec!["final", "keywords"]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(generator.calls().len(), 6);
        assert!(started.elapsed() >= Duration::from_secs(40));
    }

    #[tokio::test]
    async fn non_rate_limit_failure_propagates_immediately() {
        let generator = Arc::new(ScriptedGenerator::new(|_, _, _| {
            Err(GenerateError::Api {
                provider: "test",
                status: 500,
                body: "down".to_string(),
            })
        }));
        let invoker = SynthesisInvoker::new(generator.clone(), RetryPolicy::default());
        let err = invoker.synthesize("Tech", "x").await.unwrap_err();
        assert!(matches!(err, GenerateError::Api { status: 500, .. }));
        assert_eq!(generator.calls().len(), 1);
    }
}
