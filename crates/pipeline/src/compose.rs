//! Cross-category digest: draft, evaluate, refine.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{info, warn};

use digest_llm::{GenerateError, Generator};
use digest_store::{AggregateStore, write_atomic};

use crate::prompts;
use crate::retry::{RetryPolicy, retry_on_rate_limit};

/// Score assumed when an evaluation does not carry one.
pub const DEFAULT_SCORE: f32 = 5.0;

static SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)score:\s*(\d+(?:\.\d+)?)").expect("score pattern is valid")
});

pub fn parse_score(evaluation: &str) -> f32 {
    SCORE
        .captures(evaluation)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_SCORE)
}

/// `(category, analysis)` pairs for the requested categories, in the
/// requested order and spelling.  Categories with no persisted analysis are
/// skipped.
pub async fn load_analyses(
    store: &AggregateStore,
    categories: &[String],
) -> Result<Vec<(String, String)>> {
    let aggregates = store.list().await?;
    let mut sections = Vec::new();
    for category in categories {
        let found = aggregates
            .iter()
            .find(|aggregate| aggregate.category.eq_ignore_ascii_case(category.trim()));
        match found {
            Some(aggregate) if !aggregate.analysis.trim().is_empty() => {
                info!(category = %category, chars = aggregate.analysis.len(), "analysis loaded");
                sections.push((category.clone(), aggregate.analysis.clone()));
            }
            Some(_) => warn!(category = %category, "aggregate has no analysis yet"),
            None => info!(category = %category, "no aggregate for category"),
        }
    }
    Ok(sections)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f32,
    /// The whole evaluation response, fed back into the next refinement.
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedDigest {
    pub text: String,
    pub score: f32,
    /// Refinement rounds that completed.
    pub rounds: usize,
}

pub struct DigestComposer {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    iterations: usize,
    section_words: usize,
}

impl DigestComposer {
    pub fn new(
        generator: Arc<dyn Generator>,
        retry: RetryPolicy,
        iterations: usize,
        section_words: usize,
    ) -> Self {
        Self {
            generator,
            retry,
            iterations,
            section_words,
        }
    }

    /// Draft a digest from `sections`, then refine it `iterations` times
    /// against the latest evaluation.  The best-scoring draft wins; a failed
    /// refinement or evaluation ends the rounds early.
    pub async fn compose(&self, sections: &[(String, String)]) -> Result<ComposedDigest> {
        if sections.is_empty() {
            bail!("no category analyses available to compose");
        }
        let names: Vec<&str> = sections.iter().map(|(name, _)| name.as_str()).collect();

        let draft = self
            .generate(
                "draft",
                &prompts::draft_system(&names),
                &prompts::draft_prompt(sections, self.section_words),
            )
            .await
            .context("initial draft failed")?;
        let evaluation = self
            .evaluate(&draft)
            .await
            .context("evaluation of the initial draft failed")?;
        info!(score = evaluation.score, "initial draft evaluated");

        let mut best = ComposedDigest {
            text: draft,
            score: evaluation.score,
            rounds: 0,
        };
        let mut feedback = evaluation.feedback;

        for round in 1..=self.iterations {
            let refined = match self
                .generate(
                    "refine",
                    &prompts::refine_system(&names, &feedback),
                    &prompts::refine_prompt(&best.text, self.section_words),
                )
                .await
            {
                Ok(text) => text,
                Err(err) => {
                    warn!(round, %err, "refinement failed, stopping");
                    break;
                }
            };
            let evaluation = match self.evaluate(&refined).await {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    warn!(round, %err, "evaluation failed, stopping");
                    break;
                }
            };

            best.rounds = round;
            info!(round, score = evaluation.score, best = best.score, "refinement evaluated");
            if evaluation.score > best.score {
                best.text = refined;
                best.score = evaluation.score;
                info!(round, score = best.score, "new best draft");
            }
            feedback = evaluation.feedback;
        }

        Ok(best)
    }

    async fn evaluate(&self, draft: &str) -> Result<Evaluation, GenerateError> {
        let feedback = self
            .generate(
                "evaluate",
                prompts::EVALUATION_SYSTEM,
                &prompts::evaluation_prompt(draft, self.section_words),
            )
            .await?;
        Ok(Evaluation {
            score: parse_score(&feedback),
            feedback,
        })
    }

    async fn generate(
        &self,
        operation: &str,
        system: &str,
        prompt: &str,
    ) -> Result<String, GenerateError> {
        retry_on_rate_limit(self.retry, operation, || self.generator.generate(system, prompt))
            .await
            .map(|text| text.trim().to_string())
    }
}

/// Atomically write the composed digest to `path`.
pub async fn write_digest(path: &Path, digest: &ComposedDigest) -> Result<()> {
    write_atomic(path, digest.text.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), score = digest.score, "digest saved");
    Ok(())
}
