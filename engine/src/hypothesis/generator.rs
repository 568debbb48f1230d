//! Hypothesis generation from validated summaries

use sdk::errors::EngineError;
use sdk::types::{ResearchHypothesis, ValidatedSummary};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::llm::{outermost_span, LLMProvider, Message};

const SYSTEM_PROMPT: &str = "You are a research hypothesis generator. Your task is to analyze research \
paper summaries and generate novel, testable research hypotheses.

Guidelines:
- Generate hypotheses that bridge findings across multiple papers
- Focus on gaps in current research that could be explored
- Ensure hypotheses are specific, testable, and grounded in the provided evidence
- Each hypothesis should cite which papers support it
- Rate your confidence (0-1) based on how well-supported the hypothesis is

Output format: JSON array of hypotheses, each with:
- \"text\": The hypothesis statement (a research question or testable claim)
- \"supporting_papers\": List of paper titles that support this hypothesis
- \"confidence\": Float 0-1 indicating confidence
- \"rationale\": Brief explanation of why this is a promising research direction";

const DEFAULT_CONFIDENCE: f64 = 0.5;
const REFINE_TEMPERATURE: f32 = 0.5;
/// Evidence summaries shown in a refinement prompt
const REFINE_EVIDENCE: usize = 5;

pub struct HypothesisGenerator {
    provider: Arc<dyn LLMProvider>,
    hypotheses_per_batch: usize,
    temperature: f32,
}

impl HypothesisGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, hypotheses_per_batch: usize, temperature: f32) -> Self {
        Self {
            provider,
            hypotheses_per_batch: hypotheses_per_batch.max(1),
            temperature,
        }
    }

    /// Generate hypotheses for `branch_id` from `summaries`.
    ///
    /// Provider and parse failures are logged and produce an empty vector, so
    /// one bad batch never stops a research loop.
    pub async fn generate(
        &self,
        summaries: &[ValidatedSummary],
        branch_id: &str,
        context: Option<&str>,
    ) -> Vec<ResearchHypothesis> {
        if summaries.is_empty() {
            warn!(branch_id, "No summaries provided for hypothesis generation");
            return Vec::new();
        }

        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(build_prompt(summaries, context, self.hypotheses_per_batch)),
        ];

        let reply = match self.provider.complete(&messages, Some(self.temperature)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(branch_id, provider = self.provider.name(), "Failed to generate hypotheses: {}", e);
                return Vec::new();
            }
        };

        let titles: Vec<(&str, &str)> = summaries
            .iter()
            .map(|s| (s.paper_title.as_str(), s.paper_id.as_str()))
            .collect();

        match parse_hypotheses(&reply, &titles, branch_id) {
            Ok(hypotheses) => {
                info!(
                    branch_id,
                    hypotheses = hypotheses.len(),
                    summaries = summaries.len(),
                    "Generated hypotheses"
                );
                hypotheses
            }
            Err(e) => {
                error!(branch_id, "Failed to parse hypotheses: {}", e);
                Vec::new()
            }
        }
    }

    /// Rewrite `hypothesis` to address `feedback`.
    ///
    /// The refined hypothesis gets a new id and keeps the supporting papers
    /// and branch of the original. Provider and parse failures return the
    /// original unchanged.
    pub async fn refine(
        &self,
        hypothesis: &ResearchHypothesis,
        feedback: &str,
        summaries: &[ValidatedSummary],
    ) -> ResearchHypothesis {
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(build_refine_prompt(hypothesis, feedback, summaries)),
        ];

        let reply = match self.provider.complete(&messages, Some(REFINE_TEMPERATURE)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(hypothesis_id = %hypothesis.id, "Failed to refine hypothesis: {}", e);
                return hypothesis.clone();
            }
        };

        match parse_refinement(&reply, hypothesis) {
            Ok(refined) => {
                info!(hypothesis_id = %hypothesis.id, refined_id = %refined.id, "Refined hypothesis");
                refined
            }
            Err(e) => {
                error!(hypothesis_id = %hypothesis.id, "Failed to parse refined hypothesis: {}", e);
                hypothesis.clone()
            }
        }
    }

    /// Run [`Self::generate`] over consecutive batches of `batch_size` summaries
    pub async fn generate_from_batch(
        &self,
        summaries: &[ValidatedSummary],
        branch_id: &str,
        batch_size: usize,
        context: Option<&str>,
    ) -> Vec<ResearchHypothesis> {
        let mut all = Vec::new();
        for batch in summaries.chunks(batch_size.max(1)) {
            all.extend(self.generate(batch, branch_id, context).await);
        }
        all
    }
}

fn build_prompt(summaries: &[ValidatedSummary], context: Option<&str>, count: usize) -> String {
    let papers: Vec<String> = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "Paper {}: {}\nGroundedness: {:.2}%\nSummary: {}\n",
                i + 1,
                s.paper_title,
                s.groundedness * 100.0,
                s.summary
            )
        })
        .collect();

    let context = context
        .map(|c| format!("\nResearch Context: {}\n", c))
        .unwrap_or_default();

    format!(
        "Based on the following research paper summaries, generate {count} novel research hypotheses.\n\
         {context}\n\
         Paper Summaries:\n{papers}\n\n\
         Generate {count} hypotheses that:\n\
         1. Identify gaps or unexplored connections in the research\n\
         2. Are testable and specific\n\
         3. Build on findings from multiple papers\n\
         4. Could lead to impactful research\n\n\
         Return ONLY a JSON array of hypothesis objects.",
        count = count,
        context = context,
        papers = papers.join("\n---\n"),
    )
}

fn build_refine_prompt(hypothesis: &ResearchHypothesis, feedback: &str, summaries: &[ValidatedSummary]) -> String {
    let evidence: Vec<String> = summaries
        .iter()
        .take(REFINE_EVIDENCE)
        .map(|s| format!("- {}: {}", s.paper_title, s.summary))
        .collect();

    format!(
        "Refine the following research hypothesis based on the feedback provided.\n\n\
         Original Hypothesis: {text}\n\n\
         Feedback: {feedback}\n\n\
         Supporting Evidence:\n{evidence}\n\n\
         Provide a refined hypothesis that addresses the feedback while remaining grounded in the evidence.\n\
         Return ONLY a JSON object with: \"text\", \"confidence\", \"rationale\"",
        text = hypothesis.text,
        feedback = feedback,
        evidence = evidence.join("\n"),
    )
}

/// Resolve a model-cited title to a paper id: exact match first, then
/// case-insensitive containment in either direction.
fn match_title(cited: &str, titles: &[(&str, &str)]) -> Option<String> {
    if let Some((_, id)) = titles.iter().find(|(title, _)| *title == cited) {
        return Some(id.to_string());
    }

    let cited = cited.to_lowercase();
    titles
        .iter()
        .find(|(title, _)| {
            let title = title.to_lowercase();
            title.contains(&cited) || cited.contains(&title)
        })
        .map(|(_, id)| id.to_string())
}

fn confidence_of(item: &Value, default: f64) -> f64 {
    match item.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Parse a model reply holding a JSON array of hypotheses.
///
/// The array may be surrounded by prose. Items that are not objects or have
/// no text are skipped. `titles` pairs each known paper title with its id.
pub fn parse_hypotheses(
    reply: &str,
    titles: &[(&str, &str)],
    branch_id: &str,
) -> Result<Vec<ResearchHypothesis>, EngineError> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let array = match (start, end) {
        (Some(start), Some(end)) if end > start => &reply[start..=end],
        _ => return Err(EngineError::HypothesisParse("no JSON array in reply".to_string())),
    };

    let items: Vec<Value> =
        serde_json::from_str(array).map_err(|e| EngineError::HypothesisParse(e.to_string()))?;

    let hypotheses = items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| {
            let text = item.get("text").and_then(Value::as_str).filter(|t| !t.is_empty())?;

            let supporting: Vec<String> = item
                .get("supporting_papers")
                .and_then(Value::as_array)
                .map(|cited| {
                    cited
                        .iter()
                        .filter_map(Value::as_str)
                        .filter_map(|title| match_title(title, titles))
                        .collect()
                })
                .unwrap_or_default();

            Some(ResearchHypothesis::new(
                Uuid::new_v4().to_string(),
                text,
                supporting,
                confidence_of(item, DEFAULT_CONFIDENCE),
                branch_id,
            ))
        })
        .collect();

    Ok(hypotheses)
}

/// Parse a model reply holding one refined hypothesis object.
///
/// Missing text or confidence fall back to the original's values.
pub fn parse_refinement(reply: &str, original: &ResearchHypothesis) -> Result<ResearchHypothesis, EngineError> {
    let object = outermost_span(reply, '{', '}')
        .ok_or_else(|| EngineError::HypothesisParse("no JSON object in reply".to_string()))?;
    let item: Value = serde_json::from_str(object).map_err(|e| EngineError::HypothesisParse(e.to_string()))?;

    let text = item
        .get("text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(original.text.as_str());

    Ok(ResearchHypothesis::new(
        Uuid::new_v4().to_string(),
        text,
        original.supporting_paper_ids.clone(),
        confidence_of(&item, original.confidence),
        original.generated_from_branch.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{self, LLMError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedProvider {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn complete(&self, messages: &[Message], _temperature: Option<f32>) -> llm::Result<String> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            self.reply.clone().ok_or(LLMError::RateLimitExceeded)
        }
    }

    fn summaries() -> Vec<ValidatedSummary> {
        vec![
            ValidatedSummary::new("p1", "Attention Is All You Need", "Transformers use attention.", 0.95),
            ValidatedSummary::new("p2", "BERT: Pre-training", "BERT pretrains encoders.", 0.9),
        ]
    }

    const TITLES: [(&str, &str); 2] = [("Attention Is All You Need", "p1"), ("BERT: Pre-training", "p2")];

    #[test]
    fn test_parse_maps_titles_to_ids() {
        let reply = r#"Here you go:
[
  {"text": "Could attention sparsity improve BERT pretraining?", "supporting_papers": ["Attention Is All You Need", "bert"], "confidence": 0.8},
  {"text": "", "confidence": 0.9},
  "not an object",
  {"text": "Unknown source claim", "supporting_papers": ["Unrelated Paper"], "confidence": 7}
]
Thanks."#;

        let hypotheses = parse_hypotheses(reply, &TITLES, "b1").unwrap();

        assert_eq!(hypotheses.len(), 2);
        assert_eq!(hypotheses[0].supporting_paper_ids, vec!["p1", "p2"]);
        assert_eq!(hypotheses[0].confidence, 0.8);
        assert_eq!(hypotheses[0].generated_from_branch, "b1");
        assert!(hypotheses[1].supporting_paper_ids.is_empty());
        assert_eq!(hypotheses[1].confidence, 1.0);
    }

    #[test]
    fn test_parse_defaults_confidence() {
        let hypotheses = parse_hypotheses(r#"[{"text": "How does depth matter?"}]"#, &TITLES, "b1").unwrap();
        assert_eq!(hypotheses[0].confidence, 0.5);
    }

    #[test]
    fn test_parse_rejects_unstructured_reply() {
        let err = parse_hypotheses("I cannot help with that.", &TITLES, "b1").unwrap_err();
        assert!(matches!(err, EngineError::HypothesisParse(_)));

        let err = parse_hypotheses("[not json]", &TITLES, "b1").unwrap_err();
        assert!(matches!(err, EngineError::HypothesisParse(_)));
    }

    #[tokio::test]
    async fn test_generate_recovers_from_bad_output() {
        let generator = HypothesisGenerator::new(Arc::new(CannedProvider::replying("no idea")), 3, 0.7);
        assert!(generator.generate(&summaries(), "b1", None).await.is_empty());

        let generator = HypothesisGenerator::new(Arc::new(CannedProvider::failing()), 3, 0.7);
        assert!(generator.generate(&summaries(), "b1", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_generate_prompt_lists_summaries() {
        let provider = Arc::new(CannedProvider::replying(
            r#"[{"text": "Whether attention helps pretraining", "supporting_papers": ["BERT: Pre-training"]}]"#,
        ));
        let generator = HypothesisGenerator::new(provider.clone(), 2, 0.7);

        let hypotheses = generator
            .generate(&summaries(), "b1", Some("efficient NLP"))
            .await;

        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].supporting_paper_ids, vec!["p2"]);

        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("generate 2 novel research hypotheses"));
        assert!(prompt.contains("Paper 1: Attention Is All You Need"));
        assert!(prompt.contains("Groundedness: 95.00%"));
        assert!(prompt.contains("Research Context: efficient NLP"));
    }

    #[tokio::test]
    async fn test_generate_from_batch_calls_per_chunk() {
        let provider = Arc::new(CannedProvider::replying(r#"[{"text": "What links these?"}]"#));
        let generator = HypothesisGenerator::new(provider.clone(), 3, 0.7);

        let hypotheses = generator.generate_from_batch(&summaries(), "b1", 1, None).await;

        assert_eq!(hypotheses.len(), 2);
        assert_eq!(provider.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generate_without_summaries_skips_provider() {
        let provider = Arc::new(CannedProvider::replying("[]"));
        let generator = HypothesisGenerator::new(provider.clone(), 3, 0.7);

        assert!(generator.generate(&[], "b1", None).await.is_empty());
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    fn original() -> ResearchHypothesis {
        ResearchHypothesis::new(
            "h1",
            "Attention always beats recurrence.",
            vec!["p1".to_string(), "p2".to_string()],
            0.7,
            "b1",
        )
    }

    #[tokio::test]
    async fn test_refine_rewrites_with_feedback() {
        let provider = Arc::new(CannedProvider::replying(
            r#"Refined:
{"text": "Could attention outperform recurrence on long sequences?", "confidence": 0.6, "rationale": "narrower claim"}"#,
        ));
        let generator = HypothesisGenerator::new(provider.clone(), 3, 0.7);

        let refined = generator
            .refine(&original(), "Low groundedness (40.00%)", &summaries())
            .await;

        assert_ne!(refined.id, "h1");
        assert_eq!(refined.text, "Could attention outperform recurrence on long sequences?");
        assert_eq!(refined.confidence, 0.6);
        assert_eq!(refined.supporting_paper_ids, vec!["p1", "p2"]);
        assert_eq!(refined.generated_from_branch, "b1");

        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Original Hypothesis: Attention always beats recurrence."));
        assert!(prompt.contains("Feedback: Low groundedness (40.00%)"));
        assert!(prompt.contains("- Attention Is All You Need: Transformers use attention."));
    }

    #[tokio::test]
    async fn test_refine_keeps_original_on_failure() {
        let hypothesis = original();

        let generator = HypothesisGenerator::new(Arc::new(CannedProvider::replying("no idea")), 3, 0.7);
        assert_eq!(generator.refine(&hypothesis, "too broad", &summaries()).await, hypothesis);

        let generator = HypothesisGenerator::new(Arc::new(CannedProvider::failing()), 3, 0.7);
        assert_eq!(generator.refine(&hypothesis, "too broad", &summaries()).await, hypothesis);
    }

    #[test]
    fn test_parse_refinement_falls_back_per_field() {
        let refined = parse_refinement(r#"{"rationale": "only a rationale"}"#, &original()).unwrap();
        assert_eq!(refined.text, "Attention always beats recurrence.");
        assert_eq!(refined.confidence, 0.7);

        let refined = parse_refinement(r#"{"text": "Whether depth matters", "confidence": "0.4"}"#, &original()).unwrap();
        assert_eq!(refined.text, "Whether depth matters");
        assert_eq!(refined.confidence, 0.4);
    }
}
