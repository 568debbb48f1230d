//! Research session
//!
//! Drives a [`LoopState`] round by round. Each round runs one iteration on
//! up to `max_concurrent_branches` live branches, then applies the budget
//! and readiness triggers of the [`BranchManager`] and persists every branch
//! it touched.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use sdk::errors::EngineError;
use sdk::types::{Paper, ResearchHypothesis, ValidatedSummary};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::branch_manager::BranchManager;
use super::models::{BranchStatus, InnerLoopMode, IterationResult, LoopState, LoopStatus};
use crate::config::{BranchConfig, HypothesisConfig};
use crate::db::LoopRepository;
use crate::grounding::{Overseer, Validator};
use crate::hypothesis::validator::supporting_summaries;
use crate::hypothesis::{HypothesisGenerator, HypothesisValidator};
use crate::llm::LLMProvider;
use crate::papers::PaperSource;
use crate::summarize::{paper_content, paper_prompt, Summarizer};

/// Snapshot of what one iteration needs from its branch
struct IterationJob {
    branch_id: String,
    query: String,
    iteration_number: u32,
    known_papers: HashSet<String>,
}

pub struct ResearchSession {
    manager: BranchManager,
    papers: Arc<dyn PaperSource>,
    summarizer: Arc<dyn Summarizer>,
    overseer: Overseer,
    generator: Option<HypothesisGenerator>,
    hypothesis_validator: HypothesisValidator,
    repository: Option<LoopRepository>,
    state: LoopState,
}

impl ResearchSession {
    /// Start a new loop with a single root branch for `query`.
    ///
    /// Without an `llm` provider branches still switch to hypothesis mode
    /// but generate nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        query: &str,
        branch_config: BranchConfig,
        hypothesis_config: &HypothesisConfig,
        max_retries: u32,
        papers: Arc<dyn PaperSource>,
        summarizer: Arc<dyn Summarizer>,
        validator: Arc<dyn Validator>,
        llm: Option<Arc<dyn LLMProvider>>,
    ) -> Result<Self> {
        let manager = BranchManager::new(branch_config);
        let mut state = LoopState::new(Uuid::new_v4().to_string(), 1);
        manager.create_branch(&mut state, query)?;

        let generator = llm.map(|provider| {
            HypothesisGenerator::new(
                provider,
                hypothesis_config.hypotheses_per_batch,
                hypothesis_config.temperature,
            )
        });

        Ok(Self {
            manager,
            papers,
            summarizer,
            overseer: Overseer::new(validator.clone(), max_retries),
            generator,
            hypothesis_validator: HypothesisValidator::new(validator, hypothesis_config.groundedness_threshold),
            repository: None,
            state,
        })
    }

    /// Persist every touched branch through `repository`
    pub fn with_repository(mut self, repository: LoopRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_manager(mut self, manager: BranchManager) -> Self {
        self.manager = manager;
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn loop_id(&self) -> &str {
        &self.state.loop_id
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus::from_loop_state(&self.state)
    }

    /// Up to `n` hypotheses across all branches, most confident first
    pub fn get_hypotheses(&self, n: usize, min_confidence: f64) -> Vec<&ResearchHypothesis> {
        let mut all: Vec<&ResearchHypothesis> = self
            .state
            .branches
            .values()
            .flat_map(|b| b.hypotheses.iter())
            .filter(|h| h.confidence >= min_confidence)
            .collect();
        all.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        all.truncate(n);
        all
    }

    /// Run up to `max_rounds` rounds.
    ///
    /// Stops early when no branch is runnable or, if `stop_on_hypotheses` is
    /// non-zero, once that many hypotheses exist.
    pub async fn run(&mut self, max_rounds: u32, stop_on_hypotheses: usize) -> Result<LoopStatus> {
        if let Some(repository) = &self.repository {
            repository.save_state(&self.state).await?;
        }

        for round in 1..=max_rounds {
            let touched = self.run_round().await?;
            if touched.is_empty() {
                info!(loop_id = %self.state.loop_id, round, "No runnable branches left");
                break;
            }

            self.persist(&touched).await?;

            let status = self.status();
            info!(
                loop_id = %self.state.loop_id,
                round,
                active = status.active_branches,
                papers = status.total_papers,
                summaries = status.total_summaries,
                hypotheses = status.total_hypotheses,
                "Round complete"
            );

            if stop_on_hypotheses > 0 && status.total_hypotheses >= stop_on_hypotheses {
                info!(hypotheses = status.total_hypotheses, "Hypothesis target reached");
                break;
            }
        }

        Ok(self.status())
    }

    /// One round; returns the ids of every branch it changed
    async fn run_round(&mut self) -> Result<BTreeSet<String>> {
        let limit = self.manager.config().max_concurrent_branches.max(1);
        let jobs: Vec<IterationJob> = self
            .state
            .active_branches()
            .into_iter()
            .filter(|b| b.mode == InnerLoopMode::SearchSummarize)
            .take(limit)
            .map(|b| IterationJob {
                branch_id: b.id.clone(),
                query: b.query.clone(),
                iteration_number: b.iteration_count + 1,
                known_papers: b.accumulated_papers.iter().map(|p| p.paper_id.clone()).collect(),
            })
            .collect();

        let mut touched = BTreeSet::new();
        if jobs.is_empty() {
            return Ok(touched);
        }

        for job in &jobs {
            self.manager
                .update_status(&mut self.state, &job.branch_id, BranchStatus::Running)?;
        }

        let this = &*self;
        let results: Vec<(String, u32, Result<IterationResult, EngineError>)> = stream::iter(jobs)
            .map(|job| async move {
                let outcome = this.run_iteration(&job).await;
                (job.branch_id, job.iteration_number, outcome)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (branch_id, iteration_number, outcome) in results {
            let result = outcome.unwrap_or_else(|e| {
                warn!(branch_id = %branch_id, iteration_number, "Iteration failed: {}", e);
                IterationResult::failed(iteration_number, e.to_string())
            });
            if let Some(branch) = self.state.branch_mut(&branch_id) {
                branch.add_iteration(result);
            }
            touched.insert(branch_id);
        }

        self.apply_splits(&mut touched)?;
        self.run_hypothesis_mode(&mut touched).await?;
        self.complete_exhausted(&mut touched)?;

        Ok(touched)
    }

    /// Search, drop already-known papers, summarize the rest through the overseer
    async fn run_iteration(&self, job: &IterationJob) -> Result<IterationResult, EngineError> {
        let found = self
            .papers
            .search(&job.query, self.manager.config().papers_per_iteration)
            .await?;

        let mut seen = job.known_papers.clone();
        let new_papers: Vec<Paper> = found
            .into_iter()
            .filter(|p| seen.insert(p.paper_id.clone()))
            .collect();

        let mut summaries = Vec::new();
        for paper in &new_papers {
            let data = Value::String(paper_prompt(paper));
            let context = Value::String(paper_content(paper));

            let (summary, result) = self
                .overseer
                .summarise_with_validation(self.summarizer.as_ref(), &data, &context, None, None)
                .await?;

            if result.blocked {
                debug!(paper_id = %paper.paper_id, grounded_pct = result.grounded_pct, "Dropping blocked summary");
                continue;
            }
            summaries.push(ValidatedSummary::new(
                paper.paper_id.clone(),
                paper.display_title(),
                summary,
                result.grounded_pct,
            ));
        }

        let context_tokens_used = self.manager.estimator().estimate_papers_tokens(&new_papers);
        debug!(
            branch_id = %job.branch_id,
            papers = new_papers.len(),
            summaries = summaries.len(),
            context_tokens_used,
            "Iteration finished"
        );

        Ok(IterationResult {
            iteration_number: job.iteration_number,
            papers_found: new_papers,
            summaries,
            hypotheses: Vec::new(),
            context_tokens_used,
            error: None,
        })
    }

    fn apply_splits(&mut self, touched: &mut BTreeSet<String>) -> Result<()> {
        let over_budget: Vec<String> = self
            .state
            .active_branches()
            .into_iter()
            .filter(|b| self.manager.should_split(b))
            .map(|b| b.id.clone())
            .collect();

        for branch_id in over_budget {
            if !self.manager.can_create_more_branches(&self.state) {
                warn!(branch_id = %branch_id, "Branch over budget but fan-out limit reached");
                break;
            }
            let Some(branch) = self.state.branch(&branch_id) else {
                continue;
            };

            let strategy = self.manager.splitter().suggest_strategy(branch);
            let split = self.manager.splitter().split(branch, strategy, None);
            let children = self
                .manager
                .create_child_branches(&mut self.state, &branch_id, &split)?;

            touched.insert(branch_id);
            touched.extend(children);
        }
        Ok(())
    }

    async fn run_hypothesis_mode(&mut self, touched: &mut BTreeSet<String>) -> Result<()> {
        let ready: Vec<String> = self
            .state
            .active_branches()
            .into_iter()
            .filter(|b| b.mode == InnerLoopMode::SearchSummarize && self.manager.should_enable_hypothesis_mode(b))
            .map(|b| b.id.clone())
            .collect();

        for branch_id in ready {
            self.manager.enable_hypothesis_mode(&mut self.state, &branch_id)?;

            let Some(branch) = self.state.branch(&branch_id) else {
                continue;
            };
            let summaries = branch.accumulated_summaries.clone();
            let query = branch.query.clone();

            let hypotheses = match &self.generator {
                Some(generator) => generator.generate(&summaries, &branch_id, Some(&query)).await,
                None => Vec::new(),
            };

            let mut accepted = Vec::new();
            for hypothesis in hypotheses {
                let supporting = supporting_summaries(&hypothesis, &summaries);
                if let Err(reason) = self.hypothesis_validator.quick_check(&hypothesis, &supporting) {
                    debug!(hypothesis_id = %hypothesis.id, reason, "Hypothesis failed quick check");
                    continue;
                }
                let verdict = self.hypothesis_validator.validate(&hypothesis, &supporting).await;
                if verdict.valid {
                    accepted.push(hypothesis);
                    continue;
                }

                // one refinement round, fed with the verdict
                let Some(generator) = &self.generator else {
                    continue;
                };
                let refined = generator.refine(&hypothesis, &verdict.explanation, &supporting).await;
                if refined.id == hypothesis.id {
                    continue;
                }
                if self.hypothesis_validator.validate(&refined, &supporting).await.valid {
                    debug!(hypothesis_id = %hypothesis.id, refined_id = %refined.id, "Accepted refined hypothesis");
                    accepted.push(refined);
                }
            }

            info!(branch_id = %branch_id, accepted = accepted.len(), "Hypothesis mode finished");
            if let Some(branch) = self.state.branch_mut(&branch_id) {
                branch.hypotheses.extend(accepted);
            }
            self.manager.complete_branch(&mut self.state, &branch_id)?;
            touched.insert(branch_id);
        }
        Ok(())
    }

    fn complete_exhausted(&mut self, touched: &mut BTreeSet<String>) -> Result<()> {
        let max_iterations = self.manager.config().max_iterations_per_branch;
        let exhausted: Vec<String> = self
            .state
            .active_branches()
            .into_iter()
            .filter(|b| b.iteration_count >= max_iterations)
            .map(|b| b.id.clone())
            .collect();

        for branch_id in exhausted {
            self.manager.complete_branch(&mut self.state, &branch_id)?;
            touched.insert(branch_id);
        }
        Ok(())
    }

    async fn persist(&self, touched: &BTreeSet<String>) -> Result<()> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        for branch_id in touched {
            if let Some(branch) = self.state.branch(branch_id) {
                repository.save_branch(&self.state.loop_id, branch).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::{GroundingValidator, ValidatorThresholds};
    use crate::nli::MockNliBackend;
    use crate::papers::StaticPaperSource;
    use crate::spans::StaticSpanDetector;
    use crate::summarize::MockSummarizer;
    use async_trait::async_trait;

    fn corpus(n: usize) -> Vec<Paper> {
        (0..n)
            .map(|i| {
                Paper::new(format!("p{}", i), format!("Paper {}", i))
                    .with_abstract("Transformers rely on attention.")
                    .with_year(2015 + i as i32)
            })
            .collect()
    }

    fn validator() -> Arc<dyn Validator> {
        Arc::new(GroundingValidator::new(
            Arc::new(StaticSpanDetector::empty()),
            Arc::new(MockNliBackend::new()),
            ValidatorThresholds::default(),
        ))
    }

    fn session(papers: Arc<dyn PaperSource>, config: BranchConfig) -> ResearchSession {
        ResearchSession::new(
            "attention",
            config,
            &HypothesisConfig::default(),
            2,
            papers,
            Arc::new(MockSummarizer::new()),
            validator(),
            None,
        )
        .unwrap()
    }

    struct FailingSource;

    #[async_trait]
    impl PaperSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Paper>, EngineError> {
            Err(EngineError::Transport("search unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_iteration_accumulates_evidence() {
        let mut session = session(Arc::new(StaticPaperSource::new(corpus(3))), BranchConfig::default());

        let status = session.run(1, 0).await.unwrap();

        assert_eq!(status.total_branches, 1);
        assert_eq!(status.total_papers, 3);
        assert_eq!(status.total_summaries, 3);
        let root = session.state().active_branches()[0];
        assert_eq!(root.status, BranchStatus::Running);
        assert_eq!(root.iteration_count, 1);
        assert!(root.context_window_used > 0);
    }

    #[tokio::test]
    async fn test_failed_iteration_is_recorded() {
        let mut session = session(Arc::new(FailingSource), BranchConfig::default());

        session.run(1, 0).await.unwrap();

        let root = session.state().active_branches()[0];
        assert_eq!(root.iteration_count, 1);
        assert!(root.last_error.as_deref().unwrap().contains("search unavailable"));
    }

    #[tokio::test]
    async fn test_branch_completes_after_max_iterations() {
        let config = BranchConfig {
            max_iterations_per_branch: 2,
            ..Default::default()
        };
        let mut session = session(Arc::new(StaticPaperSource::new(corpus(2))), config);

        let status = session.run(5, 0).await.unwrap();

        assert_eq!(status.completed, 1);
        assert_eq!(status.active_branches, 0);
        // the second iteration found nothing new
        assert_eq!(status.total_papers, 2);
    }

    #[tokio::test]
    async fn test_over_budget_branch_splits() {
        let config = BranchConfig {
            max_context_window: 20,
            ..Default::default()
        };
        let mut session = session(Arc::new(StaticPaperSource::new(corpus(4))), config);

        let status = session.run(1, 0).await.unwrap();

        assert_eq!(status.completed, 1);
        assert!(status.total_branches > 1);
        let children: Vec<_> = session
            .state()
            .branches
            .values()
            .filter(|b| b.parent_id.is_some())
            .collect();
        assert!(!children.is_empty());
        assert!(children.iter().all(|c| c.status == BranchStatus::Pending));
        let inherited: usize = children.iter().map(|c| c.total_papers()).sum();
        assert_eq!(inherited, 4);
    }

    #[tokio::test]
    async fn test_unsplittable_branch_completes_instead_of_resplitting() {
        let paper = Paper::new("p0", "Only paper").with_abstract("a".repeat(400));
        let config = BranchConfig {
            max_context_window: 50,
            ..Default::default()
        };
        let mut session = session(Arc::new(StaticPaperSource::new(vec![paper])), config);

        let status = session.run(6, 0).await.unwrap();

        assert_eq!(status.total_branches, 1);
        assert_eq!(status.completed, 1);
        assert_eq!(status.active_branches, 0);
        assert_eq!(status.total_papers, 1);
        let root = session.state().branches.values().next().unwrap();
        assert_eq!(root.query, "attention");
        assert!(root.parent_id.is_none());
    }

    #[tokio::test]
    async fn test_ready_branch_enters_hypothesis_mode() {
        let config = BranchConfig {
            min_papers_for_hypothesis: 3,
            ..Default::default()
        };
        let mut session = session(Arc::new(StaticPaperSource::new(corpus(3))), config);

        let status = session.run(3, 0).await.unwrap();

        assert_eq!(status.completed, 1);
        let root = session.state().branches.values().next().unwrap();
        assert_eq!(root.mode, InnerLoopMode::Hypothesis);
        assert!(session.get_hypotheses(5, 0.0).is_empty());
    }
}
