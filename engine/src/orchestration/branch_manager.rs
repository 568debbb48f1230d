//! Branch lifecycle and budget triggers
//!
//! The manager never stores branches itself. Every operation takes the
//! [`LoopState`] that owns them, so a loop can be saved and restored as a
//! unit without the manager holding stale copies.

use sdk::errors::EngineError;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{Branch, BranchStatus, InnerLoopMode, LoopState};
use crate::config::BranchConfig;
use crate::context::{BranchSplitter, ContextEstimator, SplitResult};

pub struct BranchManager {
    config: BranchConfig,
    splitter: BranchSplitter,
    estimator: ContextEstimator,
}

impl BranchManager {
    pub fn new(config: BranchConfig) -> Self {
        Self::with_estimator(config, ContextEstimator::default())
    }

    pub fn with_estimator(config: BranchConfig, estimator: ContextEstimator) -> Self {
        let splitter = BranchSplitter::new(config.default_num_splits);
        Self {
            config,
            splitter,
            estimator,
        }
    }

    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    pub fn splitter(&self) -> &BranchSplitter {
        &self.splitter
    }

    pub fn estimator(&self) -> &ContextEstimator {
        &self.estimator
    }

    /// True once the branch has filled `split_threshold` of its window
    pub fn should_split(&self, branch: &Branch) -> bool {
        branch.context_utilization(self.config.max_context_window) >= self.config.split_threshold
    }

    pub fn should_enable_hypothesis_mode(&self, branch: &Branch) -> bool {
        branch.total_papers() >= self.config.min_papers_for_hypothesis
    }

    pub fn can_create_more_branches(&self, state: &LoopState) -> bool {
        state.active_branches().len() < self.config.max_branches
    }

    /// Earliest-created non-terminal branch
    pub fn get_next_branch<'a>(&self, state: &'a LoopState) -> Option<&'a Branch> {
        state.active_branches().into_iter().next()
    }

    /// Create a root branch for `query` and return its id
    pub fn create_branch(&self, state: &mut LoopState, query: &str) -> Result<String, EngineError> {
        let branch = Branch::new(Uuid::new_v4().to_string(), query);
        let id = state.add_branch(branch)?;
        info!(branch_id = %id, query, "Created branch");
        Ok(id)
    }

    /// Move a branch to `status`.
    ///
    /// Setting a live branch to its current status is a no-op.
    pub fn update_status(
        &self,
        state: &mut LoopState,
        branch_id: &str,
        status: BranchStatus,
    ) -> Result<(), EngineError> {
        let branch = state
            .branch_mut(branch_id)
            .ok_or_else(|| EngineError::BranchNotFound(branch_id.to_string()))?;

        if branch.status == status && !status.is_terminal() {
            return Ok(());
        }
        if !branch.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                branch_id: branch_id.to_string(),
                from: branch.status.to_string(),
                to: status.to_string(),
            });
        }

        debug!(branch_id, from = %branch.status, to = %status, "Branch status change");
        branch.status = status;
        Ok(())
    }

    /// Prune a live branch. The branch stays in the loop for auditing.
    pub fn prune_branch(
        &self,
        state: &mut LoopState,
        branch_id: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.update_status(state, branch_id, BranchStatus::Pruned)?;
        if let Some(branch) = state.branch_mut(branch_id) {
            branch.prune_reason = Some(reason.to_string());
        }
        info!(branch_id, reason, "Pruned branch");
        Ok(())
    }

    /// Complete a branch, passing through RUNNING if it never started
    pub fn complete_branch(&self, state: &mut LoopState, branch_id: &str) -> Result<(), EngineError> {
        let current = state
            .branch(branch_id)
            .map(|b| b.status)
            .ok_or_else(|| EngineError::BranchNotFound(branch_id.to_string()))?;

        if current == BranchStatus::Pending {
            self.update_status(state, branch_id, BranchStatus::Running)?;
        }
        self.update_status(state, branch_id, BranchStatus::Completed)
    }

    pub fn enable_hypothesis_mode(&self, state: &mut LoopState, branch_id: &str) -> Result<(), EngineError> {
        let branch = state
            .branch_mut(branch_id)
            .ok_or_else(|| EngineError::BranchNotFound(branch_id.to_string()))?;
        branch.mode = InnerLoopMode::Hypothesis;
        info!(branch_id, papers = branch.total_papers(), "Branch switched to hypothesis mode");
        Ok(())
    }

    /// Apply a split to `parent_id`.
    ///
    /// Each non-empty group becomes a PENDING child holding the group's
    /// papers and the summaries for those papers. A child's context budget
    /// starts at the token cost of its papers. The parent is completed.
    /// Returns the child ids in group order.
    ///
    /// A split with fewer than two non-empty groups would hand the whole
    /// budget to a single child, so the parent is completed with no children.
    pub fn create_child_branches(
        &self,
        state: &mut LoopState,
        parent_id: &str,
        split: &SplitResult,
    ) -> Result<Vec<String>, EngineError> {
        let parent = state
            .branch(parent_id)
            .ok_or_else(|| EngineError::BranchNotFound(parent_id.to_string()))?;

        if parent.is_terminal() {
            return Err(EngineError::InvalidTransition {
                branch_id: parent_id.to_string(),
                from: parent.status.to_string(),
                to: BranchStatus::Completed.to_string(),
            });
        }

        let groups: Vec<_> = split.groups.iter().filter(|g| !g.paper_ids.is_empty()).collect();
        if groups.len() < 2 {
            info!(
                parent_id,
                strategy = %split.strategy,
                groups = groups.len(),
                "Branch cannot be divided further, completing without children"
            );
            self.complete_branch(state, parent_id)?;
            return Ok(Vec::new());
        }

        let children: Vec<Branch> = groups
            .into_iter()
            .map(|group| {
                let mut child = Branch::new(Uuid::new_v4().to_string(), group.query.clone());
                child.parent_id = Some(parent_id.to_string());

                for paper_id in &group.paper_ids {
                    if let Some(paper) = parent.paper(paper_id) {
                        child.insert_paper(paper.clone());
                    }
                    if let Some(summary) = parent.summary_for(paper_id) {
                        child.insert_summary(summary.clone());
                    }
                }

                child.context_window_used = self.estimator.estimate_papers_tokens(&child.accumulated_papers);
                child
            })
            .collect();

        self.complete_branch(state, parent_id)?;

        let ids = children
            .into_iter()
            .map(|child| state.add_branch(child))
            .collect::<Result<Vec<String>, EngineError>>()?;
        info!(
            parent_id,
            strategy = %split.strategy,
            children = ids.len(),
            "Split branch"
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SplitStrategy;
    use sdk::types::{Paper, ValidatedSummary};

    fn manager() -> BranchManager {
        BranchManager::new(BranchConfig::default())
    }

    fn state_with(branch: Branch) -> (LoopState, String) {
        let mut state = LoopState::new("loop-1", 1);
        let id = state.add_branch(branch).unwrap();
        (state, id)
    }

    #[test]
    fn test_should_split() {
        let manager = manager();
        let mut branch = Branch::new("b1", "q");
        assert!(!manager.should_split(&branch));

        branch.context_window_used = 110_000;
        assert!(manager.should_split(&branch));

        branch.context_window_used = 102_400;
        assert!(manager.should_split(&branch));

        branch.context_window_used = 102_399;
        assert!(!manager.should_split(&branch));
    }

    #[test]
    fn test_hypothesis_gate() {
        let manager = manager();
        let mut branch = Branch::new("b1", "q");
        for i in 0..9 {
            branch.insert_paper(Paper::new(format!("p{}", i), "t"));
        }
        assert!(!manager.should_enable_hypothesis_mode(&branch));

        for i in 9..12 {
            branch.insert_paper(Paper::new(format!("p{}", i), "t"));
        }
        assert!(manager.should_enable_hypothesis_mode(&branch));
    }

    #[test]
    fn test_can_create_more_branches_counts_live_only() {
        let manager = BranchManager::new(BranchConfig {
            max_branches: 2,
            ..Default::default()
        });
        let mut state = LoopState::new("loop-1", 1);
        let a = manager.create_branch(&mut state, "a").unwrap();
        manager.create_branch(&mut state, "b").unwrap();
        assert!(!manager.can_create_more_branches(&state));

        manager.prune_branch(&mut state, &a, "off topic").unwrap();
        assert!(manager.can_create_more_branches(&state));
        assert_eq!(state.branches.len(), 2);
    }

    #[test]
    fn test_get_next_branch_is_earliest_live() {
        let manager = manager();
        let mut state = LoopState::new("loop-1", 1);
        let first = manager.create_branch(&mut state, "first").unwrap();
        let second = manager.create_branch(&mut state, "second").unwrap();

        assert_eq!(manager.get_next_branch(&state).map(|b| b.id.clone()), Some(first.clone()));
        manager.complete_branch(&mut state, &first).unwrap();
        assert_eq!(manager.get_next_branch(&state).map(|b| b.id.clone()), Some(second));
    }

    #[test]
    fn test_pruned_branch_cannot_restart() {
        let manager = manager();
        let (mut state, id) = state_with(Branch::new("b1", "q"));
        manager.prune_branch(&mut state, &id, "duplicate").unwrap();

        let err = manager
            .update_status(&mut state, &id, BranchStatus::Running)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(state.branch(&id).unwrap().prune_reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn test_update_status_unknown_branch() {
        let manager = manager();
        let mut state = LoopState::new("loop-1", 1);
        let err = manager
            .update_status(&mut state, "missing", BranchStatus::Running)
            .unwrap_err();
        assert!(matches!(err, EngineError::BranchNotFound(_)));
    }

    #[test]
    fn test_create_child_branches() {
        let manager = manager();
        let mut parent = Branch::new("parent", "attention");
        parent.insert_paper(Paper::new("p1", "a").with_fields(["CS"]).with_abstract("x".repeat(40)));
        parent.insert_paper(Paper::new("p2", "b").with_fields(["NLP"]));
        parent.insert_summary(ValidatedSummary::new("p1", "a", "summary one", 0.9));
        parent.context_window_used = 120_000;
        let (mut state, parent_id) = state_with(parent);

        let split = manager.splitter().split(
            state.branch(&parent_id).unwrap(),
            SplitStrategy::ByField,
            Some(2),
        );
        let children = manager
            .create_child_branches(&mut state, &parent_id, &split)
            .unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(state.branch(&parent_id).unwrap().status, BranchStatus::Completed);

        let cs = state.branch(&children[0]).unwrap();
        assert_eq!(cs.status, BranchStatus::Pending);
        assert_eq!(cs.parent_id.as_deref(), Some("parent"));
        assert_eq!(cs.query, "\"attention\" in CS");
        assert_eq!(cs.total_papers(), 1);
        assert_eq!(cs.total_summaries(), 1);
        // "a\n\n" + 40 chars
        assert_eq!(cs.context_window_used, 10);

        let nlp = state.branch(&children[1]).unwrap();
        assert_eq!(nlp.total_summaries(), 0);
        assert!(nlp.sequence > cs.sequence);
    }

    #[test]
    fn test_cannot_split_terminal_branch() {
        let manager = manager();
        let (mut state, id) = state_with(Branch::new("b1", "q"));
        manager.complete_branch(&mut state, &id).unwrap();

        let split = manager
            .splitter()
            .split(state.branch(&id).unwrap(), SplitStrategy::Random, None);
        assert!(manager.create_child_branches(&mut state, &id, &split).is_err());
    }

    #[test]
    fn test_single_group_split_completes_parent() {
        let manager = manager();
        let mut parent = Branch::new("parent", "attention");
        parent.insert_paper(Paper::new("p1", "a").with_fields(["CS"]));
        parent.context_window_used = 120_000;
        let (mut state, parent_id) = state_with(parent);

        let split = manager.splitter().split(
            state.branch(&parent_id).unwrap(),
            SplitStrategy::ByField,
            Some(2),
        );
        assert_eq!(split.groups.len(), 1);

        let children = manager
            .create_child_branches(&mut state, &parent_id, &split)
            .unwrap();

        assert!(children.is_empty());
        assert_eq!(state.branches.len(), 1);
        assert_eq!(state.branch(&parent_id).unwrap().status, BranchStatus::Completed);
        assert!(manager.get_next_branch(&state).is_none());
    }
}
