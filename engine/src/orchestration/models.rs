//! Research loop records
//!
//! A [`LoopState`] owns every [`Branch`] ever created in one research loop.
//! Branches are never removed from it: pruning and completion are status
//! changes, so the loop keeps a full audit trail.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{Paper, ResearchHypothesis, ValidatedSummary};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use crate::context::context_utilization;

/// Lifecycle of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Pending,
    Running,
    Pruned,
    Completed,
}

impl BranchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BranchStatus::Pruned | BranchStatus::Completed)
    }

    /// Pending -> Running -> Completed, and either live state -> Pruned
    pub fn can_transition_to(self, next: BranchStatus) -> bool {
        use BranchStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Pruned) | (Running, Completed) | (Running, Pruned)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BranchStatus::Pending => "pending",
            BranchStatus::Running => "running",
            BranchStatus::Pruned => "pruned",
            BranchStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a branch does on each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InnerLoopMode {
    /// Search for papers and summarize them
    SearchSummarize,
    /// Generate hypotheses from accumulated summaries
    Hypothesis,
}

/// Outcome of one branch iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration_number: u32,
    pub papers_found: Vec<Paper>,
    pub summaries: Vec<ValidatedSummary>,
    pub hypotheses: Vec<ResearchHypothesis>,
    /// Tokens the new evidence adds to the branch context
    pub context_tokens_used: u64,
    pub error: Option<String>,
}

impl IterationResult {
    pub fn failed(iteration_number: u32, error: impl Into<String>) -> Self {
        Self {
            iteration_number,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// An independently pursued sub-query
///
/// Papers and summaries keep insertion order and are unique by paper id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub mode: InnerLoopMode,
    pub status: BranchStatus,
    #[serde(default)]
    pub accumulated_papers: Vec<Paper>,
    #[serde(default)]
    pub accumulated_summaries: Vec<ValidatedSummary>,
    #[serde(default)]
    pub hypotheses: Vec<ResearchHypothesis>,
    pub context_window_used: u64,
    pub iteration_count: u32,
    /// Creation order within the loop
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub prune_reason: Option<String>,
}

impl Branch {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            parent_id: None,
            mode: InnerLoopMode::SearchSummarize,
            status: BranchStatus::Pending,
            accumulated_papers: Vec::new(),
            accumulated_summaries: Vec::new(),
            hypotheses: Vec::new(),
            context_window_used: 0,
            iteration_count: 0,
            sequence: 0,
            created_at: Utc::now(),
            last_error: None,
            prune_reason: None,
        }
    }

    pub fn total_papers(&self) -> usize {
        self.accumulated_papers.len()
    }

    pub fn total_summaries(&self) -> usize {
        self.accumulated_summaries.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn context_utilization(&self, max_context_window: u64) -> f64 {
        context_utilization(self.context_window_used, max_context_window)
    }

    pub fn has_paper(&self, paper_id: &str) -> bool {
        self.accumulated_papers.iter().any(|p| p.paper_id == paper_id)
    }

    pub fn paper(&self, paper_id: &str) -> Option<&Paper> {
        self.accumulated_papers.iter().find(|p| p.paper_id == paper_id)
    }

    pub fn summary_for(&self, paper_id: &str) -> Option<&ValidatedSummary> {
        self.accumulated_summaries
            .iter()
            .find(|s| s.paper_id == paper_id)
    }

    /// Insert a paper unless one with the same id is already present
    pub fn insert_paper(&mut self, paper: Paper) -> bool {
        if self.has_paper(&paper.paper_id) {
            return false;
        }
        self.accumulated_papers.push(paper);
        true
    }

    /// Insert a summary unless the paper already has one
    pub fn insert_summary(&mut self, summary: ValidatedSummary) -> bool {
        if self.summary_for(&summary.paper_id).is_some() {
            return false;
        }
        self.accumulated_summaries.push(summary);
        true
    }

    /// Fold an iteration into the branch.
    ///
    /// Existing papers, summaries and hypotheses are never overwritten. The
    /// context budget only grows here.
    pub fn add_iteration(&mut self, result: IterationResult) {
        self.iteration_count += 1;

        for paper in result.papers_found {
            self.insert_paper(paper);
        }
        for summary in result.summaries {
            self.insert_summary(summary);
        }
        for hypothesis in result.hypotheses {
            if !self.hypotheses.iter().any(|h| h.id == hypothesis.id) {
                self.hypotheses.push(hypothesis);
            }
        }

        self.context_window_used = self
            .context_window_used
            .saturating_add(result.context_tokens_used);
        self.last_error = result.error;
    }

    /// Clear the context budget, keeping accumulated evidence
    pub fn reset_context(&mut self) {
        self.context_window_used = 0;
    }
}

/// Root aggregate of one research loop, persisted as a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub loop_id: String,
    pub loop_number: u32,
    pub branches: BTreeMap<String, Branch>,
    /// Next creation sequence number
    #[serde(default)]
    pub next_sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl LoopState {
    pub fn new(loop_id: impl Into<String>, loop_number: u32) -> Self {
        Self {
            loop_id: loop_id.into(),
            loop_number,
            branches: BTreeMap::new(),
            next_sequence: 0,
            created_at: Utc::now(),
        }
    }

    /// Add a branch, stamping its creation order.
    ///
    /// Branches leave a loop only through a status change, so an id that is
    /// already present is rejected and the existing branch is kept.
    pub fn add_branch(&mut self, mut branch: Branch) -> Result<String, EngineError> {
        let id = branch.id.clone();
        match self.branches.entry(id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateBranch(id)),
            Entry::Vacant(slot) => {
                branch.sequence = self.next_sequence;
                self.next_sequence += 1;
                slot.insert(branch);
                Ok(id)
            }
        }
    }

    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.get(id)
    }

    pub fn branch_mut(&mut self, id: &str) -> Option<&mut Branch> {
        self.branches.get_mut(id)
    }

    /// Non-terminal branches in creation order
    pub fn active_branches(&self) -> Vec<&Branch> {
        let mut active: Vec<&Branch> = self.branches.values().filter(|b| !b.is_terminal()).collect();
        active.sort_by_key(|b| b.sequence);
        active
    }
}

/// Aggregate counters for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub loop_id: String,
    pub loop_number: u32,
    pub total_branches: usize,
    pub active_branches: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub pruned: usize,
    pub total_papers: usize,
    pub total_summaries: usize,
    pub total_hypotheses: usize,
    pub total_context_used: u64,
}

impl LoopStatus {
    pub fn from_loop_state(state: &LoopState) -> Self {
        let count = |status: BranchStatus| state.branches.values().filter(|b| b.status == status).count();
        let branches = state.branches.values();

        Self {
            loop_id: state.loop_id.clone(),
            loop_number: state.loop_number,
            total_branches: state.branches.len(),
            active_branches: state.active_branches().len(),
            pending: count(BranchStatus::Pending),
            running: count(BranchStatus::Running),
            completed: count(BranchStatus::Completed),
            pruned: count(BranchStatus::Pruned),
            total_papers: branches.clone().map(Branch::total_papers).sum(),
            total_summaries: branches.clone().map(Branch::total_summaries).sum(),
            total_hypotheses: branches.clone().map(|b| b.hypotheses.len()).sum(),
            total_context_used: branches.map(|b| b.context_window_used).sum(),
        }
    }
}
