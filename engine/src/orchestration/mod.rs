//! Branch orchestration
//!
//! A research query becomes a tree of branches. Each branch accumulates
//! papers and validated summaries until its context budget fills, then it is
//! split into narrower children; once it holds enough evidence it switches
//! to hypothesis generation.

pub mod branch_manager;
pub mod models;
pub mod session;

pub use branch_manager::BranchManager;
pub use models::{Branch, BranchStatus, InnerLoopMode, IterationResult, LoopState, LoopStatus};
pub use session::ResearchSession;
