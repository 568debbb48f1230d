//! Branch splitting strategies
//!
//! When a branch's context budget fills up, its papers are partitioned into
//! groups and each group seeds a narrower child branch. Every strategy is
//! deterministic except [`SplitStrategy::Random`].

use rand::seq::SliceRandom;
use rand::Rng;
use sdk::types::Paper;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::orchestration::models::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Group by primary field of study
    ByField,
    /// Group by publication year
    ByTime,
    /// Group by citation count, most cited first
    ByCitationCount,
    /// Shuffle and slice, for load balancing only
    Random,
}

impl fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SplitStrategy::ByField => "by_field",
            SplitStrategy::ByTime => "by_time",
            SplitStrategy::ByCitationCount => "by_citation_count",
            SplitStrategy::Random => "random",
        };
        f.write_str(name)
    }
}

/// One partition of a branch's papers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitGroup {
    pub label: String,
    /// Refined query for the child branch
    pub query: String,
    pub paper_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResult {
    pub strategy: SplitStrategy,
    pub groups: Vec<SplitGroup>,
}

impl SplitResult {
    pub fn labels(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.label.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldAnalysis {
    /// Papers per field, in first-seen order; a paper counts for every field it lists
    pub field_counts: Vec<(String, usize)>,
    pub num_fields: usize,
    pub viable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeAnalysis {
    pub num_years: usize,
    /// (oldest, newest); unknown years count as 0
    pub year_range: (i32, i32),
    pub viable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationAnalysis {
    pub median_citations: u64,
    pub high_impact: usize,
    pub low_impact: usize,
    pub viable: bool,
}

/// Per-strategy viability of a set of papers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitAnalysis {
    pub total_papers: usize,
    pub by_field: FieldAnalysis,
    pub by_time: TimeAnalysis,
    pub by_citation: CitationAnalysis,
}

/// Insertion-ordered grouping
fn group_in_order<'a, K, F>(papers: &[&'a Paper], key: F) -> Vec<(K, Vec<&'a Paper>)>
where
    K: PartialEq,
    F: Fn(&Paper) -> K,
{
    let mut groups: Vec<(K, Vec<&'a Paper>)> = Vec::new();
    for &paper in papers {
        let k = key(paper);
        match groups.iter_mut().find(|(existing, _)| *existing == k) {
            Some((_, members)) => members.push(paper),
            None => groups.push((k, vec![paper])),
        }
    }
    groups
}

fn ids(papers: &[&Paper]) -> Vec<String> {
    papers.iter().map(|p| p.paper_id.clone()).collect()
}

fn year_label(years: &[i32]) -> String {
    match years {
        [] => "Unknown".to_string(),
        [only] => only.to_string(),
        [first, .., last] => format!("{}-{}", first, last),
    }
}

/// Contiguous blocks of `len / num_splits` (at least 1); the last block takes the rest.
/// Returns `(position, start, end)` for the non-empty blocks.
fn contiguous_blocks(len: usize, num_splits: usize) -> Vec<(usize, usize, usize)> {
    let per = (len / num_splits).max(1);
    (0..num_splits)
        .filter_map(|i| {
            let start = (i * per).min(len);
            let end = if i == num_splits - 1 {
                len
            } else {
                (start + per).min(len)
            };
            (end > start).then_some((i, start, end))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct BranchSplitter {
    default_num_splits: usize,
}

impl Default for BranchSplitter {
    fn default() -> Self {
        Self::new(2)
    }
}

impl BranchSplitter {
    pub fn new(default_num_splits: usize) -> Self {
        Self {
            default_num_splits: default_num_splits.max(1),
        }
    }

    pub fn analyze_papers(&self, papers: &[&Paper]) -> SplitAnalysis {
        // Fields
        let mut field_counts: Vec<(String, usize)> = Vec::new();
        for paper in papers {
            let fields: Vec<&str> = if paper.fields_of_study.is_empty() {
                vec!["Unknown"]
            } else {
                paper.fields_of_study.iter().map(String::as_str).collect()
            };
            for field in fields {
                match field_counts.iter_mut().find(|(f, _)| f == field) {
                    Some((_, count)) => *count += 1,
                    None => field_counts.push((field.to_string(), 1)),
                }
            }
        }
        let num_fields = field_counts.len();

        // Years
        let mut years: BTreeMap<i32, usize> = BTreeMap::new();
        for paper in papers {
            *years.entry(paper.year_or_zero()).or_default() += 1;
        }
        let year_range = match (years.keys().next(), years.keys().next_back()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => (0, 0),
        };

        // Citations
        let mut counts: Vec<u64> = papers.iter().map(|p| p.citations_or_zero()).collect();
        counts.sort_unstable();
        let median = counts.get(counts.len() / 2).copied().unwrap_or(0);
        let high_impact = counts.iter().filter(|&&c| c > median).count();

        SplitAnalysis {
            total_papers: papers.len(),
            by_field: FieldAnalysis {
                field_counts,
                num_fields,
                viable: num_fields >= 2,
            },
            by_time: TimeAnalysis {
                num_years: years.len(),
                year_range,
                viable: years.len() >= 2,
            },
            by_citation: CitationAnalysis {
                median_citations: median,
                high_impact,
                low_impact: counts.len() - high_impact,
                viable: papers.len() >= 4,
            },
        }
    }

    /// Partition a branch's papers with the thread-local RNG for [`SplitStrategy::Random`]
    pub fn split(&self, branch: &Branch, strategy: SplitStrategy, num_splits: Option<usize>) -> SplitResult {
        self.split_with_rng(branch, strategy, num_splits, &mut rand::thread_rng())
    }

    /// Partition a branch's papers.
    ///
    /// `num_splits` of `None` or 0 uses the splitter default.
    pub fn split_with_rng<R: Rng + ?Sized>(
        &self,
        branch: &Branch,
        strategy: SplitStrategy,
        num_splits: Option<usize>,
        rng: &mut R,
    ) -> SplitResult {
        let num_splits = num_splits
            .filter(|n| *n > 0)
            .unwrap_or(self.default_num_splits);
        let papers: Vec<&Paper> = branch.accumulated_papers.iter().collect();
        let query = branch.query.as_str();

        let groups = match strategy {
            SplitStrategy::ByField => split_by_field(query, &papers, num_splits),
            SplitStrategy::ByTime => split_by_time(query, &papers, num_splits),
            SplitStrategy::ByCitationCount => split_by_citation_count(query, &papers, num_splits),
            SplitStrategy::Random => split_random(query, &papers, num_splits, rng),
        };

        SplitResult { strategy, groups }
    }

    /// Topical splits first, then temporal, then impact, then random
    pub fn suggest_strategy(&self, branch: &Branch) -> SplitStrategy {
        let papers: Vec<&Paper> = branch.accumulated_papers.iter().collect();
        let analysis = self.analyze_papers(&papers);

        if analysis.by_field.viable && analysis.by_field.num_fields >= 3 {
            return SplitStrategy::ByField;
        }

        let (oldest, newest) = analysis.by_time.year_range;
        if analysis.by_time.viable && newest - oldest >= 5 {
            return SplitStrategy::ByTime;
        }

        if analysis.by_citation.viable {
            return SplitStrategy::ByCitationCount;
        }

        SplitStrategy::Random
    }
}

fn split_by_field(query: &str, papers: &[&Paper], num_splits: usize) -> Vec<SplitGroup> {
    let mut fields = group_in_order(papers, |p| p.primary_field().to_string());
    // stable: equal counts keep first-seen order
    fields.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut groups: Vec<SplitGroup> = fields
        .iter()
        .take(num_splits)
        .map(|(field, members)| SplitGroup {
            label: field.clone(),
            query: format!("\"{}\" in {}", query, field),
            paper_ids: ids(members),
        })
        .collect();

    let other: Vec<String> = fields
        .iter()
        .skip(num_splits)
        .flat_map(|(_, members)| ids(members))
        .collect();
    if !other.is_empty() {
        groups.push(SplitGroup {
            label: "Other".to_string(),
            query: format!("\"{}\" in Other", query),
            paper_ids: other,
        });
    }

    groups
}

fn split_by_time(query: &str, papers: &[&Paper], num_splits: usize) -> Vec<SplitGroup> {
    let mut by_year = group_in_order(papers, |p| p.year_or_zero());
    by_year.sort_by_key(|(year, _)| *year);

    let num_splits = if by_year.len() < num_splits {
        by_year.len().max(1)
    } else {
        num_splits
    };
    let per_split = papers.len() / num_splits;

    let mut groups: Vec<(Vec<String>, Vec<i32>)> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_years: Vec<i32> = Vec::new();

    for (year, members) in &by_year {
        current.extend(ids(members));
        current_years.push(*year);

        if current.len() >= per_split && groups.len() < num_splits - 1 {
            groups.push((std::mem::take(&mut current), std::mem::take(&mut current_years)));
        }
    }

    if !current.is_empty() || groups.is_empty() {
        groups.push((current, current_years));
    }

    groups
        .into_iter()
        .map(|(paper_ids, years)| {
            let label = year_label(&years);
            SplitGroup {
                query: format!("\"{}\" published:{}", query, label),
                label,
                paper_ids,
            }
        })
        .collect()
}

fn split_by_citation_count(query: &str, papers: &[&Paper], num_splits: usize) -> Vec<SplitGroup> {
    let mut sorted: Vec<&Paper> = papers.to_vec();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.citations_or_zero()));

    let blocks = contiguous_blocks(sorted.len(), num_splits);
    let last = blocks.len().saturating_sub(1);

    blocks
        .into_iter()
        .enumerate()
        .map(|(i, (_, start, end))| {
            let (label, query) = if i == 0 {
                ("High Impact".to_string(), format!("\"{}\" highly cited", query))
            } else if i == last {
                ("Emerging".to_string(), format!("\"{}\" recent", query))
            } else {
                (format!("Medium Impact {}", i), format!("\"{}\"", query))
            };
            SplitGroup {
                label,
                query,
                paper_ids: ids(&sorted[start..end]),
            }
        })
        .collect()
}

fn split_random<R: Rng + ?Sized>(
    query: &str,
    papers: &[&Paper],
    num_splits: usize,
    rng: &mut R,
) -> Vec<SplitGroup> {
    let mut shuffled: Vec<&Paper> = papers.to_vec();
    shuffled.shuffle(rng);

    contiguous_blocks(shuffled.len(), num_splits)
        .into_iter()
        .enumerate()
        .map(|(i, (position, start, end))| SplitGroup {
            label: format!("Branch {}", position + 1),
            query: format!("{} (split {})", query, i + 1),
            paper_ids: ids(&shuffled[start..end]),
        })
        .collect()
}
