//! Evidence records shared between the engine and its callers
//!
//! Papers are what a research branch accumulates, validated summaries are
//! what the grounding pipeline releases, and hypotheses are what a branch
//! produces once it has enough evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Paper author
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Author {
    #[serde(default)]
    pub name: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Display name, `Unknown` when the source did not provide one
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// A source document found by a research branch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    pub paper_id: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub authors: Vec<Author>,

    #[serde(default)]
    pub year: Option<i32>,

    #[serde(default)]
    pub citation_count: Option<u64>,

    #[serde(default)]
    pub fields_of_study: Vec<String>,

    /// Extracted full text, when an open-access copy was available
    #[serde(default)]
    pub full_text: Option<String>,
}

impl Paper {
    /// Create a paper with only an id and title
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = Some(abstract_text.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields_of_study = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_citations(mut self, citation_count: u64) -> Self {
        self.citation_count = Some(citation_count);
        self
    }

    pub fn with_authors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = names.into_iter().map(Author::new).collect();
        self
    }

    pub fn with_full_text(mut self, full_text: impl Into<String>) -> Self {
        self.full_text = Some(full_text.into());
        self
    }

    /// Title, or `Unknown` when missing
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }

    /// First listed field of study, `General` when none is listed
    pub fn primary_field(&self) -> &str {
        self.fields_of_study
            .first()
            .map(String::as_str)
            .unwrap_or("General")
    }

    /// Publication year, 0 when unknown
    pub fn year_or_zero(&self) -> i32 {
        self.year.unwrap_or(0)
    }

    /// Citation count, 0 when unknown
    pub fn citations_or_zero(&self) -> u64 {
        self.citation_count.unwrap_or(0)
    }
}

/// A summary that passed grounding validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatedSummary {
    pub paper_id: String,
    pub paper_title: String,
    pub summary: String,
    /// Grounded percentage reported by the validator, in [0, 1]
    pub groundedness: f64,
}

impl ValidatedSummary {
    pub fn new(
        paper_id: impl Into<String>,
        paper_title: impl Into<String>,
        summary: impl Into<String>,
        groundedness: f64,
    ) -> Self {
        Self {
            paper_id: paper_id.into(),
            paper_title: paper_title.into(),
            summary: summary.into(),
            groundedness: groundedness.clamp(0.0, 1.0),
        }
    }
}

/// A research hypothesis generated from a branch's summaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchHypothesis {
    pub id: String,
    pub text: String,
    pub supporting_paper_ids: Vec<String>,
    /// Model-reported confidence, clamped to [0, 1]
    pub confidence: f64,
    pub generated_from_branch: String,
    pub timestamp: DateTime<Utc>,
}

impl ResearchHypothesis {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        supporting_paper_ids: Vec<String>,
        confidence: f64,
        generated_from_branch: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            supporting_paper_ids,
            confidence: confidence.clamp(0.0, 1.0),
            generated_from_branch: generated_from_branch.into(),
            timestamp: Utc::now(),
        }
    }
}
