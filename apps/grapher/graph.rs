use std::collections::BTreeMap;

use kakomon_store::record::Record;
use serde::Serialize;

/// Trimmed projection of a record for the rendered payload. Vectors never
/// appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub major_category: String,
    pub minor_category: String,
    pub problem_number: String,
    pub title: String,
    pub link: String,
    pub source: String,
}

impl From<&Record> for Projection {
    fn from(record: &Record) -> Self {
        Self {
            major_category: record.major_category.clone(),
            minor_category: record.minor_category.clone(),
            problem_number: record.problem_number.clone(),
            title: record.title.clone(),
            link: record.link.clone(),
            source: record.source.clone(),
        }
    }
}

/// One retained similarity edge from a focal record to a group member.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarEntry {
    pub similarity: f32,
    pub data: Projection,
}

/// A focal record with its ranked, filtered candidate list.
#[derive(Debug, Clone, Serialize)]
pub struct FocalEntry {
    pub main_problem: Projection,
    pub similar_problems: Vec<SimilarEntry>,
}

/// The full output artifact for one model: focal entries grouped by
/// `minor_category`. Recomputed from scratch on every run.
#[derive(Debug, Serialize)]
pub struct SimilarityGraph {
    pub model: String,
    pub categories: BTreeMap<String, Vec<FocalEntry>>,
}
