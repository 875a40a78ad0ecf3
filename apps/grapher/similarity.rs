use std::collections::BTreeMap;

use kakomon_store::config::SelectionPolicy;
use kakomon_store::record::Record;
use kakomon_store::vector;
use thiserror::Error;
use tracing::debug;

use crate::graph::{FocalEntry, Projection, SimilarEntry, SimilarityGraph};

/// Candidates ranked inside the top K are always retained under the
/// top-K-or-threshold policy.
const TOP_K: usize = 5;
/// Candidates scoring at or above this are retained under both policies.
const SCORE_THRESHOLD: f32 = 0.9;

#[derive(Debug, Error)]
pub enum GraphError {
    /// A mixed or corrupted column: vectors of differing dimensionality
    /// inside one group. Never silently dropped.
    #[error(
        "vector dimension mismatch in group '{category}': record ({record_source}, {problem_number}) \
         has {got} dimensions, expected {expected}"
    )]
    DimensionMismatch {
        category: String,
        record_source: String,
        problem_number: String,
        expected: usize,
        got: usize,
    },

    #[error("embedding column has {cells} cells for {records} records")]
    RowCountMismatch { records: usize, cells: usize },
}

struct Member<'a> {
    record: &'a Record,
    vector: Vec<f32>,
}

/// Build the similarity graph for one embedding column. Rows without a
/// parseable vector are dropped entirely; they appear in neither focal nor
/// candidate position.
pub fn compute_graph(
    records: &[Record],
    cells: &[String],
    model_name: &str,
    policy: SelectionPolicy,
) -> Result<SimilarityGraph, GraphError> {
    if records.len() != cells.len() {
        return Err(GraphError::RowCountMismatch {
            records: records.len(),
            cells: cells.len(),
        });
    }

    let mut groups: BTreeMap<&str, Vec<Member>> = BTreeMap::new();
    for (record, cell) in records.iter().zip(cells) {
        if let Some(vector) = vector::parse_cell(cell) {
            groups
                .entry(record.minor_category.as_str())
                .or_default()
                .push(Member { record, vector });
        }
    }

    let mut categories = BTreeMap::new();
    for (category, members) in groups {
        // fewer than two vectors means no basis for comparison
        if members.len() < 2 {
            debug!(category = %category, "Skipping undersized group");
            continue;
        }

        let expected = members[0].vector.len();
        for member in &members[1..] {
            if member.vector.len() != expected {
                return Err(GraphError::DimensionMismatch {
                    category: category.to_string(),
                    record_source: member.record.source.clone(),
                    problem_number: member.record.problem_number.clone(),
                    expected,
                    got: member.vector.len(),
                });
            }
        }

        let matrix = similarity_matrix(&members);
        let mut entries = Vec::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            let mut candidates = Vec::with_capacity(members.len() - 1);
            for (j, other) in members.iter().enumerate() {
                if i == j {
                    continue;
                }
                candidates.push(SimilarEntry {
                    similarity: matrix[i][j],
                    data: Projection::from(other.record),
                });
            }
            entries.push(FocalEntry {
                main_problem: Projection::from(member.record),
                similar_problems: select_candidates(candidates, policy),
            });
        }
        categories.insert(category.to_string(), entries);
    }

    Ok(SimilarityGraph {
        model: model_name.to_string(),
        categories,
    })
}

fn similarity_matrix(members: &[Member]) -> Vec<Vec<f32>> {
    let n = members.len();
    let mut matrix = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let score = vector::cosine_similarity(&members[i].vector, &members[j].vector);
            matrix[i][j] = score;
            matrix[j][i] = score;
        }
    }
    matrix
}

/// Rank candidates by descending score and apply the selection policy. The
/// sort is stable, so equal scores keep their original row order.
fn select_candidates(
    mut candidates: Vec<SimilarEntry>,
    policy: SelectionPolicy,
) -> Vec<SimilarEntry> {
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    match policy {
        SelectionPolicy::TopKOrThreshold => candidates
            .into_iter()
            .enumerate()
            .filter(|(rank, candidate)| *rank < TOP_K || candidate.similarity >= SCORE_THRESHOLD)
            .map(|(_, candidate)| candidate)
            .collect(),
        SelectionPolicy::ThresholdOnly => candidates
            .into_iter()
            .filter(|candidate| candidate.similarity >= SCORE_THRESHOLD)
            .collect(),
    }
}
