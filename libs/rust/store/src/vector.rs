use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Cell text for a row whose input text was blank: computed, but empty.
pub const EMPTY_VECTOR_MARKER: &str = "[]";

/// Legacy cell text written by earlier store generations for an
/// unprocessed row.
pub const NULL_MARKER: &str = "None";

static PARSE_WARNED: AtomicBool = AtomicBool::new(false);

/// True when the cell still needs a vector: never written, or holding the
/// legacy null marker. The empty-vector marker counts as processed.
pub fn is_unprocessed(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || trimmed == NULL_MARKER
}

/// Format a vector as its JSON cell encoding.
pub fn encode(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Parse a cell into a vector, or `None` when the cell holds no usable
/// vector: unprocessed, the empty-vector marker, or text that does not
/// decode to a non-empty array of finite numbers. Malformed cells are
/// coerced to absent rather than erroring; a single warning per process
/// keeps the coercion visible.
pub fn parse_cell(cell: &str) -> Option<Vec<f32>> {
    let trimmed = cell.trim();
    if is_unprocessed(trimmed) {
        return None;
    }

    let values: Vec<f32> = match serde_json::from_str(trimmed) {
        Ok(values) => values,
        Err(_) => {
            if !PARSE_WARNED.swap(true, Ordering::Relaxed) {
                let prefix: String = trimmed.chars().take(32).collect();
                warn!(
                    cell_prefix = %prefix,
                    "Ignoring unparseable vector cell, treating row as absent"
                );
            }
            return None;
        }
    };

    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(values)
}

/// Cosine similarity of two equal-length vectors. A zero-norm operand
/// yields 0.0, never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
