//! Operations executed by the runner

use crate::error::WorkerError;
use crate::hierarchy::arena::{assemble_subtree, recompute_paths};
use crate::hierarchy::HierarchyPath;
use crate::types::{Field, NodeId, Record};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Progress of a running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Records between progress reports
const PROGRESS_STRIDE: usize = 256;

/// A unit of background work. Payloads are shared, not copied.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Rank records by how well `fields` match `query`
    ScoreSearch {
        query: String,
        fields: Vec<Field>,
        records: Vec<Arc<Record>>,
    },
    /// Depth-first ids of the subtree under `root`
    AssembleSubtree {
        root: NodeId,
        records: Vec<Arc<Record>>,
    },
    /// Synthesize paths from parent links and sibling order
    RecomputePaths { records: Vec<Arc<Record>> },
}

/// Result of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OperationOutput {
    /// `(id, score)`, best first
    Scores(Vec<(NodeId, u32)>),
    Subtree(Vec<NodeId>),
    Paths(Vec<(NodeId, HierarchyPath)>),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ScoreSearch { .. } => "score_search",
            Operation::AssembleSubtree { .. } => "assemble_subtree",
            Operation::RecomputePaths { .. } => "recompute_paths",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Operation::ScoreSearch { records, .. }
            | Operation::AssembleSubtree { records, .. }
            | Operation::RecomputePaths { records } => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run to completion on the current thread.
    pub fn execute(
        &self,
        progress: Option<&ProgressCallback>,
    ) -> Result<OperationOutput, WorkerError> {
        let total = self.len();
        let report = |completed: usize| {
            if let Some(callback) = progress {
                callback(Progress { completed, total });
            }
        };

        let output = match self {
            Operation::ScoreSearch {
                query,
                fields,
                records,
            } => {
                let needle = query.trim().to_lowercase();
                let mut scores = Vec::new();
                for (done, record) in records.iter().enumerate() {
                    if done > 0 && done % PROGRESS_STRIDE == 0 {
                        report(done);
                    }
                    let score = score_record(record, &needle, fields);
                    if score > 0 {
                        scores.push((record.id.clone(), score));
                    }
                }
                scores.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                OperationOutput::Scores(scores)
            }
            Operation::AssembleSubtree { root, records } => {
                let subtree = assemble_subtree(records, root);
                if subtree.is_empty() {
                    return Err(WorkerError::Failed {
                        operation: self.name().to_string(),
                        reason: format!("root '{}' not among the supplied records", root),
                    });
                }
                OperationOutput::Subtree(subtree)
            }
            Operation::RecomputePaths { records } => {
                OperationOutput::Paths(recompute_paths(records))
            }
        };
        report(total);
        Ok(output)
    }
}

/// Best match over `fields`: 3 exact, 2 prefix, 1 substring, 0 none.
fn score_record(record: &Record, needle: &str, fields: &[Field]) -> u32 {
    if needle.is_empty() {
        return 0;
    }
    fields
        .iter()
        .filter_map(|field| record.field(field))
        .map(|value| {
            let text = match value {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            if text == needle {
                3
            } else if text.starts_with(needle) {
                2
            } else if text.contains(needle) {
                1
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0)
}
