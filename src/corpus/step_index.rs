//! Per-session index over the steps of the locked task.
//!
//! Built once per lock from `text + keywords` of each step. Steps whose
//! combined text is empty are left out, so index positions are mapped back
//! to step offsets through `step_offsets`.

use tracing::debug;

use crate::corpus::Task;
use crate::error::{CorpusError, CorpusResult};
use crate::vector::{Distance, EmbeddingGenerator, FlatIndex, VectorDimension, VectorError};

/// Step accepted by the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepHit {
    /// Offset into `Task::steps`
    pub step_offset: usize,
    pub distance: Distance,
}

#[derive(Debug, Clone)]
pub struct StepIndex {
    index: FlatIndex,
    step_offsets: Vec<usize>,
}

impl StepIndex {
    /// Embeds every step with non-empty match text in one batch call.
    ///
    /// Returns `NoEmbeddableSteps` when no step has any text.
    pub fn build(task: &Task, embedder: &dyn EmbeddingGenerator) -> CorpusResult<Self> {
        let (step_offsets, texts): (Vec<usize>, Vec<String>) = task
            .steps
            .iter()
            .enumerate()
            .map(|(offset, step)| (offset, step.match_text()))
            .filter(|(_, text)| !text.is_empty())
            .unzip();

        if texts.is_empty() {
            return Err(CorpusError::NoEmbeddableSteps {
                task_id: task.id.to_string(),
            });
        }

        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embedder.generate_embeddings(&refs)?;
        if vectors.len() != refs.len() {
            return Err(VectorError::EmbeddingFailed(format!(
                "requested {} step embeddings, got {}",
                refs.len(),
                vectors.len()
            ))
            .into());
        }

        let index = FlatIndex::from_vectors(embedder.dimension(), &vectors)?;
        debug!(
            "Built step index for task '{}': {} of {} steps embedded",
            task.id,
            step_offsets.len(),
            task.steps.len()
        );

        Ok(Self {
            index,
            step_offsets,
        })
    }

    /// An index that never matches, for tasks without embeddable steps.
    pub fn empty(dimension: VectorDimension) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            step_offsets: Vec::new(),
        }
    }

    /// Nearest step to `query` within `threshold`.
    pub fn search(&self, query: &[f32], threshold: f32) -> Result<Option<StepHit>, VectorError> {
        Ok(self
            .index
            .nearest_within(query, threshold)?
            .and_then(|(position, distance)| {
                self.step_offsets
                    .get(position)
                    .map(|&step_offset| StepHit {
                        step_offset,
                        distance,
                    })
            }))
    }

    /// Offsets of the steps present in the index, in index order.
    pub fn step_offsets(&self) -> &[usize] {
        &self.step_offsets
    }

    pub fn len(&self) -> usize {
        self.step_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_offsets.is_empty()
    }

    pub fn dimension(&self) -> VectorDimension {
        self.index.dimension()
    }
}
