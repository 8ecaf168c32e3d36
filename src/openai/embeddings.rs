//! `/embeddings` endpoint as an [`EmbeddingGenerator`].

use serde::{Deserialize, Serialize};

use super::OpenAiClient;
use crate::vector::{EmbeddingGenerator, VectorDimension, VectorError};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Remote embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingGenerator {
    client: OpenAiClient,
    model: String,
    dimension: VectorDimension,
}

impl OpenAiEmbeddingGenerator {
    pub fn new(client: OpenAiClient, model: impl Into<String>, dimension: VectorDimension) -> Self {
        Self {
            client,
            model: model.into(),
            dimension,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl EmbeddingGenerator for OpenAiEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbeddingResponse = self
            .client
            .post_json("embeddings", &request)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;

        into_ordered_embeddings(response, texts.len(), self.dimension)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Restores input order from the `index` field and validates the batch.
fn into_ordered_embeddings(
    response: EmbeddingResponse,
    expected: usize,
    dimension: VectorDimension,
) -> Result<Vec<Vec<f32>>, VectorError> {
    if response.data.len() != expected {
        return Err(VectorError::EmbeddingFailed(format!(
            "requested {expected} embeddings, provider returned {}",
            response.data.len()
        )));
    }

    let mut data = response.data;
    data.sort_by_key(|item| item.index);

    data.into_iter()
        .map(|item| {
            dimension.validate_vector(&item.embedding)?;
            Ok(item.embedding)
        })
        .collect()
}
