//! ONNX cross-encoder relevance scorer
//!
//! Scores (query, passage) pairs jointly with an ms-marco MiniLM cross-encoder.
//! The model and tokenizer are downloaded once into the cache directory at
//! startup; scoring itself needs no network.

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tokenizers::Tokenizer;

use crate::config::RerankerConfig;
use crate::error::{Error, Result};

use super::reranker::RelevanceScorer;

/// Pairs scored per inference call
const BATCH_SIZE: usize = 16;

/// Cross-encoder backed by ONNX Runtime
pub struct CrossEncoderScorer {
    /// ONNX Runtime session
    session: Mutex<Session>,
    /// HuggingFace tokenizer
    tokenizer: Tokenizer,
    /// Maximum sequence length for a (query, passage) pair
    max_length: usize,
    /// Model repository, for logging
    model: String,
}

impl CrossEncoderScorer {
    /// Load (downloading if needed) the cross-encoder named in `config`
    pub async fn new(config: &RerankerConfig) -> Result<Self> {
        tracing::info!("Initializing cross-encoder reranker: {}", config.model);

        std::fs::create_dir_all(&config.cache_dir).map_err(|e| {
            Error::Config(format!("Failed to create reranker cache directory: {}", e))
        })?;

        let model_dir = config.cache_dir.join(config.model.replace('/', "--"));
        std::fs::create_dir_all(&model_dir)?;

        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            download_file(&config.model, "onnx/model.onnx", &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download_file(&config.model, "tokenizer.json", &tokenizer_path).await?;
        }

        let session = Session::builder()
            .map_err(|e| Error::reranking(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::reranking(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| Error::reranking(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::reranking(format!("Failed to load model: {}", e)))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::reranking(format!("Failed to load tokenizer: {}", e)))?;

        tracing::info!("Cross-encoder reranker initialized");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length: config.max_length,
            model: config.model.clone(),
        })
    }

    /// Model repository this scorer was loaded from
    pub fn model(&self) -> &str {
        &self.model
    }

    fn score_chunk(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let batch_size = passages.len();
        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.as_str())).collect();

        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| Error::reranking(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_length);

        if max_len == 0 {
            return Err(Error::reranking("Tokenizer produced empty input"));
        }

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len().min(max_len) {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
                token_type_ids[i * max_len + j] = types[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((
            vec![batch_size, max_len],
            input_ids.into_boxed_slice(),
        ))
        .map_err(|e| Error::reranking(format!("Input tensor creation failed: {}", e)))?;

        let attention_mask_tensor = Tensor::from_array((
            vec![batch_size, max_len],
            attention_mask.into_boxed_slice(),
        ))
        .map_err(|e| Error::reranking(format!("Attention mask tensor creation failed: {}", e)))?;

        let token_type_ids_tensor = Tensor::from_array((
            vec![batch_size, max_len],
            token_type_ids.into_boxed_slice(),
        ))
        .map_err(|e| Error::reranking(format!("Token type tensor creation failed: {}", e)))?;

        let inputs = vec![
            ("input_ids", input_ids_tensor.into_dyn()),
            ("attention_mask", attention_mask_tensor.into_dyn()),
            ("token_type_ids", token_type_ids_tensor.into_dyn()),
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| Error::reranking(format!("Inference failed: {}", e)))?;

        let output_iter: Vec<_> = outputs.iter().collect();
        let output = output_iter
            .iter()
            .find(|(name, _)| *name == "logits")
            .or_else(|| output_iter.first())
            .map(|(_, v)| v)
            .ok_or_else(|| Error::reranking("No output tensor"))?;

        let (_shape, logits) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::reranking(format!("Failed to extract logits: {}", e)))?;

        // One logit per pair: shape [batch, 1]
        if logits.len() < batch_size {
            return Err(Error::reranking(format!(
                "Expected {} logits, got {}",
                batch_size,
                logits.len()
            )));
        }

        let per_row = logits.len() / batch_size;
        Ok((0..batch_size)
            .map(|i| sigmoid(logits[i * per_row]))
            .collect())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl RelevanceScorer for CrossEncoderScorer {
    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        let scores = self.score_chunk(query, &[passage.to_string()])?;
        scores
            .into_iter()
            .next()
            .ok_or_else(|| Error::reranking("Empty score result"))
    }

    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for chunk in passages.chunks(BATCH_SIZE) {
            scores.extend(self.score_chunk(query, chunk)?);
        }
        Ok(scores)
    }

    fn name(&self) -> &str {
        "cross-encoder"
    }
}

/// Download one file of a HuggingFace model repository
async fn download_file(repo: &str, file: &str, path: &Path) -> Result<()> {
    let url = format!("https://huggingface.co/{}/resolve/main/{}", repo, file);

    tracing::info!("Downloading reranker file from: {}", url);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| Error::reranking(format!("Failed to download {}: {}", file, e)))?;

    if !response.status().is_success() {
        return Err(Error::reranking(format!(
            "Download of {} failed: HTTP {}",
            file,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::reranking(format!("Failed to read {} bytes: {}", file, e)))?;

    tokio::fs::write(path, &bytes).await?;

    tracing::info!("Downloaded {} ({} bytes)", file, bytes.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_preserves_order() {
        assert!(sigmoid(3.0) > sigmoid(-1.0));
        assert!((sigmoid(0.0) - 0.5).abs() < f32::EPSILON);
    }
}
