//! Cross-chunk NLI aggregation
//!
//! Long source contexts are cut into fixed-size character slices and every
//! slice is asked about the same span. The answer with the strictly highest
//! confidence wins; ties keep the earliest chunk.

use futures::future::try_join_all;
use sdk::errors::EngineError;

use super::{NliBackend, NliLabel, NliPrediction};

/// Split contexts into slices of at most `chunk_size` characters.
///
/// `chunk_size <= 0` disables chunking. A context that fits is kept whole.
/// The result is never empty: no chunks becomes one empty chunk so the
/// backend is still consulted.
pub fn chunk_contexts(contexts: &[String], chunk_size: i64) -> Vec<String> {
    let mut chunks = Vec::new();

    if chunk_size <= 0 {
        chunks.extend(contexts.iter().cloned());
    } else {
        let size = chunk_size as usize;
        for context in contexts {
            let chars: Vec<char> = context.chars().collect();
            if chars.len() <= size {
                chunks.push(context.clone());
                continue;
            }
            chunks.extend(chars.chunks(size).map(|slice| slice.iter().collect::<String>()));
        }
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

/// Reduce per-chunk predictions to the single most confident one.
///
/// Starts from `NEUTRAL` at 0.0, so a backend that is never confident leaves
/// the span neutral.
pub fn reduce_predictions<I>(predictions: I) -> NliPrediction
where
    I: IntoIterator<Item = NliPrediction>,
{
    predictions.into_iter().fold(
        NliPrediction::new(NliLabel::Neutral, 0.0),
        |best, candidate| {
            if candidate.confidence > best.confidence {
                candidate
            } else {
                best
            }
        },
    )
}

/// Ask the backend about `hypothesis` against every chunk and keep the best answer.
///
/// Chunk calls run concurrently; the reduction follows chunk order so the
/// result does not depend on completion order. Any backend failure fails the
/// whole call.
pub async fn best_prediction(
    backend: &dyn NliBackend,
    hypothesis: &str,
    chunks: &[String],
) -> Result<NliPrediction, EngineError> {
    let calls = chunks.iter().map(|chunk| backend.infer(chunk, hypothesis));
    let predictions = try_join_all(calls).await?;
    Ok(reduce_predictions(predictions))
}
