use crate::config::EvalMetric;
use crate::error::{TrainingError, TrainingResult};
use std::collections::BTreeMap;

/// Metric name to value, e.g. `{"accuracy": 0.91}`.
pub type MetricMap = BTreeMap<String, f64>;

/// Logits for an evaluation set alongside the reference labels.
#[derive(Debug, Clone, Default)]
pub struct EvalPrediction {
    pub logits: Vec<Vec<f32>>,
    pub labels: Vec<u32>,
}

/// Index of the largest value; the first one wins on ties.
#[must_use]
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Numerically stable softmax.
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub fn accuracy(predictions: &[u32], references: &[u32]) -> TrainingResult<f64> {
    if predictions.len() != references.len() {
        return Err(TrainingError::Backend(format!(
            "{} predictions for {} references",
            predictions.len(),
            references.len()
        )));
    }
    if references.is_empty() {
        return Err(TrainingError::Backend("cannot score an empty evaluation set".to_string()));
    }
    let correct = predictions.iter().zip(references).filter(|(p, r)| p == r).count();
    Ok(correct as f64 / references.len() as f64)
}

/// Reduce logits to arg-max classes and score them against the labels.
pub fn compute_metrics(metric: EvalMetric, prediction: &EvalPrediction) -> TrainingResult<MetricMap> {
    let predicted = prediction
        .logits
        .iter()
        .map(|row| {
            argmax(row)
                .map(|i| i as u32)
                .ok_or_else(|| TrainingError::Backend("empty logits row".to_string()))
        })
        .collect::<TrainingResult<Vec<u32>>>()?;

    let value = match metric {
        EvalMetric::Accuracy => accuracy(&predicted, &prediction.labels)?,
    };
    Ok(MetricMap::from([(metric.name().to_string(), value)]))
}
