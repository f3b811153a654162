//! Threshold evaluation for node utilization samples.
//!
//! A [`evaluator::ThresholdEvaluator`] holds one [`threshold::ThresholdRule`]
//! per metric kind and maps each sample to the alerts it triggers. Evaluation
//! is a pure function of the sample and the configured limits.

pub mod evaluator;
pub mod threshold;


pub use evaluator::{evaluate, ThresholdEvaluator, Thresholds};
