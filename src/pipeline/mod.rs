//! Training and inference orchestration.

mod inference;
mod training;

pub use inference::{InferencePipeline, ScoreOutput, ScorerHandle};
pub use training::{TrainedModel, TrainingPipeline, TrainingReport, TrainingStage};
