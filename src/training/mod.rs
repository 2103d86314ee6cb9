//! Model training module
//!
//! Provides the forecasting model families:
//! - Decision trees and Random Forests (classification and recency-weighted regression)
//! - Ridge-regularized linear autoregression
//! - Constrained moving average (forest direction + trend magnitude)
//! - Recurrent LSTM cell chain (experimental)

mod config;
pub mod decision_tree;
pub mod random_forest;
pub mod autoregressive;
pub mod moving_average;
pub mod recurrent;

pub use config::{AutoregressiveConfig, ForestConfig, ModelSpec, MovingAverageConfig, RecurrentConfig};
pub use decision_tree::{DecisionTree, LeafValue, TreeNode, TreeTask};
pub use random_forest::{JitterConfig, LeafAggregation, RandomForest};
pub use autoregressive::AutoregressiveModel;
pub use moving_average::{ConstrainedMovingAverageModel, Direction, MovingAverageForecast};
pub use recurrent::{CellState, LocalGradientStep, LstmCell, RecurrentCellChain, TrainStep};
