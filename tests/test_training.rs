//! Integration test: model families end-to-end

use econcast::training::{
    AutoregressiveModel, ConstrainedMovingAverageModel, DecisionTree, Direction, ForestConfig,
    JitterConfig, LeafAggregation, RandomForest, RecurrentCellChain, TreeNode,
};
use econcast::EconcastError;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn indicator_matrix(n: usize) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
        0 => i as f64 * 0.5,
        1 => ((i * 13) % 7) as f64,
        _ => (i as f64).sqrt(),
    });
    let y = Array1::from_shape_fn(n, |i| 2.0 * i as f64 + ((i * 13) % 7) as f64);
    (x, y)
}

/// Route `rows` through `node` and check every split against the data.
fn assert_splits_valid(node: &TreeNode, x: &Array2<f64>, rows: &[usize]) {
    assert_eq!(node.n_samples(), rows.len());
    if let TreeNode::Split { feature_idx, threshold, left, right, .. } = node {
        let (l, r): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&i| x[[i, *feature_idx]] <= *threshold);
        assert!(l.iter().all(|&i| x[[i, *feature_idx]] <= *threshold));
        assert!(r.iter().all(|&i| x[[i, *feature_idx]] > *threshold));
        assert_eq!(left.n_samples() + right.n_samples(), rows.len());
        assert_splits_valid(left, x, &l);
        assert_splits_valid(right, x, &r);
    }
}

#[test]
fn test_tree_structure_is_seed_deterministic() {
    let (x, y) = indicator_matrix(40);
    let grow = |seed: u64| {
        let mut tree = DecisionTree::new_regressor().with_feature_subsampling(true);
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(seed)).unwrap();
        tree
    };

    let a = grow(17);
    let b = grow(17);
    assert_eq!(a, b);
    assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
}

#[test]
fn test_tree_splits_partition_training_rows() {
    let (x, y) = indicator_matrix(50);
    let rows: Vec<usize> = (0..x.nrows()).collect();

    let mut regressor = DecisionTree::new_regressor().with_max_depth(6);
    regressor.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
    assert_splits_valid(regressor.root().unwrap(), &x, &rows);

    let labels = y.mapv(|v| if v > 50.0 { 1.0 } else { 0.0 });
    let mut classifier = DecisionTree::new_classifier();
    classifier.fit(&x, &labels, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
    assert_splits_valid(classifier.root().unwrap(), &x, &rows);
}

#[test]
fn test_forest_importance_normalized() {
    let (x, y) = indicator_matrix(60);
    let mut forest = RandomForest::new_regressor(40).with_random_state(8);
    forest.fit(&x, &y).unwrap();

    let importance = forest.feature_importances().unwrap();
    assert_eq!(importance.len(), 3);
    assert!(importance.iter().all(|&v| v >= 0.0));
    let total = importance.sum();
    assert!(total == 0.0 || (total - 1.0).abs() < 1e-9, "sum = {}", total);
}

#[test]
fn test_forest_from_config_with_jitter() {
    let (x, y) = indicator_matrix(30);
    let config = ForestConfig::default()
        .with_n_estimators(15)
        .with_max_depth(4)
        .with_jitter(JitterConfig::seeded(5))
        .with_random_state(2);
    let mut forest = RandomForest::from_config(&config);
    forest.fit(&x, &y).unwrap();

    assert_eq!(forest.aggregation, LeafAggregation::RecencyWeightedRegression);
    assert_eq!(forest.n_trees(), 15);
    assert!(forest.trees().iter().all(|t| t.depth() <= 4));
    assert!(forest.predict_row(&x.row(29).to_vec()).unwrap().is_finite());
}

#[test]
fn test_autoregressive_recovers_coefficients() {
    // y_t = 2 + 0.5·y_{t-1}, decaying toward 4
    let mut series = vec![100.0];
    for _ in 0..24 {
        let prev = series[series.len() - 1];
        series.push(2.0 + 0.5 * prev);
    }

    let mut model = AutoregressiveModel::new(1).with_lambda(0.0);
    model.fit(&series).unwrap();
    let beta = model.coefficients().unwrap();
    assert_eq!(beta.len(), 2);
    assert!((beta[0] - 2.0).abs() < 1e-6, "bias = {}", beta[0]);
    assert!((beta[1] - 0.5).abs() < 1e-6, "slope = {}", beta[1]);
}

#[test]
fn test_autoregressive_trend_round_trip() {
    let series: Vec<f64> = (0..40).map(|t| 3.0 + t as f64).collect();
    let mut model = AutoregressiveModel::new(1);
    model.fit(&series).unwrap();

    let beta = model.coefficients().unwrap();
    assert!((beta[0] - 1.0).abs() < 0.05);
    assert!((beta[1] - 1.0).abs() < 0.05);
}

#[test]
fn test_autoregressive_price_scenario() {
    let series = [100.0, 102.0, 101.0, 105.0, 108.0, 107.0, 110.0];
    let mut model = AutoregressiveModel::new(2);
    model.fit(&series).unwrap();
    assert!(model.predict(&[107.0, 110.0]).unwrap().is_finite());
}

#[test]
fn test_minimum_series_lengths() {
    let mut ar = AutoregressiveModel::new(4);
    assert!(matches!(
        ar.fit(&[1.0, 2.0, 3.0, 4.0]),
        Err(EconcastError::InsufficientData { .. })
    ));

    let mut ma = ConstrainedMovingAverageModel::new(4);
    assert!(matches!(
        ma.fit(&[1.0, 2.0, 3.0, 4.0]),
        Err(EconcastError::InsufficientData { .. })
    ));
}

#[test]
fn test_moving_average_uptrend() {
    let series: Vec<f64> = (1..=10).map(|i| i as f64 * 1.5).collect();
    let mut model = ConstrainedMovingAverageModel::new(3).with_random_state(11);
    model.fit(&series).unwrap();

    let forecast = model.predict(&series).unwrap();
    assert_eq!(forecast.direction, Direction::Up);
    assert!(forecast.confidence >= 0.5);
    assert!(forecast.ma_change >= 0.0);
    assert!(((forecast.prediction - 15.0).abs() - forecast.ma_change).abs() < 1e-12);
}

#[test]
fn test_corrupted_row_is_skipped() {
    // 11 rows, one corrupted: 10 valid rows remain
    let (mut x, y) = indicator_matrix(11);
    x[[4, 1]] = f64::NAN;
    let mut forest = RandomForest::new_regressor(10).with_random_state(3);
    forest.fit(&x, &y).unwrap();
    assert!(forest.is_fitted());

    // 10 rows, one corrupted: 9 valid rows remain
    let (x, mut y) = indicator_matrix(10);
    y[7] = f64::INFINITY;
    let mut forest = RandomForest::new_regressor(10).with_random_state(3);
    assert!(matches!(
        forest.fit(&x, &y),
        Err(EconcastError::InsufficientData { required: 10, actual: 9 })
    ));
}

#[test]
fn test_recurrent_chain_end_to_end() {
    let series: Vec<f64> = (0..48).map(|i| 50.0 + 5.0 * (i as f64 / 4.0).sin()).collect();
    let mut model = RecurrentCellChain::new(4, 2).with_epochs(10).with_random_state(21);
    model.fit(&series).unwrap();

    let first = model.predict(&series).unwrap();
    assert!(first.is_finite());
    assert_eq!(first, model.predict(&series).unwrap());
}
