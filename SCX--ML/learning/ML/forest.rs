use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::{
    ensemble::random_forest_regressor::{
        RandomForestRegressor, RandomForestRegressorParameters,
    },
    linalg::basic::matrix::DenseMatrix,
};

use crate::{
    config::ForestConfig,
    error::{PipelineError, Result},
};

/// Trees are grown in this many independently seeded shards, so the fitted
/// forest does not depend on how many worker threads ran.
const SHARDS: usize = 8;

type Backend = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Forest hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Total number of trees.
    pub n_estimators: usize,
    /// Depth cap; `None` grows every tree to pure leaves.
    pub max_depth: Option<u16>,
    /// Seed for bootstrap sampling.
    pub seed: u64,
    /// Worker threads; `0` uses every available core.
    pub n_jobs: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self::from(&ForestConfig::default())
    }
}

impl From<&ForestConfig> for ForestParams {
    fn from(config: &ForestConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            seed: config.seed,
            n_jobs: config.n_jobs,
        }
    }
}

impl ForestParams {
    /// Tree count and seed of every non-empty shard.
    #[must_use]
    pub fn shard_plan(&self) -> Vec<(usize, u64)> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let base = self.n_estimators / SHARDS;
        let extra = self.n_estimators % SHARDS;
        (0..SHARDS)
            .map(|shard| (base + usize::from(shard < extra), rng.next_u64()))
            .filter(|(trees, _)| *trees > 0)
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Shard {
    trees: usize,
    model: Backend,
}

/// Bagged regression trees averaged over all shards.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForestRegressor {
    params: ForestParams,
    n_features: usize,
    shards: Vec<Shard>,
}

impl ForestRegressor {
    /// Fits the forest on row-major `features` against `targets`.
    pub fn fit(features: &[Vec<f64>], targets: &[f64], params: &ForestParams) -> Result<Self> {
        if features.is_empty() {
            return Err(PipelineError::EmptyPartition("training subset".into()));
        }
        if features.len() != targets.len() {
            return Err(PipelineError::Model(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        if params.n_estimators == 0 {
            return Err(PipelineError::InvalidConfig(
                "forest needs at least one tree".into(),
            ));
        }
        let n_features = features[0].len();
        if n_features == 0 {
            return Err(PipelineError::Model("no feature columns to train on".into()));
        }
        let x = to_matrix(features, n_features)?;
        let y = targets.to_vec();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.n_jobs)
            .build()
            .map_err(|err| PipelineError::Model(format!("worker pool: {err}")))?;
        let shards = pool.install(|| {
            params
                .shard_plan()
                .into_par_iter()
                .map(|(trees, seed)| fit_shard(&x, &y, n_features, trees, seed, params.max_depth))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(Self {
            params: *params,
            n_features,
            shards,
        })
    }

    /// Mean prediction of every tree for each row.
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let x = to_matrix(features, self.n_features)?;
        let mut sums = vec![0.0; features.len()];
        for shard in &self.shards {
            let predictions = shard
                .model
                .predict(&x)
                .map_err(|err| PipelineError::Model(err.to_string()))?;
            #[allow(clippy::cast_precision_loss)]
            let weight = shard.trees as f64;
            for (sum, prediction) in sums.iter_mut().zip(predictions) {
                *sum += prediction * weight;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let total = self.n_trees() as f64;
        Ok(sums.into_iter().map(|sum| sum / total).collect())
    }

    /// Trees across all shards.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.shards.iter().map(|shard| shard.trees).sum()
    }

    /// Width of the feature vectors the forest expects.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Hyper-parameters used for fitting.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }
}

#[allow(clippy::ptr_arg)]
fn fit_shard(
    x: &DenseMatrix<f64>,
    y: &Vec<f64>,
    n_features: usize,
    trees: usize,
    seed: u64,
    max_depth: Option<u16>,
) -> Result<Shard> {
    // Every split considers all features.
    let mut parameters = RandomForestRegressorParameters::default()
        .with_n_trees(trees)
        .with_m(n_features)
        .with_seed(seed);
    if let Some(depth) = max_depth {
        parameters = parameters.with_max_depth(depth);
    }
    let model = RandomForestRegressor::fit(x, y, parameters)
        .map_err(|err| PipelineError::Model(err.to_string()))?;
    Ok(Shard { trees, model })
}

fn to_matrix(rows: &[Vec<f64>], n_features: usize) -> Result<DenseMatrix<f64>> {
    let mut values = Vec::with_capacity(rows.len() * n_features);
    for (idx, row) in rows.iter().enumerate() {
        if row.len() != n_features {
            return Err(PipelineError::Model(format!(
                "row {idx} has {} features, expected {n_features}",
                row.len()
            )));
        }
        values.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(rows.len(), n_features, values, false))
}
