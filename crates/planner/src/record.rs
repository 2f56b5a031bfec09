//! MessagePack files exchanged with the training pipeline.

use anyhow::{ensure, Context, Result};
use ez_mcts::{RootResult, SearchSummary};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A batch of observations to plan from.
#[derive(Serialize, Deserialize, Debug)]
pub struct ObservationBatch {
    /// One flattened observation per root.
    pub observations: Vec<Vec<f32>>,

    /// Legal actions per root. Every action is legal when absent.
    #[serde(default)]
    pub legal_actions: Option<Vec<Vec<usize>>>,
}

impl ObservationBatch {
    pub fn read(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open observations: {:?}", path))?;
        rmp_serde::from_read(BufReader::new(file))
            .with_context(|| format!("Failed to decode observations: {:?}", path))
    }

    /// Stack observations into `[batch, width]`.
    pub fn to_array(&self) -> Result<Array2<f32>> {
        let batch = self.observations.len();
        ensure!(batch > 0, "Observation batch is empty");
        let width = self.observations[0].len();
        for (i, obs) in self.observations.iter().enumerate() {
            ensure!(
                obs.len() == width,
                "Observation {} has {} values, expected {}",
                i,
                obs.len(),
                width
            );
        }
        let data: Vec<f32> = self.observations.iter().flatten().copied().collect();
        Array2::from_shape_vec((batch, width), data).context("Failed to stack observations")
    }
}

/// Results of one batched search.
#[derive(Serialize, Deserialize, Debug)]
pub struct SearchRecord {
    /// Root children actions, ascending, per root.
    pub actions: Vec<Vec<usize>>,

    /// Visit count per child, aligned with `actions`.
    pub visit_counts: Vec<Vec<u32>>,

    /// Mean backed-up value per root.
    pub root_values: Vec<f32>,

    /// Min-max normalized child Q, aligned with `actions`.
    pub normalized_q: Vec<Vec<f32>>,

    /// Most recently selected action chain per root.
    pub trajectories: Vec<Vec<usize>>,

    /// Optional metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchRecord {
    pub fn new(results: Vec<RootResult>, summary: &SearchSummary, seed: u64) -> Self {
        let mut record = SearchRecord {
            actions: Vec::with_capacity(results.len()),
            visit_counts: Vec::with_capacity(results.len()),
            root_values: Vec::with_capacity(results.len()),
            normalized_q: Vec::with_capacity(results.len()),
            trajectories: Vec::with_capacity(results.len()),
            metadata: HashMap::new(),
        };
        for result in results {
            let (actions, counts): (Vec<usize>, Vec<u32>) = result.visit_counts.into_iter().unzip();
            record.actions.push(actions);
            record.visit_counts.push(counts);
            record.root_values.push(result.value);
            record.normalized_q.push(result.normalized_q);
            record.trajectories.push(result.trajectory);
        }

        let metadata = &mut record.metadata;
        metadata.insert("seed".to_string(), serde_json::json!(seed));
        metadata.insert("rounds".to_string(), serde_json::json!(summary.rounds));
        metadata.insert(
            "max_search_len".to_string(),
            serde_json::json!(summary.max_search_len),
        );
        metadata.insert("expansions".to_string(), serde_json::json!(summary.expansions));
        metadata.insert("resets".to_string(), serde_json::json!(summary.resets));
        metadata.insert("nodes".to_string(), serde_json::json!(summary.nodes));
        record
    }

    pub fn num_roots(&self) -> usize {
        self.visit_counts.len()
    }

    /// Write as `search_{index:06}.msgpack` in `dir`.
    pub fn write(&self, dir: &Path, index: usize) -> Result<()> {
        let filename = dir.join(format!("search_{:06}.msgpack", index));
        let file = File::create(&filename)
            .with_context(|| format!("Failed to create file: {:?}", filename))?;
        let mut writer = BufWriter::new(file);
        // Use named fields to serialize structs as maps (not arrays)
        rmp_serde::encode::write_named(&mut writer, self)
            .with_context(|| format!("Failed to serialize search {}", index))
    }
}
