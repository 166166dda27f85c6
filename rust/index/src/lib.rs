//! The host-facing half of the engine: the `IndexVariant` trait object
//! family (C8), the `Orchestrator` that fans each variant's operations
//! across a device fleet (C7), multi-index batched search (C9), and the
//! `IndexDescriptor` tagged union spec.md §9 calls for in place of the
//! original's `dynamic_cast`-based clone path.

pub mod multi;
pub mod orchestrator;
pub mod training;
pub mod variants;

pub use multi::{multi_search, MultiSearchResult, QueryIndexMask};
pub use orchestrator::Orchestrator;
pub use variants::{
    CenteringTransform, FlatIndex, Int8FlatIndex, IndexVariant, IvfFlatIndex, IvfPqIndex, IvfSq8Index, PreTransformIndex,
    Transform,
};

use ivf_config::EngineConfig;
use ivf_error::EngineError;
use ivf_types::Metric;
use serde::{Deserialize, Serialize};

/// Tagged-union replacement for the source's `dynamic_cast`-based
/// variant switch (spec.md §9): names exactly the parameters needed to
/// reconstruct a concrete `IndexVariant`, nothing more.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum IndexDescriptor {
    Flat { dim: usize, metric: Metric },
    IvfFlat { dim: usize, metric: Metric, nlist: usize },
    IvfSq8 { dim: usize, metric: Metric, nlist: usize },
    IvfPq { dim: usize, metric: Metric, nlist: usize, m: usize },
    Int8Flat { dim: usize, nlist: usize },
    PreTransform { inner: Box<IndexDescriptor> },
}

/// Build the concrete `IndexVariant` named by `descriptor`. Clone
/// functions and deserialized `CpuIndex`es both go through this single
/// entry point rather than pattern-matching on a class hierarchy.
pub fn create_index(config: &EngineConfig, descriptor: IndexDescriptor) -> Result<Box<dyn IndexVariant>, EngineError> {
    Ok(match descriptor {
        IndexDescriptor::Flat { dim, metric } => Box::new(FlatIndex::new(config, dim, metric)?),
        IndexDescriptor::IvfFlat { dim, metric, nlist } => Box::new(IvfFlatIndex::new(config, dim, metric, nlist)?),
        IndexDescriptor::IvfSq8 { dim, metric, nlist } => Box::new(IvfSq8Index::new(config, dim, metric, nlist)?),
        IndexDescriptor::IvfPq { dim, metric, nlist, m } => Box::new(IvfPqIndex::new(config, dim, metric, nlist, m)?),
        IndexDescriptor::Int8Flat { dim, nlist } => Box::new(Int8FlatIndex::new(config, dim, nlist)?),
        IndexDescriptor::PreTransform { inner } => {
            let inner_index = create_index(config, *inner)?;
            Box::new(PreTransformIndex::new(Box::new(CenteringTransform::new()), inner_index))
        }
    })
}

/// A dense, non-sharded, serializable mirror of a device index (spec.md
/// §6 "Persistence"): the descriptor needed to rebuild the right
/// concrete variant, the flattened training parameters, and every
/// list's raw codes/ids. Persistence is always round-tripped through
/// this form; the core owns no other on-disk state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuIndex {
    pub descriptor: IndexDescriptor,
    pub trained_blob: Vec<f32>,
    pub lists: Vec<(Vec<u8>, Vec<u32>)>,
}

/// Clone a live device index down to its `CpuIndex` mirror.
pub fn index_device_to_cpu(index: &dyn IndexVariant, descriptor: IndexDescriptor) -> Result<CpuIndex, EngineError> {
    Ok(CpuIndex {
        descriptor,
        trained_blob: index.export_trained_blob(),
        lists: index.export_lists()?,
    })
}

/// Rebuild a device index (spread across `config.devices`) from a
/// `CpuIndex` mirror: construct the empty variant from the descriptor,
/// re-push its training parameters, then re-add every list's raw codes.
pub fn index_cpu_to_device(config: &EngineConfig, cpu: &CpuIndex) -> Result<Box<dyn IndexVariant>, EngineError> {
    let index = create_index(config, cpu.descriptor.clone())?;
    index.import_trained_blob(&cpu.trained_blob)?;
    index.import_lists(&cpu.lists)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_index_dispatches_on_descriptor() {
        let config = EngineConfig::default();
        let idx = create_index(&config, IndexDescriptor::Flat { dim: 16, metric: Metric::L2 }).unwrap();
        assert_eq!(idx.dimension(), 16);
        assert!(idx.is_trained());
    }

    #[test]
    fn round_trip_through_cpu_index_preserves_search_result() {
        let config = EngineConfig::default();
        let idx = create_index(&config, IndexDescriptor::Flat { dim: 16, metric: Metric::L2 }).unwrap();
        let vectors: Vec<f32> = (0..32).map(|d| d as f32 * 0.1).collect();
        idx.add_with_ids(&vectors, 2, &[7, 9]).unwrap();

        let cpu = index_device_to_cpu(idx.as_ref(), IndexDescriptor::Flat { dim: 16, metric: Metric::L2 }).unwrap();
        let rebuilt = index_cpu_to_device(&config, &cpu).unwrap();
        assert_eq!(rebuilt.ntotal(), 2);

        let query = &vectors[0..16];
        let (_dist, ids_before) = idx.search(query, 1, 1).unwrap();
        let (_dist, ids_after) = rebuilt.search(query, 1, 1).unwrap();
        assert_eq!(ids_before, ids_after);
    }

    #[test]
    fn round_trip_preserves_ivf_flat_training() {
        let mut config = EngineConfig::default();
        config.devices = vec![0];
        let descriptor = IndexDescriptor::IvfFlat { dim: 16, metric: Metric::L2, nlist: 2 };
        let idx = create_index(&config, descriptor.clone()).unwrap();
        let mut train_data = Vec::new();
        for i in 0..16 {
            train_data.extend((0..16).map(|d| ((i + d) as f32) * 0.05));
        }
        idx.train(&train_data, 16).unwrap();
        let v: Vec<f32> = (0..16).map(|d| d as f32 * 0.05).collect();
        idx.add_with_ids(&v, 1, &[3]).unwrap();

        let cpu = index_device_to_cpu(idx.as_ref(), descriptor).unwrap();
        let rebuilt = index_cpu_to_device(&config, &cpu).unwrap();
        assert!(rebuilt.is_trained());
        let (_dist, ids) = rebuilt.search(&v, 1, 1).unwrap();
        assert_eq!(ids[0], 3);
    }

    #[test]
    fn add_without_ids_assigns_sequential_ids() {
        let config = EngineConfig::default();
        let idx = create_index(&config, IndexDescriptor::Flat { dim: 16, metric: Metric::L2 }).unwrap();
        let vectors = vec![0f32; 32];
        idx.add(&vectors, 2).unwrap();
        assert_eq!(idx.ntotal(), 2);
        let (_dist, ids) = idx.search(&vectors[0..16], 1, 1).unwrap();
        assert_eq!(ids[0], 0);
    }
}
