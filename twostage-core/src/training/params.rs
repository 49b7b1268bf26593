//! The flat parameter buffer shared by both sub-networks.
//!
//! External optimizers address a single contiguous weight vector, so the
//! proposal and classification parameters live side by side in one buffer
//! with a named range each.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The two halves of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubNetwork {
    Proposal,
    Classification,
}

/// Offsets of each sub-network inside the flat buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLayout {
    pub pnet: Range<usize>,
    pub cnet: Range<usize>,
}

impl ParameterLayout {
    pub fn new(pnet_len: usize, cnet_len: usize) -> Self {
        Self {
            pnet: 0..pnet_len,
            cnet: pnet_len..pnet_len + cnet_len,
        }
    }

    pub fn range(&self, net: SubNetwork) -> Range<usize> {
        match net {
            SubNetwork::Proposal => self.pnet.clone(),
            SubNetwork::Classification => self.cnet.clone(),
        }
    }

    pub fn total(&self) -> usize {
        self.cnet.end.max(self.pnet.end)
    }
}

/// Owned weights plus their layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    layout: ParameterLayout,
    weights: Vec<f32>,
}

impl ParameterStore {
    /// Concatenate initial proposal and classification weights.
    pub fn new(pnet: Vec<f32>, cnet: Vec<f32>) -> Self {
        let layout = ParameterLayout::new(pnet.len(), cnet.len());
        let mut weights = pnet;
        weights.extend(cnet);
        Self { layout, weights }
    }

    pub fn zeros(pnet_len: usize, cnet_len: usize) -> Self {
        Self::new(vec![0.0; pnet_len], vec![0.0; cnet_len])
    }

    pub fn from_parts(layout: ParameterLayout, weights: Vec<f32>) -> Result<Self, TrainError> {
        if layout.pnet.start != 0 || layout.pnet.end != layout.cnet.start {
            return Err(TrainError::invalid_input(
                "pnet must start at 0 and be immediately followed by cnet",
            ));
        }
        if layout.total() != weights.len() {
            return Err(TrainError::invalid_input(format!(
                "layout covers {} weights but buffer holds {}",
                layout.total(),
                weights.len()
            )));
        }
        Ok(Self { layout, weights })
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    pub fn slice(&self, net: SubNetwork) -> &[f32] {
        &self.weights[self.layout.range(net)]
    }

    pub fn slice_mut(&mut self, net: SubNetwork) -> &mut [f32] {
        let range = self.layout.range(net);
        &mut self.weights[range]
    }

    /// Overwrite one sub-network with the same sub-network from `other`.
    pub fn copy_from(&mut self, net: SubNetwork, other: &ParameterStore) -> Result<(), TrainError> {
        let src = other.slice(net);
        let dst = self.slice_mut(net);
        if src.len() != dst.len() {
            return Err(TrainError::checkpoint(format!(
                "{net:?} size mismatch: checkpoint has {} weights, network has {}",
                src.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Deep copy of the current proposal weights.
    pub fn freeze_proposal(&self) -> FrozenProposal {
        FrozenProposal {
            weights: self.slice(SubNetwork::Proposal).to_vec(),
        }
    }

    pub fn view<'a>(&'a self, frozen: Option<&'a FrozenProposal>) -> NetworkView<'a> {
        NetworkView::new(self, frozen)
    }
}

/// Proposal weights held fixed while only the classification stage trains.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenProposal {
    weights: Vec<f32>,
}

impl FrozenProposal {
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}

/// What the network collaborators see of the parameters for one call.
#[derive(Debug, Clone, Copy)]
pub struct NetworkView<'a> {
    weights: &'a [f32],
    layout: &'a ParameterLayout,
    frozen: Option<&'a FrozenProposal>,
}

impl<'a> NetworkView<'a> {
    pub fn new(store: &'a ParameterStore, frozen: Option<&'a FrozenProposal>) -> Self {
        Self::from_raw(store.weights(), store.layout(), frozen)
    }

    /// View over a candidate buffer, as handed out during an optimizer step.
    pub fn from_raw(
        weights: &'a [f32],
        layout: &'a ParameterLayout,
        frozen: Option<&'a FrozenProposal>,
    ) -> Self {
        Self {
            weights,
            layout,
            frozen,
        }
    }

    /// The full flat buffer the gradient must be shaped like.
    pub fn weights(&self) -> &'a [f32] {
        self.weights
    }

    pub fn layout(&self) -> &'a ParameterLayout {
        self.layout
    }

    /// Weights to generate region proposals with: the frozen copy when one
    /// exists, otherwise the live proposal range.
    pub fn proposal_weights(&self) -> &'a [f32] {
        match self.frozen {
            Some(frozen) => frozen.weights(),
            None => &self.weights[self.layout.pnet.clone()],
        }
    }

    pub fn classification_weights(&self) -> &'a [f32] {
        &self.weights[self.layout.cnet.clone()]
    }

    pub fn is_proposal_frozen(&self) -> bool {
        self.frozen.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_contiguous() {
        let store = ParameterStore::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0]);
        assert_eq!(store.layout().pnet, 0..3);
        assert_eq!(store.layout().cnet, 3..5);
        assert_eq!(store.slice(SubNetwork::Classification), &[4.0, 5.0]);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_from_parts_validates_length() {
        let layout = ParameterLayout::new(2, 2);
        assert!(ParameterStore::from_parts(layout.clone(), vec![0.0; 4]).is_ok());
        assert!(ParameterStore::from_parts(layout, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_copy_from_one_subnetwork() {
        let mut store = ParameterStore::zeros(2, 2);
        let other = ParameterStore::new(vec![7.0, 8.0], vec![9.0, 10.0]);
        store.copy_from(SubNetwork::Classification, &other).unwrap();
        assert_eq!(store.weights(), &[0.0, 0.0, 9.0, 10.0]);
    }

    #[test]
    fn test_copy_from_size_mismatch() {
        let mut store = ParameterStore::zeros(2, 2);
        let other = ParameterStore::zeros(3, 2);
        assert!(matches!(
            store.copy_from(SubNetwork::Proposal, &other),
            Err(TrainError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_frozen_copy_is_independent() {
        let mut store = ParameterStore::new(vec![1.0, 2.0], vec![3.0]);
        let frozen = store.freeze_proposal();
        store.slice_mut(SubNetwork::Proposal)[0] = 100.0;

        let view = store.view(Some(&frozen));
        assert_eq!(view.proposal_weights(), &[1.0, 2.0]);
        assert!(view.is_proposal_frozen());

        let live = store.view(None);
        assert_eq!(live.proposal_weights(), &[100.0, 2.0]);
    }
}
