//! Wavefunction module - multi-determinant trial states and their integral caches.

mod half_rotation;
mod multi_slater;

pub use half_rotation::{HalfRotated, HalfRotatedChunk, RotatedDet};
pub use multi_slater::{Determinant, MixedState, MultiSlater};
