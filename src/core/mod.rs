//! Core primitives.
//!
//! Small building blocks shared by generation and gameplay. The RNG is the
//! only source of randomness in the generator, so a world can be rebuilt
//! bit-for-bit from its seed.

pub mod rng;
pub mod vec2;

// Re-export core types
pub use rng::{derive_world_seed, DeterministicRng};
pub use vec2::Vec2;
