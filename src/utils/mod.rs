//! Internal helpers shared by the stateful components.

pub mod keyed;

pub use keyed::KeyedState;
