pub mod engine;

pub use engine::{MemoryBroker, PeerId};

#[cfg(test)]
mod tests;
