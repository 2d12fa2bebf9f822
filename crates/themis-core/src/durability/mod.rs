//! Event durability: bounded in-memory buffering with health-gated
//! write-through to a durable backend.

mod coordinator;
mod queue;

pub use coordinator::BusPersistence;
pub use queue::EventQueue;

#[cfg(test)]
mod tests;
