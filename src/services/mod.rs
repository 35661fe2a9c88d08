//! Pipeline services: the batch driver and the pieces it composes.

pub mod batch;
pub mod capabilities;
pub mod enumerator;
pub mod fetch_cache;
pub mod metadata_gate;
pub mod pool;
pub mod retry;
pub mod storage_service;
pub mod transform;
pub mod upstream;
pub mod workflow;

#[cfg(test)]
pub mod testing;
