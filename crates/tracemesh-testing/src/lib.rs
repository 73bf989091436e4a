//! Testing infrastructure for tracemesh integration tests: an in-memory [`FakeStreamClient`]
//! standing in for Redis Streams, plus event fixtures for the pipeline's scenario tests.

pub mod fake_stream;
pub mod fixtures;

pub use fake_stream::FakeStreamClient;
