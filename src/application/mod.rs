//! Application services layer: staging, session pooling, and the render
//! pipeline, independent of the wire protocol underneath.

pub mod bridge;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod session;
pub mod staging;
