//! Transport layer.
//!
//! - HTTP/1.x response head parsing
//! - HTTP/2 flow-control credit and push aggregation
//! - Connector/connection capability traits used by the pool

pub mod connector;
pub mod h1;
pub mod h2;
