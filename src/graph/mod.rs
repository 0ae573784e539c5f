pub mod digest;
pub mod loader;
pub mod persister;

pub use digest::{graph_digests, instance_digest, pset_digest, GraphDigests};
pub use loader::GraphLoader;
pub use persister::{GraphPersister, SaveRequest};
