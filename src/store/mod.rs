pub mod memory;
pub mod postgres;
pub mod release_cache;
pub mod rows;
pub mod traits;

pub use memory::*;
pub use postgres::*;
pub use release_cache::*;
pub use traits::*;
