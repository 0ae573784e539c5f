pub mod common;
pub mod configuration;
pub mod directory;
pub mod instance;
pub mod parameter;
pub mod template;

pub use common::*;
pub use configuration::*;
pub use directory::*;
pub use instance::*;
pub use parameter::*;
pub use template::*;
