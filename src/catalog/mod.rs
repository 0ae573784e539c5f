pub mod directory;
pub mod release;

pub use directory::{build_tree, ConfigurationPath, DirectoryManager};
pub use release::{build_catalog, TemplateCatalog};
