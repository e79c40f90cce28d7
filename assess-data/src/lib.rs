mod loader;

pub use loader::{CatalogLoader, CatalogLoaderError};
