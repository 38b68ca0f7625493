pub mod catalog;

pub use catalog::{ModelCatalog, ProviderModel};
