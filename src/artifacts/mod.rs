pub mod annotate;
pub mod store;
