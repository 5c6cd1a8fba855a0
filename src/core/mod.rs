pub mod clusterer;
pub mod color;
pub mod engine;
pub mod extractor;
pub mod histogram;
pub mod models;
pub mod namer;
pub mod similarity;

#[cfg(test)]
pub(crate) mod fixtures;
