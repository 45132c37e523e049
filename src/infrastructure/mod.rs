// Infrastructure implementations for lift-causal.

pub mod concurrency;
pub mod extractor;
pub mod project_loader;

pub use extractor::SynElementExtractor;
pub use project_loader::ProjectLoader;
