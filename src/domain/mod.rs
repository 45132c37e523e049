pub mod builder;
pub mod element;
pub mod fitter;
pub mod graph;
pub mod index;
pub mod intervention;
pub mod mechanism;
pub mod paths;
pub mod record;
pub(crate) mod regression;
pub mod scm;
pub mod stats;
pub mod store;
pub mod trace;
pub mod value;
