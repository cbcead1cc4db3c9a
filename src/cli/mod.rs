//! CLI command handling

pub mod filters;
pub mod output;
pub mod run;

pub use filters::*;
pub use output::*;
pub use run::*;
