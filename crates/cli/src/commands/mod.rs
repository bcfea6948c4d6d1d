//! Command implementations.

mod generate;
mod inspect;
mod validate;

pub use generate::{load_config, run_generate};
pub use inspect::run_inspect;
pub use validate::run_validate;
