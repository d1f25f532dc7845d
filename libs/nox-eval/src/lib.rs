mod config;
mod error;
mod eval;
mod exec;
mod graph;
mod linearize;
mod literal;
mod node;
mod repr;
mod rewrite;
mod simplify;
mod ty;

pub use config::*;
pub use error::*;
pub use exec::*;
pub use graph::*;
pub use linearize::*;
pub use literal::*;
pub use node::*;
pub use rewrite::*;
pub use ty::*;

pub use ndarray;

#[cfg(test)]
mod tests;
