pub mod objectives;

pub use objectives::{fisher_matrix, restrict, Objective};
