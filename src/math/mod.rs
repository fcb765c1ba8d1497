pub mod matrix;
pub mod linalg;
