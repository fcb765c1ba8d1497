pub mod metadata;
pub mod network;
pub mod spec;

pub use metadata::{ModelMetadata, TrainingRecipe};
pub use network::Network;
pub use spec::{Architecture, NetworkSpec};
