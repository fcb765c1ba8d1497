pub mod config;
pub mod controller;
pub mod foci;
pub mod ordering;
pub mod perturb;
pub mod pipeline;
pub mod record;

pub use config::{ApproxType, Device, FociType, HessType, Order, PerturbConfig, RunLabels, ScrubConfig, SelectionType};
pub use controller::{RunEnd, ScrubController, ScrubOutcome};
pub use foci::{codec, codec_conditional, foci, FociSelection};
pub use ordering::{Ordering, OrderingCursor};
pub use perturb::{InfluencePerturber, PerturbContext, Perturbation, Perturber};
pub use pipeline::{scrub_model, ScrubJob, ScrubReport};
pub use record::{RoundLog, RoundRecord};
