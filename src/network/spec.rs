use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::ConfigError;
use crate::network::network::Network;

/// Static registry of the architectures the model factory can build.
///
/// Every architecture ends in a Softmax layer and is trained with
/// cross-entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// input → classes
    Logistic,
    /// input → 64 ReLU → classes
    Mlp,
    /// input → 256 ReLU → classes
    MlpWide,
    /// input → 128 ReLU → 64 Tanh → classes
    MlpDeep,
}

impl Architecture {
    pub const NAMES: [&'static str; 4] = ["logistic", "mlp", "mlp_wide", "mlp_deep"];

    pub fn name(self) -> &'static str {
        match self {
            Architecture::Logistic => "logistic",
            Architecture::Mlp => "mlp",
            Architecture::MlpWide => "mlp_wide",
            Architecture::MlpDeep => "mlp_deep",
        }
    }

    /// Layer tuples `(size, input_size, activation)` for the given shape.
    pub fn layers(self, input_size: usize, n_classes: usize) -> Vec<(usize, usize, ActivationFunction)> {
        use ActivationFunction::*;
        match self {
            Architecture::Logistic => vec![(n_classes, input_size, Softmax)],
            Architecture::Mlp => vec![(64, input_size, ReLU), (n_classes, 64, Softmax)],
            Architecture::MlpWide => vec![(256, input_size, ReLU), (n_classes, 256, Softmax)],
            Architecture::MlpDeep => vec![
                (128, input_size, ReLU),
                (64, 128, Tanh),
                (n_classes, 64, Softmax),
            ],
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logistic" => Ok(Architecture::Logistic),
            "mlp" => Ok(Architecture::Mlp),
            "mlp_wide" => Ok(Architecture::MlpWide),
            "mlp_deep" => Ok(Architecture::MlpDeep),
            other => Err(ConfigError::unknown("model", other, &Architecture::NAMES)),
        }
    }
}

/// A fully serializable description of a network: which architecture, and the
/// input/output dimensions it was instantiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub architecture: Architecture,
    pub input_size: usize,
    pub n_classes: usize,
}

impl NetworkSpec {
    pub fn new(architecture: Architecture, input_size: usize, n_classes: usize) -> Self {
        NetworkSpec { architecture, input_size, n_classes }
    }

    /// Freshly initialised network for this spec.
    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Network {
        Network::new(self.architecture.layers(self.input_size, self.n_classes), rng)
    }

    /// True when `network` has the layer shapes this spec would build.
    pub fn matches(&self, network: &Network) -> bool {
        let expected = self.architecture.layers(self.input_size, self.n_classes);
        network.layers.len() == expected.len()
            && network.layers.iter().zip(&expected).all(|(layer, (size, input, act))| {
                layer.size == *size && layer.input_size() == *input && layer.activator == *act
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn unknown_architecture_is_rejected_with_the_allowed_set() {
        let err = "resnet18".parse::<Architecture>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("resnet18"));
        assert!(msg.contains("mlp_deep"));
    }

    #[test]
    fn names_round_trip() {
        for name in Architecture::NAMES {
            assert_eq!(name.parse::<Architecture>().unwrap().name(), name);
        }
    }

    #[test]
    fn built_network_matches_its_spec() {
        let spec = NetworkSpec::new(Architecture::MlpDeep, 8, 4);
        let net = spec.build(&mut ChaCha8Rng::seed_from_u64(0));
        assert!(spec.matches(&net));
        assert_eq!(net.param_count(), 8 * 128 + 128 + 128 * 64 + 64 + 64 * 4 + 4);
        assert!(!NetworkSpec::new(Architecture::Mlp, 8, 4).matches(&net));
    }
}
