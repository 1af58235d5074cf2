//! Optimizers consuming the gradient engine's per-variable gradients

mod adam;
mod optimizer;
mod rmsprop;
mod sgd;

pub use adam::Adam;
pub use optimizer::Optimizer;
pub use rmsprop::RMSProp;
pub use sgd::SGD;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimSpec {
    /// Optimizer name: "adam" | "rmsprop" | "sgd"
    pub name: String,

    /// Learning rate
    pub lr: f32,

    /// Optimizer-specific parameters (beta1, beta2, momentum, etc.)
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Build optimizer from configuration
pub fn build_optimizer(spec: &OptimSpec) -> Result<Box<dyn Optimizer>> {
    let param = |key: &str, default: f64| {
        spec.params
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default) as f32
    };

    match spec.name.to_lowercase().as_str() {
        "sgd" => Ok(Box::new(SGD::new(spec.lr, param("momentum", 0.0)))),
        "adam" => Ok(Box::new(Adam::new(
            spec.lr,
            param("beta1", 0.9),
            param("beta2", 0.999),
            param("eps", 1e-8),
        ))),
        "rmsprop" => Ok(Box::new(RMSProp::new(
            spec.lr,
            param("decay", 0.9),
            param("eps", 1e-8),
        ))),
        name => Err(Error::InvalidParameter(format!(
            "Unknown optimizer: {}. Supported: sgd, adam, rmsprop",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_optimizer_from_spec() {
        let spec: OptimSpec =
            serde_json::from_str(r#"{"name": "adam", "lr": 0.001, "beta1": 0.85}"#).unwrap();
        let optimizer = build_optimizer(&spec).unwrap();
        assert!((optimizer.lr() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_build_optimizer_unknown_name() {
        let spec = OptimSpec {
            name: "adagrad".to_string(),
            lr: 0.01,
            params: HashMap::new(),
        };
        assert!(build_optimizer(&spec).is_err());
    }
}
