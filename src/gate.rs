//! Mask sanity check driving backend retries

use crate::{types::Mask, utils::imaging};
use serde::{Deserialize, Serialize};

/// Acceptance bounds for [`QualityGate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    /// Coverage must be strictly above this
    pub min_coverage: f32,
    /// Coverage must be strictly below this
    pub max_coverage: f32,
    /// Canny edge density must be strictly above this
    pub min_edge_density: f32,
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_coverage: 0.05,
            max_coverage: 0.95,
            min_edge_density: 0.001,
            canny_low: 50.0,
            canny_high: 150.0,
        }
    }
}

/// Why a mask was rejected
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum GateRejection {
    CoverageTooLow { coverage: f32 },
    CoverageTooHigh { coverage: f32 },
    TooFewEdges { edge_density: f32 },
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoverageTooLow { coverage } => write!(f, "coverage {:.3} too low", coverage),
            Self::CoverageTooHigh { coverage } => write!(f, "coverage {:.3} too high", coverage),
            Self::TooFewEdges { edge_density } => {
                write!(f, "edge density {:.4} too low", edge_density)
            },
        }
    }
}

/// Outcome of one gate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub coverage: f32,
    pub edge_density: f32,
    pub rejections: Vec<GateRejection>,
}

impl GateVerdict {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.rejections.is_empty()
    }

    /// Rejection reasons joined for logging
    #[must_use]
    pub fn reasons(&self) -> String {
        self.rejections
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    thresholds: GateThresholds,
}

impl QualityGate {
    #[must_use]
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate coverage and edge density of a mask
    #[must_use]
    pub fn evaluate(&self, mask: &Mask) -> GateVerdict {
        let t = &self.thresholds;
        let coverage = mask.coverage();
        let edges = imaging::canny(mask.as_gray(), t.canny_low, t.canny_high);
        let edge_density = imaging::nonzero_fraction(&edges);

        let mut rejections = Vec::new();
        if coverage <= t.min_coverage {
            rejections.push(GateRejection::CoverageTooLow { coverage });
        } else if coverage >= t.max_coverage {
            rejections.push(GateRejection::CoverageTooHigh { coverage });
        }
        if edge_density <= t.min_edge_density {
            rejections.push(GateRejection::TooFewEdges { edge_density });
        }

        let verdict = GateVerdict {
            coverage,
            edge_density,
            rejections,
        };
        if !verdict.passed() {
            log::debug!("Quality gate rejected mask: {}", verdict.reasons());
        }
        verdict
    }

    #[must_use]
    pub fn passes(&self, mask: &Mask) -> bool {
        self.evaluate(mask).passed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(size: u32, start: u32, end: u32) -> Mask {
        Mask::from_fn(size, size, |x, y| {
            if (start..end).contains(&x) && (start..end).contains(&y) {
                255
            } else {
                0
            }
        })
    }

    #[test]
    fn test_centered_square_passes() {
        let gate = QualityGate::default();
        let verdict = gate.evaluate(&square_mask(100, 25, 75));
        assert!(verdict.passed(), "{}", verdict.reasons());
        assert!((verdict.coverage - 0.25).abs() < 1e-6);
        assert!(verdict.edge_density > 0.001);
    }

    #[test]
    fn test_empty_mask_rejected() {
        let gate = QualityGate::default();
        let verdict = gate.evaluate(&Mask::new(100, 100));
        assert!(!verdict.passed());
        assert!(verdict
            .rejections
            .iter()
            .any(|r| matches!(r, GateRejection::CoverageTooLow { .. })));
        assert!(verdict
            .rejections
            .iter()
            .any(|r| matches!(r, GateRejection::TooFewEdges { .. })));
    }

    #[test]
    fn test_full_mask_rejected() {
        let gate = QualityGate::default();
        assert!(!gate.passes(&Mask::filled(100, 100, 255)));
    }

    #[test]
    fn test_edge_density_threshold_configurable() {
        let gate = QualityGate::new(GateThresholds {
            min_edge_density: 0.5,
            ..GateThresholds::default()
        });
        assert!(!gate.passes(&square_mask(100, 25, 75)));
    }
}
