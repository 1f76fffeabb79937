//! # `ResMCS` Errors

use thiserror::Error;

/// Configuration and input errors for the `ResMCS` backbone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResMcsError {
    /// The backbone has no stages.
    #[error("ResMCS requires at least one stage")]
    NoStages,

    /// A per-stage list has the wrong length.
    #[error("{name} has {actual} entries, expected one per stage ({expected})")]
    StageCountMismatch {
        /// The mismatched field.
        name: &'static str,
        /// The stage count.
        expected: usize,
        /// The field length.
        actual: usize,
    },

    /// The input channel count is zero.
    #[error("d_input must be non-zero")]
    ZeroInputChannels,

    /// A per-stage size is zero.
    #[error("stage {stage}: {name} must be non-zero")]
    ZeroStageParam {
        /// The stage index.
        stage: usize,
        /// The zero field.
        name: &'static str,
    },

    /// A stage's embedding is not divisible by its head count.
    #[error("stage {stage}: embed dim {d_embed} is not divisible by num_heads {num_heads}")]
    HeadsDoNotDivide {
        /// The stage index.
        stage: usize,
        /// The stage embedding dim.
        d_embed: usize,
        /// The stage head count.
        num_heads: usize,
    },

    /// The stem output dim must be even.
    #[error("stage 0 embed dim must be even for the conv stem: {0}")]
    OddStemDim(usize),

    /// An output index names no stage.
    #[error("out index {index} is out of range for {num_stages} stages")]
    OutIndexOutOfRange {
        /// The bad index.
        index: usize,
        /// The stage count.
        num_stages: usize,
    },

    /// An output index appears more than once.
    #[error("out index {0} is repeated")]
    DuplicateOutIndex(usize),

    /// The drop path rate is not in ``[0, 1)``.
    #[error("drop_path_rate must be in [0.0, 1.0): {0}")]
    InvalidDropPathRate(f64),

    /// The MLP ratio does not yield a usable hidden size.
    #[error("mlp_ratio must be positive: {0}")]
    InvalidMlpRatio(f64),

    /// The input multiple, ``lcm_i(4 * 2^i * sr_i)``, does not fit in `usize`.
    #[error("stage {stage}: input multiple overflows usize")]
    InputMultipleOverflow {
        /// The first stage whose term overflows.
        stage: usize,
    },

    /// The input grid is not a multiple of the backbone's input multiple.
    #[error("input resolution {resolution:?} must be a non-zero multiple of {multiple}")]
    InvalidInputResolution {
        /// The input ``[H, W]``.
        resolution: [usize; 2],
        /// The required multiple.
        multiple: usize,
    },

    /// The input has the wrong channel count.
    #[error("expected {expected} input channels, got {actual}")]
    InputChannelMismatch {
        /// The configured channel count.
        expected: usize,
        /// The input channel count.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ResMcsError::StageCountMismatch {
                name: "depths",
                expected: 4,
                actual: 3
            }
            .to_string(),
            "depths has 3 entries, expected one per stage (4)"
        );
        assert_eq!(
            ResMcsError::HeadsDoNotDivide {
                stage: 1,
                d_embed: 10,
                num_heads: 3
            }
            .to_string(),
            "stage 1: embed dim 10 is not divisible by num_heads 3"
        );
        assert_eq!(
            ResMcsError::InvalidInputResolution {
                resolution: [224, 100],
                multiple: 32
            }
            .to_string(),
            "input resolution [224, 100] must be a non-zero multiple of 32"
        );
        assert_eq!(
            ResMcsError::InputMultipleOverflow { stage: 2 }.to_string(),
            "stage 2: input multiple overflows usize"
        );
        assert_eq!(
            ResMcsError::ZeroInputChannels.to_string(),
            "d_input must be non-zero"
        );
    }
}
