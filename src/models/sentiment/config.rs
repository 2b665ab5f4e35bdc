use crate::Res;
use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// Configuration shared by the sentiment classifier family.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Vocabulary size of the embedding table
    pub vocab_size: usize,
    /// Embedding width
    pub embedding_dim: usize,
    /// Hidden width of the recurrent encoder
    pub hidden_dim: usize,
    /// Number of stacked recurrent layers
    pub n_layers: usize,
    /// Output width of the classification head
    pub output_size: usize,
    /// Dropout between stacked recurrent layers
    pub drop_prob: f32,
    /// Dropout between temporal reduction and the head
    pub fc_drop_prob: f32,
    /// Channel schedule of the convolutional encoder
    pub conv_channels: Vec<usize>,
    /// Convolution kernel width (odd, "same" padding)
    pub kernel_size: usize,
    /// Max-pool window and stride after each conv stage but the last
    pub pool_stride: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            vocab_size: 0,
            embedding_dim: 0,
            hidden_dim: 0,
            n_layers: 1,
            output_size: 1,
            drop_prob: 0.5,
            fc_drop_prob: 0.3,
            conv_channels: vec![32, 64, 128],
            kernel_size: 3,
            pool_stride: 2,
        }
    }
}

impl ClassifierConfig {
    /// Check the hyperparameter invariants. Every variant constructor calls
    /// this before creating any layer.
    pub fn validate(&self) -> Res<()> {
        if self.vocab_size == 0 {
            return Err(ModelError::Config("vocab_size must be positive".into()));
        }
        if self.embedding_dim == 0 {
            return Err(ModelError::Config("embedding_dim must be positive".into()));
        }
        if self.hidden_dim == 0 {
            return Err(ModelError::Config("hidden_dim must be positive".into()));
        }
        if self.n_layers == 0 {
            return Err(ModelError::Config("n_layers must be positive".into()));
        }
        if self.output_size == 0 {
            return Err(ModelError::Config("output_size must be at least 1".into()));
        }
        for (name, p) in [("drop_prob", self.drop_prob), ("fc_drop_prob", self.fc_drop_prob)] {
            if !(0.0..1.0).contains(&p) {
                return Err(ModelError::Config(format!(
                    "{name} must lie in [0, 1), got {p}"
                )));
            }
        }
        if self.conv_channels.is_empty() {
            return Err(ModelError::Config("conv_channels must not be empty".into()));
        }
        if self.conv_channels.iter().any(|&c| c == 0) {
            return Err(ModelError::Config("conv_channels must all be positive".into()));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(ModelError::Config(format!(
                "kernel_size must be odd for same padding, got {}",
                self.kernel_size
            )));
        }
        if self.pool_stride == 0 {
            return Err(ModelError::Config("pool_stride must be positive".into()));
        }

        Ok(())
    }

    /// Padding that preserves the time length for the configured kernel.
    pub fn same_padding(&self) -> usize {
        (self.kernel_size - 1) / 2
    }
}
