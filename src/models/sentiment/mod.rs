use crate::Res;
use candle_core::Tensor;
use candle_nn::{Dropout, Linear, Module, VarBuilder};
use tracing::{event, Level};

mod config;
mod encoder;

pub use config::ClassifierConfig;
pub use encoder::{
    reverse_time, temporal_max, ConvEncoder, RecurrentEncoder, RecurrentState, TokenEmbedding,
};

/// Affine projection to `output_size` followed by a sigmoid squash.
pub struct ClassifierHead {
    fc: Linear,
    output_size: usize,
}

impl ClassifierHead {
    pub fn new(in_dim: usize, output_size: usize, vb: VarBuilder) -> Res<Self> {
        let fc = candle_nn::linear(in_dim, output_size, vb)?;
        Ok(Self { fc, output_size })
    }

    /// Project (batch, features) to probabilities and keep the trailing
    /// column, yielding a (batch,) vector.
    ///
    /// With `output_size > 1` this discards all but the last probability;
    /// the reference behavior only ever runs with `output_size = 1` and its
    /// take-last convention is kept unchanged here.
    pub fn forward(&self, xs: &Tensor) -> Res<Tensor> {
        let logits = self.fc.forward(xs)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        Ok(probs.narrow(1, self.output_size - 1, 1)?.squeeze(1)?)
    }
}

/// Recurrent variant: embedding, stacked unidirectional LSTM, max over
/// time, dropout, head.
pub struct SentimentLstm {
    embed: TokenEmbedding,
    encoder: RecurrentEncoder,
    dropout: Dropout,
    head: ClassifierHead,
}

impl SentimentLstm {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        cfg.validate()?;
        let embed = TokenEmbedding::new(cfg.vocab_size, cfg.embedding_dim, vb.pp("embedding"))?;
        let encoder = RecurrentEncoder::new(cfg.embedding_dim, cfg, false, vb.pp("lstm"))?;
        let head = ClassifierHead::new(encoder.output_dim(), cfg.output_size, vb.pp("fc"))?;

        event!(
            Level::DEBUG,
            vocab = cfg.vocab_size,
            hidden = cfg.hidden_dim,
            layers = cfg.n_layers,
            "built recurrent sentiment classifier"
        );

        Ok(Self {
            embed,
            encoder,
            dropout: Dropout::new(cfg.fc_drop_prob),
            head,
        })
    }

    /// Classify a (batch, time) id tensor; returns per-example probabilities
    /// and the encoder's terminal state.
    pub fn forward(&self, ids: &Tensor, train: bool) -> Res<(Tensor, RecurrentState)> {
        let embeds = self.embed.forward(ids)?;
        let (seq, state) = self.encoder.forward(&embeds, train)?;
        let pooled = temporal_max(&seq)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let probs = self.head.forward(&pooled)?;
        Ok((probs, state))
    }
}

/// Bidirectional variant; the head consumes twice the hidden width.
pub struct SentimentBiLstm {
    embed: TokenEmbedding,
    encoder: RecurrentEncoder,
    dropout: Dropout,
    head: ClassifierHead,
}

impl SentimentBiLstm {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        cfg.validate()?;
        let embed = TokenEmbedding::new(cfg.vocab_size, cfg.embedding_dim, vb.pp("embedding"))?;
        let encoder = RecurrentEncoder::new(cfg.embedding_dim, cfg, true, vb.pp("lstm"))?;
        let head = ClassifierHead::new(encoder.output_dim(), cfg.output_size, vb.pp("fc"))?;

        event!(
            Level::DEBUG,
            vocab = cfg.vocab_size,
            hidden = cfg.hidden_dim,
            layers = cfg.n_layers,
            "built bidirectional sentiment classifier"
        );

        Ok(Self {
            embed,
            encoder,
            dropout: Dropout::new(cfg.fc_drop_prob),
            head,
        })
    }

    pub fn forward(&self, ids: &Tensor, train: bool) -> Res<(Tensor, RecurrentState)> {
        let embeds = self.embed.forward(ids)?;
        let (seq, state) = self.encoder.forward(&embeds, train)?;
        let pooled = temporal_max(&seq)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let probs = self.head.forward(&pooled)?;
        Ok((probs, state))
    }
}

/// Convolutional variant: purely feed-forward, no recurrent state.
pub struct SentimentCnn {
    embed: TokenEmbedding,
    encoder: ConvEncoder,
    head: ClassifierHead,
}

impl SentimentCnn {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        cfg.validate()?;
        let embed = TokenEmbedding::new(cfg.vocab_size, cfg.embedding_dim, vb.pp("embedding"))?;
        let encoder = ConvEncoder::new(cfg.embedding_dim, cfg, vb.pp("cnn"))?;
        let head = ClassifierHead::new(encoder.out_channels(), cfg.output_size, vb.pp("fc"))?;

        event!(
            Level::DEBUG,
            vocab = cfg.vocab_size,
            channels = ?cfg.conv_channels,
            "built convolutional sentiment classifier"
        );

        Ok(Self {
            embed,
            encoder,
            head,
        })
    }

    pub fn forward(&self, ids: &Tensor) -> Res<Tensor> {
        let embeds = self.embed.forward(ids)?;
        let seq = self.encoder.forward(&embeds)?;
        let pooled = temporal_max(&seq)?;
        self.head.forward(&pooled)
    }
}

/// Hybrid variant: the convolutional stages feed a unidirectional LSTM
/// whose input width is the final conv channel count.
pub struct SentimentCnnLstm {
    embed: TokenEmbedding,
    conv: ConvEncoder,
    recurrent: RecurrentEncoder,
    dropout: Dropout,
    head: ClassifierHead,
}

impl SentimentCnnLstm {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        cfg.validate()?;
        let embed = TokenEmbedding::new(cfg.vocab_size, cfg.embedding_dim, vb.pp("embedding"))?;
        let conv = ConvEncoder::new(cfg.embedding_dim, cfg, vb.pp("cnn"))?;
        let recurrent = RecurrentEncoder::new(conv.out_channels(), cfg, false, vb.pp("lstm"))?;
        let head = ClassifierHead::new(recurrent.output_dim(), cfg.output_size, vb.pp("fc"))?;

        event!(
            Level::DEBUG,
            vocab = cfg.vocab_size,
            channels = ?cfg.conv_channels,
            hidden = cfg.hidden_dim,
            layers = cfg.n_layers,
            "built hybrid sentiment classifier"
        );

        Ok(Self {
            embed,
            conv,
            recurrent,
            dropout: Dropout::new(cfg.fc_drop_prob),
            head,
        })
    }

    pub fn forward(&self, ids: &Tensor, train: bool) -> Res<(Tensor, RecurrentState)> {
        let embeds = self.embed.forward(ids)?;
        let seq = self.conv.forward(&embeds)?;
        let (seq, state) = self.recurrent.forward(&seq, train)?;
        let pooled = temporal_max(&seq)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let probs = self.head.forward(&pooled)?;
        Ok((probs, state))
    }
}

/// What a forward pass produces: per-example probabilities, plus the
/// terminal recurrent state for the variants that have one.
pub struct ClassifierOutput {
    pub probs: Tensor,
    pub state: Option<RecurrentState>,
}

/// The four model variants behind one sequence-to-probability interface.
/// The variant is fixed at construction time.
pub enum SentimentClassifier {
    Lstm(SentimentLstm),
    BiLstm(SentimentBiLstm),
    Cnn(SentimentCnn),
    CnnLstm(SentimentCnnLstm),
}

impl SentimentClassifier {
    pub fn lstm(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        Ok(Self::Lstm(SentimentLstm::new(cfg, vb)?))
    }

    pub fn bilstm(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        Ok(Self::BiLstm(SentimentBiLstm::new(cfg, vb)?))
    }

    pub fn cnn(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        Ok(Self::Cnn(SentimentCnn::new(cfg, vb)?))
    }

    pub fn cnn_lstm(cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        Ok(Self::CnnLstm(SentimentCnnLstm::new(cfg, vb)?))
    }

    pub fn forward(&self, ids: &Tensor, train: bool) -> Res<ClassifierOutput> {
        match self {
            Self::Lstm(m) => {
                let (probs, state) = m.forward(ids, train)?;
                Ok(ClassifierOutput {
                    probs,
                    state: Some(state),
                })
            }
            Self::BiLstm(m) => {
                let (probs, state) = m.forward(ids, train)?;
                Ok(ClassifierOutput {
                    probs,
                    state: Some(state),
                })
            }
            Self::Cnn(m) => Ok(ClassifierOutput {
                probs: m.forward(ids)?,
                state: None,
            }),
            Self::CnnLstm(m) => {
                let (probs, state) = m.forward(ids, train)?;
                Ok(ClassifierOutput {
                    probs,
                    state: Some(state),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::var_builder::{reseed, trainable};
    use candle_core::{DType, Device};

    fn cfg() -> ClassifierConfig {
        ClassifierConfig {
            vocab_size: 1000,
            embedding_dim: 8,
            hidden_dim: 16,
            ..ClassifierConfig::default()
        }
    }

    fn ids(batch: usize, time: usize, device: &Device) -> anyhow::Result<Tensor> {
        let v: Vec<i64> = (0..batch * time).map(|i| (i * 37 % 1000) as i64).collect();
        Ok(Tensor::from_vec(v, (batch, time), device)?)
    }

    #[test]
    fn recurrent_end_to_end() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentLstm::new(&cfg(), vb)?;

        let (probs, state) = model.forward(&ids(2, 10, &device)?, false)?;
        assert_eq!(probs.dims(), &[2]);
        for p in probs.to_vec1::<f32>()? {
            assert!(p > 0.0 && p < 1.0, "probability {p} not in (0, 1)");
        }
        assert_eq!(state.h.dims(), &[1, 2, 16]);
        assert_eq!(state.c.dims(), &[1, 2, 16]);
        Ok(())
    }

    #[test]
    fn bidirectional_terminal_state_has_both_directions() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentBiLstm::new(&cfg(), vb)?;

        let (probs, state) = model.forward(&ids(2, 10, &device)?, false)?;
        assert_eq!(probs.dims(), &[2]);
        assert_eq!(state.h.dims(), &[2, 2, 16]);
        Ok(())
    }

    #[test]
    fn convolutional_returns_probability_vector() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentCnn::new(&cfg(), vb)?;

        let probs = model.forward(&ids(2, 16, &device)?)?;
        assert_eq!(probs.dims(), &[2]);
        for p in probs.to_vec1::<f32>()? {
            assert!(p > 0.0 && p < 1.0);
        }
        Ok(())
    }

    #[test]
    fn hybrid_returns_probabilities_and_state() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentCnnLstm::new(&cfg(), vb)?;

        let (probs, state) = model.forward(&ids(2, 16, &device)?, false)?;
        assert_eq!(probs.dims(), &[2]);
        assert_eq!(state.h.dims(), &[1, 2, 16]);
        Ok(())
    }

    #[test]
    fn short_input_is_degenerate_for_conv_and_hybrid() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let short = ids(2, 3, &device)?;

        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentClassifier::cnn(&cfg(), vb)?;
        assert!(matches!(
            model.forward(&short, false),
            Err(ModelError::DegenerateInput { time: 3, .. })
        ));

        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentClassifier::cnn_lstm(&cfg(), vb)?;
        assert!(matches!(
            model.forward(&short, false),
            Err(ModelError::DegenerateInput { time: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn variant_selection_reports_state_presence() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let batch = ids(2, 16, &device)?;

        let (_vm, vb) = trainable(DType::F32, &device);
        let out = SentimentClassifier::lstm(&cfg(), vb)?.forward(&batch, false)?;
        assert!(out.state.is_some());

        let (_vm, vb) = trainable(DType::F32, &device);
        let out = SentimentClassifier::cnn(&cfg(), vb)?.forward(&batch, false)?;
        assert!(out.state.is_none());
        Ok(())
    }

    #[test]
    fn construction_rejects_invalid_config() {
        let device = Device::Cpu;
        let (_vm, vb) = trainable(DType::F32, &device);
        let mut bad = cfg();
        bad.hidden_dim = 0;
        assert!(matches!(
            SentimentLstm::new(&bad, vb),
            Err(ModelError::Config(_))
        ));
    }

    #[test]
    fn seeded_models_are_bit_identical() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let batch = ids(2, 10, &device)?;

        let run = |seed: u64| -> anyhow::Result<Vec<f32>> {
            let (vm, vb) = trainable(DType::F32, &device);
            let model = SentimentLstm::new(&cfg(), vb)?;
            reseed(&vm, seed)?;
            let (probs, _state) = model.forward(&batch, false)?;
            Ok(probs.to_vec1::<f32>()?)
        };

        // Same seed, same weights, same input: bit-identical outputs.
        assert_eq!(run(0)?, run(0)?);
        assert_ne!(run(0)?, run(1)?);
        Ok(())
    }

    #[test]
    fn repeated_eval_forwards_are_deterministic() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (_vm, vb) = trainable(DType::F32, &device);
        let model = SentimentBiLstm::new(&cfg(), vb)?;

        let batch = ids(3, 12, &device)?;
        let (a, _) = model.forward(&batch, false)?;
        let (b, _) = model.forward(&batch, false)?;
        assert_eq!(a.to_vec1::<f32>()?, b.to_vec1::<f32>()?);
        Ok(())
    }
}
