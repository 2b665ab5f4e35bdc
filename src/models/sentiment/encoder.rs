use crate::Res;
use crate::error::ModelError;
use crate::models::sentiment::config::ClassifierConfig;
use candle_core::{DType, Tensor};
use candle_nn::rnn::{lstm, LSTM, LSTMConfig, LSTMState, RNN};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, Embedding, Module, VarBuilder};

/// Bounds-checked token id lookup.
pub struct TokenEmbedding {
    embed: Embedding,
    vocab_size: usize,
}

impl TokenEmbedding {
    pub fn new(vocab_size: usize, embedding_dim: usize, vb: VarBuilder) -> Res<Self> {
        let embed = candle_nn::embedding(vocab_size, embedding_dim, vb)?;
        Ok(Self { embed, vocab_size })
    }

    /// Map a (batch, time) integer tensor to (batch, time, embedding_dim).
    ///
    /// Any id outside `[0, vocab_size)` is fatal; ids are normalized to i64
    /// before the table lookup.
    pub fn forward(&self, ids: &Tensor) -> Res<Tensor> {
        let (b, t) = ids.dims2().map_err(|_| ModelError::Shape {
            expected: "(batch, time) token ids".into(),
            got: format!("{:?}", ids.shape()),
        })?;
        if b == 0 || t == 0 {
            return Err(ModelError::Shape {
                expected: "non-empty batch and time axes".into(),
                got: format!("({b}, {t})"),
            });
        }
        match ids.dtype() {
            DType::U8 | DType::U32 | DType::I64 => {}
            other => {
                return Err(ModelError::Shape {
                    expected: "integer token ids".into(),
                    got: format!("{other:?}"),
                });
            }
        }

        let ids = ids.to_dtype(DType::I64)?;
        let min = ids.min_all()?.to_scalar::<i64>()?;
        if min < 0 {
            return Err(ModelError::OutOfRange {
                id: min,
                vocab_size: self.vocab_size,
            });
        }
        let max = ids.max_all()?.to_scalar::<i64>()?;
        if max >= self.vocab_size as i64 {
            return Err(ModelError::OutOfRange {
                id: max,
                vocab_size: self.vocab_size,
            });
        }

        Ok(self.embed.forward(&ids)?)
    }
}

/// Terminal (hidden, cell) state of a recurrent encoder, both of shape
/// (n_layers * directions, batch, hidden_dim).
#[derive(Clone, Debug)]
pub struct RecurrentState {
    pub h: Tensor,
    pub c: Tensor,
}

/// Stacked gated-memory recurrent encoder, unidirectional or bidirectional.
///
/// State is zero-initialized freshly on every forward call; nothing is
/// carried between invocations.
pub struct RecurrentEncoder {
    fwd: Vec<LSTM>,
    bwd: Vec<LSTM>,
    dropout: Dropout,
    hidden_dim: usize,
}

impl RecurrentEncoder {
    pub fn new(
        input_dim: usize,
        cfg: &ClassifierConfig,
        bidirectional: bool,
        vb: VarBuilder,
    ) -> Res<Self> {
        let dirs = if bidirectional { 2 } else { 1 };
        let mut fwd = Vec::with_capacity(cfg.n_layers);
        let mut bwd = Vec::new();

        for i in 0..cfg.n_layers {
            // Layers above the first consume the previous layer's features.
            let in_dim = if i == 0 { input_dim } else { cfg.hidden_dim * dirs };
            let layer_cfg = LSTMConfig {
                layer_idx: i,
                ..Default::default()
            };
            fwd.push(lstm(in_dim, cfg.hidden_dim, layer_cfg, vb.clone())?);

            if bidirectional {
                let layer_cfg = LSTMConfig {
                    layer_idx: i,
                    ..Default::default()
                };
                bwd.push(lstm(in_dim, cfg.hidden_dim, layer_cfg, vb.pp("reverse"))?);
            }
        }

        Ok(Self {
            fwd,
            bwd,
            dropout: Dropout::new(cfg.drop_prob),
            hidden_dim: cfg.hidden_dim,
        })
    }

    /// Feature width of the output sequence.
    pub fn output_dim(&self) -> usize {
        if self.bwd.is_empty() {
            self.hidden_dim
        } else {
            self.hidden_dim * 2
        }
    }

    /// Encode (batch, time, features) into (batch, time, hidden * dirs) plus
    /// the terminal state.
    ///
    /// Inter-layer dropout only applies between stacked layers, so it is a
    /// no-op for a single layer, and is disabled when `train` is false.
    pub fn forward(&self, xs: &Tensor, train: bool) -> Res<(Tensor, RecurrentState)> {
        let (b, _t, _f) = xs.dims3().map_err(|_| ModelError::Shape {
            expected: "(batch, time, features) sequence".into(),
            got: format!("{:?}", xs.shape()),
        })?;

        let mut x = xs.clone();
        let mut hs = Vec::new();
        let mut cs = Vec::new();
        let n_layers = self.fwd.len();

        for i in 0..n_layers {
            let init = self.fwd[i].zero_state(b)?;
            let states = self.fwd[i].seq_init(&x, &init)?;
            let out = stack_step_outputs(&states)?;
            let last = terminal(&states)?;
            hs.push(last.h().clone());
            cs.push(last.c().clone());

            let layer_out = match self.bwd.get(i) {
                Some(bwd) => {
                    let rev = reverse_time(&x)?;
                    let init = bwd.zero_state(b)?;
                    let states = bwd.seq_init(&rev, &init)?;
                    let back = reverse_time(&stack_step_outputs(&states)?)?;
                    let last = terminal(&states)?;
                    hs.push(last.h().clone());
                    cs.push(last.c().clone());
                    Tensor::cat(&[&out, &back], 2)?
                }
                None => out,
            };

            x = if i + 1 < n_layers {
                self.dropout.forward(&layer_out, train)?
            } else {
                layer_out
            };
        }

        let state = RecurrentState {
            h: Tensor::stack(&hs, 0)?,
            c: Tensor::stack(&cs, 0)?,
        };

        Ok((x, state))
    }
}

fn stack_step_outputs(states: &[LSTMState]) -> Res<Tensor> {
    let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
    Ok(Tensor::stack(&hs, 1)?)
}

fn terminal(states: &[LSTMState]) -> Res<&LSTMState> {
    states.last().ok_or_else(|| ModelError::Shape {
        expected: "at least one time step".into(),
        got: "empty sequence".into(),
    })
}

/// Reverse a (batch, time, features) tensor along the time axis.
pub fn reverse_time(xs: &Tensor) -> Res<Tensor> {
    let t = xs.dim(1)?;
    let idx: Vec<u32> = (0..t as u32).rev().collect();
    let idx = Tensor::new(idx.as_slice(), xs.device())?;
    Ok(xs.index_select(&idx, 1)?)
}

/// Stacked 1-D convolution encoder over the embedded sequence.
///
/// Each stage is conv (same padding) + ReLU; every stage except the last is
/// followed by a max-pool that divides the time length by `pool_stride`.
pub struct ConvEncoder {
    convs: Vec<Conv1d>,
    pool_stride: usize,
    min_time: usize,
    out_channels: usize,
}

impl ConvEncoder {
    pub fn new(input_dim: usize, cfg: &ClassifierConfig, vb: VarBuilder) -> Res<Self> {
        let vb = vb.pp("conv");
        let mut convs = Vec::with_capacity(cfg.conv_channels.len());
        let mut in_c = input_dim;
        for (i, &out_c) in cfg.conv_channels.iter().enumerate() {
            let conv_cfg = Conv1dConfig {
                padding: cfg.same_padding(),
                ..Default::default()
            };
            convs.push(candle_nn::conv1d(
                in_c,
                out_c,
                cfg.kernel_size,
                conv_cfg,
                vb.pp(i),
            )?);
            in_c = out_c;
        }

        let pools = cfg.conv_channels.len() - 1;
        Ok(Self {
            convs,
            pool_stride: cfg.pool_stride,
            min_time: cfg.pool_stride.pow(pools as u32),
            out_channels: in_c,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Shortest input the pooling stages can reduce to one time step.
    pub fn min_time(&self) -> usize {
        self.min_time
    }

    /// Encode (batch, time, features) into (batch, time', out_channels) with
    /// time' = time divided (flooring) by pool_stride per pooled stage.
    pub fn forward(&self, xs: &Tensor) -> Res<Tensor> {
        let (_b, t, _f) = xs.dims3().map_err(|_| ModelError::Shape {
            expected: "(batch, time, features) sequence".into(),
            got: format!("{:?}", xs.shape()),
        })?;
        if t < self.min_time {
            return Err(ModelError::DegenerateInput {
                time: t,
                min_time: self.min_time,
            });
        }

        // Conv1d wants channel-first.
        let mut x = xs.transpose(1, 2)?.contiguous()?;
        let n = self.convs.len();
        for (i, conv) in self.convs.iter().enumerate() {
            x = conv.forward(&x)?.relu()?;
            if i + 1 < n {
                x = max_pool1d(&x, self.pool_stride)?;
            }
        }

        Ok(x.transpose(1, 2)?.contiguous()?)
    }
}

fn max_pool1d(x: &Tensor, stride: usize) -> Res<Tensor> {
    let (b, c, t) = x.dims3()?;
    let pooled = x
        .reshape((b, c, 1, t))?
        .max_pool2d((1, stride))?
        .reshape((b, c, t / stride))?;
    Ok(pooled)
}

/// Collapse (batch, time, features) to (batch, features) by element-wise
/// maximum over the time axis.
pub fn temporal_max(xs: &Tensor) -> Res<Tensor> {
    let (_b, t, _f) = xs.dims3().map_err(|_| ModelError::Shape {
        expected: "(batch, time, features) sequence".into(),
        got: format!("{:?}", xs.shape()),
    })?;
    if t == 0 {
        return Err(ModelError::Shape {
            expected: "non-empty time axis".into(),
            got: "0 time steps".into(),
        });
    }
    Ok(xs.max(1)?)
}
