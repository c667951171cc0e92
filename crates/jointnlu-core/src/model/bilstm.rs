//! Single-layer bidirectional LSTM built from two candle LSTMs.

use candle_core::Tensor;
use candle_nn::rnn::{LSTMConfig, LSTM, RNN};
use candle_nn::VarBuilder;

use crate::error::Result;

pub struct BiLstm {
    forward: LSTM,
    backward: LSTM,
    hidden_size: usize,
}

impl BiLstm {
    pub fn new(in_dim: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let forward = candle_nn::lstm(in_dim, hidden_size, LSTMConfig::default(), vb.pp("forward"))?;
        let backward =
            candle_nn::lstm(in_dim, hidden_size, LSTMConfig::default(), vb.pp("backward"))?;
        Ok(Self {
            forward,
            backward,
            hidden_size,
        })
    }

    /// Width of the concatenated output.
    pub fn output_size(&self) -> usize {
        2 * self.hidden_size
    }

    /// `[batch, seq_len, in_dim]` -> `[batch, seq_len, 2 * hidden]`.
    ///
    /// Runs over every position, padding included; the backward pass reads the
    /// time-reversed sequence and its outputs are reversed back into place.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, seq_len, _) = xs.dims3()?;
        let reversed: Vec<u32> = (0..seq_len as u32).rev().collect();
        let reversed = Tensor::from_vec(reversed, seq_len, xs.device())?;

        let states = self.forward.seq(xs)?;
        let fwd = self.forward.states_to_tensor(&states)?;

        let xs_rev = xs.index_select(&reversed, 1)?;
        let states = self.backward.seq(&xs_rev)?;
        let bwd = self
            .backward
            .states_to_tensor(&states)?
            .index_select(&reversed, 1)?;

        Ok(Tensor::cat(&[&fwd, &bwd], 2)?)
    }
}
