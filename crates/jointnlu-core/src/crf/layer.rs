//! Linear-chain CRF over per-token emission scores.
//!
//! The layer owns three learned tensors (start, end and pairwise transition
//! scores) and exposes two pure operations over them: scoring a gold path
//! and decoding the best path. Both respect a `[batch, seq_len]` mask whose
//! first column must be on.

use candle_core::{DType, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::crf::viterbi::ViterbiDecoder;
use crate::error::{NluError, Result};

/// CRF transition parameters plus a host-side Viterbi decoder.
pub struct Crf {
    num_tags: usize,
    start_transitions: Tensor,
    end_transitions: Tensor,
    /// `[from, to]`
    transitions: Tensor,
    decoder: ViterbiDecoder,
}

impl Crf {
    pub fn new(num_tags: usize, vb: VarBuilder) -> Result<Self> {
        if num_tags == 0 {
            return Err(NluError::Config("CRF needs at least one tag".into()));
        }
        let init = Init::Uniform { lo: -0.1, up: 0.1 };
        let start_transitions = vb.get_with_hints(num_tags, "start_transitions", init)?;
        let end_transitions = vb.get_with_hints(num_tags, "end_transitions", init)?;
        let transitions = vb.get_with_hints((num_tags, num_tags), "transitions", init)?;

        Ok(Self {
            num_tags,
            start_transitions,
            end_transitions,
            transitions,
            decoder: ViterbiDecoder::new(num_tags),
        })
    }

    /// Forbid transitions and first tags marked `false` during decoding
    /// (scoring is unaffected).
    pub fn with_constraints(mut self, allowed: Vec<Vec<bool>>, start: Vec<bool>) -> Result<Self> {
        if allowed.len() != self.num_tags {
            return Err(NluError::Config(format!(
                "constraint matrix covers {} tags, CRF has {}",
                allowed.len(),
                self.num_tags
            )));
        }
        self.decoder = ViterbiDecoder::with_constraints(allowed)?.with_start_constraints(start)?;
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn start_transitions(&self) -> &Tensor {
        &self.start_transitions
    }

    pub fn end_transitions(&self) -> &Tensor {
        &self.end_transitions
    }

    pub fn transitions(&self) -> &Tensor {
        &self.transitions
    }

    fn check_emissions(&self, emissions: &Tensor) -> Result<(usize, usize)> {
        let (batch, seq_len, num_tags) = emissions.dims3()?;
        if num_tags != self.num_tags {
            return Err(NluError::Config(format!(
                "expected last dimension of emissions to be {}, got {num_tags}",
                self.num_tags
            )));
        }
        Ok((batch, seq_len))
    }

    /// Log-likelihood of `tags` under the CRF, one value per example.
    ///
    /// * `emissions` - `[batch, seq_len, num_tags]`
    /// * `mask` - `[batch, seq_len]`, any numeric dtype, 1 for attended positions
    /// * `tags` - `[batch, seq_len]` gold tag ids
    pub fn log_likelihood(&self, emissions: &Tensor, mask: &Tensor, tags: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = self.check_emissions(emissions)?;
        if tags.dims2()? != (batch, seq_len) || mask.dims2()? != (batch, seq_len) {
            return Err(NluError::Config(
                "emissions, tags and mask must agree on [batch, seq_len]".into(),
            ));
        }

        let mask = mask.to_dtype(DType::F32)?;
        let tags = tags.to_dtype(DType::U32)?;
        let lengths = mask_lengths(&mask)?;

        let numerator = self.gold_score(emissions, &mask, &tags, &lengths)?;
        let denominator = self.partition(emissions, &mask)?;
        Ok((numerator - denominator)?)
    }

    fn gold_score(
        &self,
        emissions: &Tensor,
        mask: &Tensor,
        tags: &Tensor,
        lengths: &[usize],
    ) -> Result<Tensor> {
        let (batch, seq_len) = mask.dims2()?;
        let device = emissions.device();
        let tag_rows: Vec<Vec<u32>> = tags.to_vec2()?;

        let emitted = emissions
            .gather(&tags.unsqueeze(2)?.contiguous()?, 2)?
            .squeeze(2)?;
        let emitted = (emitted * mask)?.sum(1)?;

        let first: Vec<u32> = tag_rows.iter().map(|row| row[0]).collect();
        let last: Vec<u32> = tag_rows
            .iter()
            .zip(lengths)
            .map(|(row, &len)| row[len - 1])
            .collect();
        let start = self
            .start_transitions
            .index_select(&Tensor::new(first.as_slice(), device)?, 0)?;
        let end = self
            .end_transitions
            .index_select(&Tensor::new(last.as_slice(), device)?, 0)?;

        let mut score = ((emitted + start)? + end)?;

        if seq_len > 1 {
            let k = self.num_tags as u32;
            let pairs: Vec<u32> = tag_rows
                .iter()
                .flat_map(|row| row.windows(2).map(move |w| w[0] * k + w[1]))
                .collect();
            let pairs = Tensor::from_vec(pairs, batch * (seq_len - 1), device)?;
            let moved = self
                .transitions
                .flatten_all()?
                .index_select(&pairs, 0)?
                .reshape((batch, seq_len - 1))?;
            let moved = (moved * mask.narrow(1, 1, seq_len - 1)?)?.sum(1)?;
            score = (score + moved)?;
        }

        Ok(score)
    }

    /// Log partition function via the forward algorithm, `[batch]`.
    fn partition(&self, emissions: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = mask.dims2()?;
        let transitions = self.transitions.unsqueeze(0)?;

        let mut alpha = emissions
            .narrow(1, 0, 1)?
            .squeeze(1)?
            .broadcast_add(&self.start_transitions.unsqueeze(0)?)?;

        for i in 1..seq_len {
            let emit = emissions.narrow(1, i, 1)?; // [batch, 1, to]
            let next = alpha
                .unsqueeze(2)?
                .broadcast_add(&transitions)?
                .broadcast_add(&emit)?;
            let next = log_sum_exp(&next, 1)?;

            let on = mask.narrow(1, i, 1)?;
            let off = on.affine(-1.0, 1.0)?;
            alpha = (next.broadcast_mul(&on)? + alpha.broadcast_mul(&off)?)?;
        }

        let alpha = alpha.broadcast_add(&self.end_transitions.unsqueeze(0)?)?;
        log_sum_exp(&alpha, 1)
    }

    /// Best tag path per example, each exactly as long as its attended prefix.
    pub fn decode(&self, emissions: &Tensor, mask: &Tensor) -> Result<Vec<Vec<u32>>> {
        self.check_emissions(emissions)?;
        let lengths = mask_lengths(&mask.to_dtype(DType::F32)?)?;

        let emissions: Vec<Vec<Vec<f32>>> = emissions.to_dtype(DType::F32)?.to_vec3()?;
        let transitions: Vec<Vec<f32>> = self.transitions.to_dtype(DType::F32)?.to_vec2()?;
        let start: Vec<f32> = self.start_transitions.to_dtype(DType::F32)?.to_vec1()?;
        let end: Vec<f32> = self.end_transitions.to_dtype(DType::F32)?.to_vec1()?;

        emissions
            .iter()
            .zip(lengths)
            .map(|(scores, len)| {
                let path = self
                    .decoder
                    .decode(&scores[..len], &transitions, &start, &end)?;
                Ok(path.into_iter().map(|tag| tag as u32).collect())
            })
            .collect()
    }
}

/// Attended length of each row; every row must attend its first position.
fn mask_lengths(mask: &Tensor) -> Result<Vec<usize>> {
    let rows: Vec<Vec<f32>> = mask.to_vec2()?;
    rows.iter()
        .map(|row| {
            if row.first().copied().unwrap_or(0.0) <= 0.0 {
                return Err(NluError::Config(
                    "mask of the first timestep must be on".into(),
                ));
            }
            Ok(row.iter().filter(|&&m| m > 0.0).count())
        })
        .collect()
}

/// Numerically stable `log(sum(exp(xs)))` over `dim`, which is removed.
fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let shifted = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    Ok((shifted + max)?.squeeze(dim)?)
}

#[cfg(test)]
mod tests {
    use candle_core::{Device, Var};
    use candle_nn::VarMap;

    use super::*;

    const K: usize = 3;

    fn make_crf(varmap: &VarMap) -> Crf {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        Crf::new(K, vb.pp("crf")).unwrap()
    }

    fn emissions() -> Tensor {
        let data: Vec<f32> = (0..2 * 4 * K)
            .map(|i| ((i * 7 % 11) as f32 - 5.0) / 4.0)
            .collect();
        Tensor::from_vec(data, (2, 4, K), &Device::Cpu).unwrap()
    }

    fn mask() -> Tensor {
        Tensor::new(&[[1u32, 1, 1, 1], [1, 1, 0, 0]], &Device::Cpu).unwrap()
    }

    struct Host {
        emissions: Vec<Vec<Vec<f32>>>,
        transitions: Vec<Vec<f32>>,
        start: Vec<f32>,
        end: Vec<f32>,
    }

    impl Host {
        fn new(crf: &Crf) -> Self {
            Self {
                emissions: emissions().to_vec3().unwrap(),
                transitions: crf.transitions().to_vec2().unwrap(),
                start: crf.start_transitions().to_vec1().unwrap(),
                end: crf.end_transitions().to_vec1().unwrap(),
            }
        }

        fn score(&self, b: usize, path: &[usize]) -> f32 {
            let e = &self.emissions[b];
            let mut s = self.start[path[0]] + e[0][path[0]];
            for t in 1..path.len() {
                s += self.transitions[path[t - 1]][path[t]] + e[t][path[t]];
            }
            s + self.end[path[path.len() - 1]]
        }
    }

    fn all_paths(len: usize) -> Vec<Vec<usize>> {
        let mut paths = vec![vec![]];
        for _ in 0..len {
            paths = paths
                .into_iter()
                .flat_map(|p| {
                    (0..K).map(move |t| {
                        let mut next = p.clone();
                        next.push(t);
                        next
                    })
                })
                .collect();
        }
        paths
    }

    #[test]
    fn test_log_likelihood_matches_enumeration() {
        let varmap = VarMap::new();
        let crf = make_crf(&varmap);
        let host = Host::new(&crf);

        let tags = Tensor::new(&[[0u32, 2, 1, 1], [2, 0, 0, 0]], &Device::Cpu).unwrap();
        let llh: Vec<f32> = crf
            .log_likelihood(&emissions(), &mask(), &tags)
            .unwrap()
            .to_vec1()
            .unwrap();

        let gold = [vec![0usize, 2, 1, 1], vec![2, 0]];
        for (b, len) in [(0usize, 4usize), (1, 2)] {
            let log_z = all_paths(len)
                .iter()
                .map(|p| host.score(b, p))
                .map(|s| s.exp())
                .sum::<f32>()
                .ln();
            let expected = host.score(b, &gold[b]) - log_z;
            assert!(
                (llh[b] - expected).abs() < 1e-4,
                "example {b}: {} vs {expected}",
                llh[b]
            );
            assert!(llh[b] <= 0.0);
        }
    }

    #[test]
    fn test_single_tag_has_zero_log_likelihood() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let crf = Crf::new(1, vb).unwrap();
        let emissions = Tensor::ones((1, 3, 1), DType::F32, &Device::Cpu).unwrap();
        let mask = Tensor::ones((1, 3), DType::U32, &Device::Cpu).unwrap();
        let tags = Tensor::zeros((1, 3), DType::U32, &Device::Cpu).unwrap();

        let llh: Vec<f32> = crf
            .log_likelihood(&emissions, &mask, &tags)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(llh[0].abs() < 1e-5);
    }

    #[test]
    fn test_decode_matches_enumeration_and_mask_length() {
        let varmap = VarMap::new();
        let crf = make_crf(&varmap);
        let host = Host::new(&crf);

        let paths = crf.decode(&emissions(), &mask()).unwrap();
        assert_eq!(paths[0].len(), 4);
        assert_eq!(paths[1].len(), 2);

        for (b, len) in [(0usize, 4usize), (1, 2)] {
            let best = all_paths(len)
                .iter()
                .map(|p| host.score(b, p))
                .fold(f32::NEG_INFINITY, f32::max);
            let decoded: Vec<usize> = paths[b].iter().map(|&t| t as usize).collect();
            assert!((host.score(b, &decoded) - best).abs() < 1e-5);
        }
    }

    #[test]
    fn test_decode_every_prefix_length() {
        let varmap = VarMap::new();
        let crf = make_crf(&varmap);
        let emissions = Tensor::zeros((1, 6, K), DType::F32, &Device::Cpu).unwrap();
        for len in 1..=6u32 {
            let row: Vec<u32> = (0..6).map(|i| u32::from(i < len)).collect();
            let mask = Tensor::from_vec(row, (1, 6), &Device::Cpu).unwrap();
            let paths = crf.decode(&emissions, &mask).unwrap();
            assert_eq!(paths[0].len(), len as usize);
        }
    }

    #[test]
    fn test_constrained_decode_never_opens_with_inside() {
        let varmap = VarMap::new();
        let tags = ["O", "B-loc", "I-loc"];
        let crf = make_crf(&varmap)
            .with_constraints(
                crate::tagging::transition_constraints(&tags),
                crate::tagging::start_constraints(&tags),
            )
            .unwrap();
        // I-loc wins every position on emissions alone
        let data: Vec<f32> = (0..4).flat_map(|_| [0.0f32, 0.0, 10.0]).collect();
        let emissions = Tensor::from_vec(data, (1, 4, K), &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 1, 1]], &Device::Cpu).unwrap();

        let path = &crf.decode(&emissions, &mask).unwrap()[0];
        assert_eq!(path[0], 1);
        assert!(path[1..].iter().all(|&t| t == 2));
    }

    #[test]
    fn test_empty_first_timestep_rejected() {
        let varmap = VarMap::new();
        let crf = make_crf(&varmap);
        let mask = Tensor::new(&[[0u32, 1, 1, 1], [1, 1, 0, 0]], &Device::Cpu).unwrap();
        assert!(crf.decode(&emissions(), &mask).is_err());
    }

    #[test]
    fn test_gradients_reach_transitions() {
        let varmap = VarMap::new();
        let crf = make_crf(&varmap);
        let tags = Tensor::new(&[[0u32, 2, 1, 1], [2, 0, 0, 0]], &Device::Cpu).unwrap();

        let nll = crf
            .log_likelihood(&emissions(), &mask(), &tags)
            .unwrap()
            .neg()
            .unwrap()
            .mean_all()
            .unwrap();
        let grads = nll.backward().unwrap();

        let vars: Vec<Var> = varmap.all_vars();
        assert_eq!(vars.len(), 3);
        for var in &vars {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }
}
