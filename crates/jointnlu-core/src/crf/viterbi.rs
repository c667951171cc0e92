//! # Viterbi Decoding for CRF
//!
//! Implements the Viterbi algorithm for finding the most likely tag sequence
//! given emission scores, start/end scores and a transition matrix.

use crate::error::{NluError, Result};

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
    /// `allowed[prev][curr]`; `None` permits every transition.
    allowed: Option<Vec<Vec<bool>>>,
    /// Tags the first position may take; `None` permits every tag.
    start_allowed: Option<Vec<bool>>,
}

impl ViterbiDecoder {
    /// Create an unconstrained decoder over `num_tags` tags.
    pub fn new(num_tags: usize) -> Self {
        Self {
            num_tags,
            allowed: None,
            start_allowed: None,
        }
    }

    /// Create a decoder that never takes a transition marked `false`.
    pub fn with_constraints(allowed: Vec<Vec<bool>>) -> Result<Self> {
        let num_tags = allowed.len();
        if allowed.iter().any(|row| row.len() != num_tags) {
            return Err(NluError::Config(
                "transition constraint matrix must be square".into(),
            ));
        }
        Ok(Self {
            num_tags,
            allowed: Some(allowed),
            start_allowed: None,
        })
    }

    /// Restrict the tags the first position may take to those marked `true`.
    pub fn with_start_constraints(mut self, start_allowed: Vec<bool>) -> Result<Self> {
        if start_allowed.len() != self.num_tags {
            return Err(NluError::Config(format!(
                "start constraints cover {} tags, decoder has {}",
                start_allowed.len(),
                self.num_tags
            )));
        }
        self.start_allowed = Some(start_allowed);
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    fn is_allowed(&self, prev: usize, curr: usize) -> bool {
        self.allowed.as_ref().is_none_or(|a| a[prev][curr])
    }

    fn may_start(&self, tag: usize) -> bool {
        self.start_allowed.as_ref().is_none_or(|s| s[tag])
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - `[seq_len][num_tags]`, already cut to the attended length
    /// * `transitions` - `[num_tags][num_tags]`, indexed `[prev][curr]`
    /// * `start` / `end` - scores for the first and last tag
    ///
    /// # Returns
    /// One tag index per position of `emission_scores`.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transitions: &[Vec<f32>],
        start: &[f32],
        end: &[f32],
    ) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        // Validate dimensions
        if emission_scores[0].len() != self.num_tags
            || transitions.len() != self.num_tags
            || start.len() != self.num_tags
            || end.len() != self.num_tags
        {
            return Err(NluError::Config(format!(
                "Viterbi dimension mismatch: expected {} tags, got emissions {} / transitions {} / start {} / end {}",
                self.num_tags,
                emission_scores[0].len(),
                transitions.len(),
                start.len(),
                end.len()
            )));
        }

        let mut dp: Vec<Vec<f32>> = vec![vec![f32::NEG_INFINITY; self.num_tags]; seq_len];
        let mut backptr: Vec<Vec<usize>> = vec![vec![0; self.num_tags]; seq_len];

        for tag in 0..self.num_tags {
            if self.may_start(tag) {
                dp[0][tag] = start[tag] + emission_scores[0][tag];
            }
        }

        // Forward pass
        for pos in 1..seq_len {
            for curr_tag in 0..self.num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;

                for prev_tag in 0..self.num_tags {
                    if !self.is_allowed(prev_tag, curr_tag) {
                        continue;
                    }

                    let score = dp[pos - 1][prev_tag] + transitions[prev_tag][curr_tag];
                    if score > best_score {
                        best_score = score;
                        best_prev = prev_tag;
                    }
                }

                dp[pos][curr_tag] = best_score + emission_scores[pos][curr_tag];
                backptr[pos][curr_tag] = best_prev;
            }
        }

        // Best final tag, end scores included
        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..self.num_tags {
            let score = dp[seq_len - 1][tag] + end[tag];
            if score > best_final_score {
                best_final_score = score;
                best_final_tag = tag;
            }
        }

        // Backtrack
        let mut path = Vec::with_capacity(seq_len);
        path.push(best_final_tag);
        let mut curr_tag = best_final_tag;
        for pos in (1..seq_len).rev() {
            curr_tag = backptr[pos][curr_tag];
            path.push(curr_tag);
        }

        path.reverse();
        Ok(path)
    }
}
