use anyhow::{Context as _, bail};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{CHAT_NUM_BEAMS, NO_REPEAT_NGRAM_SIZE},
    model::SpecialTokens,
};

/// Decoding parameters for a single generation call.
///
/// # Fields
///
/// ## `max_length`
/// Upper bound on the decoded sequence, counting the decoder start token.
/// At most `max_length - 1` tokens are produced.
///
/// ## `num_beams`
/// `1` selects greedy search, anything larger selects beam search.
///
/// ## `early_stopping`
/// Beam search only. Stop as soon as `num_beams` finished hypotheses exist
/// instead of waiting until no running beam can beat them.
///
/// ## `no_repeat_ngram_size`
/// Forbid any n-gram of this size from appearing twice. `0` disables it.
///
/// ## `length_penalty`
/// Exponent applied to the hypothesis length when scoring finished beams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_length: usize,
    pub num_beams: usize,
    pub early_stopping: bool,
    pub no_repeat_ngram_size: usize,
    pub length_penalty: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 20,
            num_beams: 1,
            early_stopping: false,
            no_repeat_ngram_size: 0,
            length_penalty: 1.0,
        }
    }
}

impl GenerationConfig {
    /// Settings used for summaries.
    pub fn summarize(max_length: usize, num_beams: usize) -> Self {
        Self::default()
            .with_max_length(max_length)
            .with_num_beams(num_beams)
            .with_early_stopping(true)
            .with_no_repeat_ngram_size(NO_REPEAT_NGRAM_SIZE)
    }

    /// Settings used for chat replies.
    pub fn chat(max_length: usize) -> Self {
        Self::summarize(max_length, CHAT_NUM_BEAMS)
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_num_beams(mut self, num_beams: usize) -> Self {
        self.num_beams = num_beams;
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn with_no_repeat_ngram_size(mut self, size: usize) -> Self {
        self.no_repeat_ngram_size = size;
        self
    }

    pub fn with_length_penalty(mut self, length_penalty: f32) -> Self {
        self.length_penalty = length_penalty;
        self
    }
}

/// Run the decoding loop.
///
/// `step` receives every live decoder prefix and returns one row of
/// next-token logits per prefix. The returned sequence starts with the
/// decoder start token.
pub(crate) fn generate<F>(
    config: &GenerationConfig,
    special: SpecialTokens,
    step: F,
) -> anyhow::Result<Vec<u32>>
where
    F: FnMut(&[Vec<u32>]) -> anyhow::Result<Vec<Vec<f32>>>,
{
    if config.max_length == 0 {
        bail!("max_length must be at least 1");
    }
    match config.num_beams {
        0 => bail!("num_beams must be at least 1"),
        1 => greedy_search(config, special, step),
        _ => beam_search(config, special, step),
    }
}

fn greedy_search<F>(
    config: &GenerationConfig,
    special: SpecialTokens,
    mut step: F,
) -> anyhow::Result<Vec<u32>>
where
    F: FnMut(&[Vec<u32>]) -> anyhow::Result<Vec<Vec<f32>>>,
{
    let mut sequence = vec![special.decoder_start];
    while sequence.len() < config.max_length {
        let mut logits = step(std::slice::from_ref(&sequence))?
            .into_iter()
            .next()
            .context("model returned no logits")?;
        ban_repeated_ngrams(&sequence, config.no_repeat_ngram_size, &mut logits);
        let next = argmax(&logits).context("model returned empty logits")?;
        sequence.push(next);
        if next == special.eos {
            break;
        }
    }
    Ok(sequence)
}

fn beam_search<F>(
    config: &GenerationConfig,
    special: SpecialTokens,
    mut step: F,
) -> anyhow::Result<Vec<u32>>
where
    F: FnMut(&[Vec<u32>]) -> anyhow::Result<Vec<Vec<f32>>>,
{
    let num_beams = config.num_beams;
    let mut beams = vec![vec![special.decoder_start]; num_beams];
    // Identical beams at the start; only the first one may expand.
    let mut beam_scores = vec![-1e9_f32; num_beams];
    beam_scores[0] = 0.0;

    let mut hypotheses =
        BeamHypotheses::new(num_beams, config.length_penalty, config.early_stopping);
    let mut done = false;

    while beams[0].len() < config.max_length {
        let logits = step(&beams)?;
        if logits.len() != beams.len() {
            bail!(
                "model returned {} logit rows for {} beams",
                logits.len(),
                beams.len()
            );
        }

        let mut candidates = Vec::new();
        for (beam_idx, row) in logits.into_iter().enumerate() {
            let mut scores = log_softmax(&row);
            ban_repeated_ngrams(&beams[beam_idx], config.no_repeat_ngram_size, &mut scores);
            for (token, score) in scores.into_iter().enumerate() {
                candidates.push(Candidate {
                    score: beam_scores[beam_idx] + score,
                    beam_idx,
                    token: token as u32,
                });
            }
        }
        if candidates.len() < 2 * num_beams {
            bail!(
                "vocabulary too small for {num_beams} beams ({} candidates)",
                candidates.len()
            );
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(2 * num_beams);

        let mut next_beams = Vec::with_capacity(num_beams);
        let mut next_scores = Vec::with_capacity(num_beams);
        for (rank, candidate) in candidates.iter().enumerate() {
            if candidate.token == special.eos {
                if rank < num_beams {
                    hypotheses.add(beams[candidate.beam_idx].clone(), candidate.score);
                }
                continue;
            }
            let mut sequence = beams[candidate.beam_idx].clone();
            sequence.push(candidate.token);
            next_beams.push(sequence);
            next_scores.push(candidate.score);
            if next_beams.len() == num_beams {
                break;
            }
        }
        if next_beams.len() < num_beams {
            bail!("beam search ran out of candidates");
        }

        let cur_len = next_beams[0].len();
        beams = next_beams;
        beam_scores = next_scores;

        if hypotheses.is_done(candidates[0].score, cur_len) {
            done = true;
            break;
        }
    }

    if !done {
        for (sequence, score) in beams.into_iter().zip(beam_scores) {
            hypotheses.add(sequence, score);
        }
    }

    let mut best = hypotheses
        .into_best()
        .context("beam search produced no hypothesis")?;
    if best.len() < config.max_length {
        best.push(special.eos);
    }
    Ok(best)
}

struct Candidate {
    score: f32,
    beam_idx: usize,
    token: u32,
}

/// Finished beams, keeping the `capacity` best by length-normalized score.
struct BeamHypotheses {
    capacity: usize,
    length_penalty: f32,
    early_stopping: bool,
    beams: Vec<(f32, Vec<u32>)>,
    worst_score: f32,
}

impl BeamHypotheses {
    fn new(capacity: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            capacity,
            length_penalty,
            early_stopping,
            beams: Vec::with_capacity(capacity + 1),
            worst_score: f32::INFINITY,
        }
    }

    fn normalize(&self, sum_logprobs: f32, len: usize) -> f32 {
        sum_logprobs / (len as f32).powf(self.length_penalty)
    }

    fn add(&mut self, sequence: Vec<u32>, sum_logprobs: f32) {
        let score = self.normalize(sum_logprobs, sequence.len());
        if self.beams.len() < self.capacity || score > self.worst_score {
            self.beams.push((score, sequence));
            if self.beams.len() > self.capacity {
                if let Some(worst) = self
                    .beams
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.0.total_cmp(&b.1.0))
                    .map(|(idx, _)| idx)
                {
                    self.beams.remove(worst);
                }
            }
            self.worst_score = self
                .beams
                .iter()
                .map(|(score, _)| *score)
                .fold(f32::INFINITY, f32::min);
        }
    }

    fn is_done(&self, best_sum_logprobs: f32, cur_len: usize) -> bool {
        if self.beams.len() < self.capacity {
            false
        } else if self.early_stopping {
            true
        } else {
            self.worst_score >= self.normalize(best_sum_logprobs, cur_len)
        }
    }

    fn into_best(self) -> Option<Vec<u32>> {
        self.beams
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, sequence)| sequence)
    }
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let log_sum = logits.iter().map(|l| (l - max).exp()).sum::<f32>().ln();
    logits.iter().map(|l| l - max - log_sum).collect()
}

fn argmax(scores: &[f32]) -> Option<u32> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, &score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
        .map(|(idx, _)| idx as u32)
}

/// Set the score of every token that would complete an n-gram already
/// present in `sequence` to `-inf`.
fn ban_repeated_ngrams(sequence: &[u32], n: usize, scores: &mut [f32]) {
    if n == 0 || sequence.len() + 1 < n {
        return;
    }
    let prefix = &sequence[sequence.len() + 1 - n..];
    for window in sequence.windows(n) {
        if window[..n - 1] == *prefix {
            if let Some(score) = scores.get_mut(window[n - 1] as usize) {
                *score = f32::NEG_INFINITY;
            }
        }
    }
}
