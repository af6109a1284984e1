use anyhow::{bail, ensure};
use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::ProteinTokenizer;
use crate::model::MaskedDiffusionModel;

#[derive(Config, Debug)]
pub struct SamplingConfig {
    /// 采样温度，0.0 表示贪婪解码
    #[config(default = 1.0)]
    pub temperature: f64,
    /// 固定随机种子；None 时使用系统熵
    pub seed: Option<u64>,
}

/// 生成器边界: 从当前 policy 采样一批序列
///
/// 调用方负责传入非 autodiff 的模型 (`AutodiffModule::valid`)，
/// 保证采样过程不记录梯度。
pub trait SequenceGenerator<B: Backend> {
    fn generate(
        &mut self,
        model: &MaskedDiffusionModel<B>,
        tokenizer: &ProteinTokenizer,
        seq_len: usize,
        batch_size: usize,
        device: &B::Device,
    ) -> anyhow::Result<Vec<String>>;
}

/// Order-agnostic 自回归扩散采样
///
/// 从全 mask 序列开始，每条序列随机抽取一个解码顺序，
/// 每一步对顺序中的下一个位置在标准残基上采样并填回输入。
pub struct OrderAgnosticSampler {
    temperature: f64,
    rng: StdRng,
}

impl OrderAgnosticSampler {
    pub fn new(config: &SamplingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            temperature: config.temperature,
            rng,
        }
    }

    fn sample_residue(&mut self, logits: &[f32], allowed: &[u32]) -> anyhow::Result<u32> {
        let candidates: Vec<f32> = allowed.iter().map(|&id| logits[id as usize]).collect();

        if self.temperature <= 0.0 {
            let best = candidates
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| allowed[i]);
            return best.ok_or_else(|| anyhow::anyhow!("no residue to sample from"));
        }

        // 数值稳定的 softmax 权重
        let max = candidates.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f64> = candidates
            .iter()
            .map(|&l| (((l - max) as f64) / self.temperature).exp())
            .collect();

        let dist = WeightedIndex::new(&weights)
            .map_err(|e| anyhow::anyhow!("invalid sampling distribution: {}", e))?;
        Ok(allowed[dist.sample(&mut self.rng)])
    }
}

impl<B: Backend> SequenceGenerator<B> for OrderAgnosticSampler {
    fn generate(
        &mut self,
        model: &MaskedDiffusionModel<B>,
        tokenizer: &ProteinTokenizer,
        seq_len: usize,
        batch_size: usize,
        device: &B::Device,
    ) -> anyhow::Result<Vec<String>> {
        ensure!(seq_len > 0, "sequence length must be positive");
        if seq_len > model.max_seq_len {
            bail!(
                "sequence length {} exceeds model limit {}",
                seq_len,
                model.max_seq_len
            );
        }

        let allowed = tokenizer.canonical_ids();
        let mut tokens = vec![tokenizer.mask_id(); batch_size * seq_len];

        // 每条序列各自的解码顺序
        let orders: Vec<Vec<usize>> = (0..batch_size)
            .map(|_| {
                let mut order: Vec<usize> = (0..seq_len).collect();
                order.shuffle(&mut self.rng);
                order
            })
            .collect();

        let lengths = Tensor::<B, 1, Int>::full([batch_size], seq_len as i64, device);

        for t in 0..seq_len {
            let input = Tensor::<B, 2, Int>::from_data(
                TensorData::new(
                    tokens.iter().map(|&x| x as i64).collect::<Vec<_>>(),
                    [batch_size, seq_len],
                ),
                device,
            );
            let logits = model.forward(input, lengths.clone());
            let [_, _, vocab_size] = logits.dims();
            ensure!(
                vocab_size == tokenizer.vocab_size(),
                "model vocab size {} does not match tokenizer vocab size {}",
                vocab_size,
                tokenizer.vocab_size()
            );

            // 只取出每条序列本步要解码的位置: [Batch, 1, Vocab]
            let positions: Vec<i64> = orders.iter().map(|order| order[t] as i64).collect();
            let index = Tensor::<B, 1, Int>::from_data(
                TensorData::new(positions, [batch_size]),
                device,
            )
            .reshape([batch_size, 1, 1])
            .expand([batch_size, 1, vocab_size]);

            let step_logits: Vec<f32> = logits
                .gather(1, index)
                .into_data()
                .convert::<f32>()
                .iter::<f32>()
                .collect();

            for (b, order) in orders.iter().enumerate() {
                let row = &step_logits[b * vocab_size..(b + 1) * vocab_size];
                tokens[b * seq_len + order[t]] = self.sample_residue(row, &allowed)?;
            }
        }

        Ok(tokens
            .chunks(seq_len)
            .map(|ids| tokenizer.decode(ids))
            .collect())
    }
}
