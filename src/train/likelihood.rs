use anyhow::{bail, ensure};
use burn::data::dataloader::batcher::Batcher;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::data::{ProteinTokenizer, SequenceBatch, SequenceBatcher};
use crate::model::MaskedDiffusionModel;

/// 计算每条序列的负对数似然 (NLL)
///
/// 所有位置都替换成 mask token 输入模型 (完全掩码打分)，模型按每条序列的真实长度
/// 产生 logits；对真实 token 取交叉熵后乘以有效位 (token != pad_id)，沿序列维求和。
///
/// Policy (带梯度) 和 Reference (无梯度) 必须走同一条路径，否则两者的比值没有意义。
///
/// # 返回
/// [batch_size] 的 NLL
pub fn sequence_nll<B: Backend>(
    model: &MaskedDiffusionModel<B>,
    batch: SequenceBatch<B>,
    mask_id: u32,
    pad_id: u32,
) -> Tensor<B, 1> {
    let [batch_size, seq_len] = batch.tokens.dims();
    let device = batch.tokens.device();

    // 1. 全部位置 mask
    let masked_input = Tensor::<B, 2, Int>::full([batch_size, seq_len], mask_id as i64, &device);
    let logits = model.forward(masked_input, batch.lengths);

    // 2. 取出真实 token 的 log prob
    let log_probs = log_softmax(logits, 2);
    let targets = batch.tokens.clone().reshape([batch_size, seq_len, 1]);
    let token_log_probs = log_probs.gather(2, targets).reshape([batch_size, seq_len]);

    // 3. padding 位置不计入损失
    let valid = batch.tokens.not_equal_elem(pad_id as i64).float();

    (token_log_probs.neg() * valid)
        .sum_dim(1)
        .reshape([batch_size])
}

/// log π(x) - log π_ref(x) = NLL_ref(x) - NLL_π(x)
pub fn log_likelihood_ratio<B: Backend>(
    policy_nll: Tensor<B, 1>,
    reference_nll: Tensor<B, 1>,
) -> Tensor<B, 1> {
    reference_nll - policy_nll
}

/// 对字符串序列批次做分词、补齐并计算 NLL
#[derive(Clone)]
pub struct LikelihoodEvaluator {
    tokenizer: ProteinTokenizer,
}

impl LikelihoodEvaluator {
    pub fn new(tokenizer: ProteinTokenizer) -> Self {
        Self { tokenizer }
    }

    pub fn tokenizer(&self) -> &ProteinTokenizer {
        &self.tokenizer
    }

    pub fn evaluate<B: Backend>(
        &self,
        model: &MaskedDiffusionModel<B>,
        sequences: &[String],
        device: &B::Device,
    ) -> anyhow::Result<Tensor<B, 1>> {
        ensure!(!sequences.is_empty(), "cannot evaluate an empty batch");

        let mut items = Vec::with_capacity(sequences.len());
        for (i, sequence) in sequences.iter().enumerate() {
            let ids = self.tokenizer.encode(sequence)?;
            if ids.is_empty() {
                bail!("sequence {} is empty", i);
            }
            if ids.len() > model.max_seq_len {
                bail!(
                    "sequence {} has length {} beyond model limit {}",
                    i,
                    ids.len(),
                    model.max_seq_len
                );
            }
            items.push(ids);
        }

        let batch = SequenceBatcher::<B>::new(self.tokenizer.pad_id()).batch(items, device);
        Ok(sequence_nll(
            model,
            batch,
            self.tokenizer.mask_id(),
            self.tokenizer.pad_id(),
        ))
    }
}
