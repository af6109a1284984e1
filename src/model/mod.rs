use std::path::Path;

use burn::module::Module;
use burn::nn::{
    DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig,
};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor};

pub mod attention;
pub mod config;
pub mod ffn;

pub use attention::BidirectionalAttention;
pub use config::DiffusionConfig;
pub use ffn::FeedForward;

/// 权重文件名 (不含扩展名，recorder 会追加 `.bin`)
pub const MODEL_FILE_STEM: &str = "policy_model";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// Pre-norm Transformer 块: 双向注意力 + 前馈网络
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub attention: BidirectionalAttention<B>,
    pub ffn: FeedForward<B>,
    pub attn_norm: LayerNorm<B>,
    pub ffn_norm: LayerNorm<B>,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn new(config: &DiffusionConfig, device: &B::Device) -> Self {
        Self {
            attention: BidirectionalAttention::new(
                config.hidden_dim,
                config.num_heads,
                config.dropout,
                device,
            ),
            ffn: FeedForward::new(config.hidden_dim, config.ff_dim, config.dropout, device),
            attn_norm: LayerNormConfig::new(config.hidden_dim).init(device),
            ffn_norm: LayerNormConfig::new(config.hidden_dim).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, key_padding_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let h = x.clone()
            + self
                .attention
                .forward(self.attn_norm.forward(x), key_padding_mask);
        h.clone() + self.ffn.forward(self.ffn_norm.forward(h))
    }
}

/// Order-agnostic 掩码扩散序列模型
///
/// 输入是部分 (或全部) 被 mask 的残基序列，输出每个位置在词表上的 logits。
/// 每条序列按自己的真实长度建立 key padding mask，
/// 所以有效位置的输出与同批次里其它序列的补齐长度无关。
#[derive(Module, Debug)]
pub struct MaskedDiffusionModel<B: Backend> {
    pub token_embedding: Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub blocks: Vec<EncoderBlock<B>>,
    pub norm: LayerNorm<B>,
    pub output: Linear<B>,
    pub max_seq_len: usize,
}

impl<B: Backend> MaskedDiffusionModel<B> {
    pub fn new(config: &DiffusionConfig, device: &B::Device) -> Self {
        let blocks = (0..config.num_layers)
            .map(|_| EncoderBlock::new(config, device))
            .collect();

        Self {
            token_embedding: EmbeddingConfig::new(config.vocab_size, config.hidden_dim)
                .init(device),
            position_embedding: EmbeddingConfig::new(config.max_seq_len, config.hidden_dim)
                .init(device),
            blocks,
            norm: LayerNormConfig::new(config.hidden_dim).init(device),
            output: LinearConfig::new(config.hidden_dim, config.vocab_size).init(device),
            max_seq_len: config.max_seq_len,
        }
    }

    /// 模型前向传播
    ///
    /// # 参数
    /// - `tokens`: [batch_size, seq_len]
    /// - `lengths`: [batch_size]，每条序列的真实长度，超出部分视为 padding
    ///
    /// # 返回
    /// logits，形状为 [batch_size, seq_len, vocab_size]
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, lengths: Tensor<B, 1, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = tokens.dims();
        let device = tokens.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .reshape([1, seq_len])
            .expand([batch_size, seq_len]);
        let key_padding_mask = padding_mask(positions.clone(), lengths);

        let mut h = self.token_embedding.forward(tokens) + self.position_embedding.forward(positions);
        for block in &self.blocks {
            h = block.forward(h, key_padding_mask.clone());
        }

        self.output.forward(self.norm.forward(h))
    }

    /// 关闭所有 Dropout
    ///
    /// autodiff 后端上 Dropout 处于激活状态，非 autodiff 后端上不生效；
    /// 两个后端的模型要给出相同的似然，就必须都不带 Dropout。
    pub fn without_dropout(mut self) -> Self {
        for block in self.blocks.iter_mut() {
            block.attention.dropout = DropoutConfig::new(0.0).init();
            block.ffn.dropout = DropoutConfig::new(0.0).init();
        }
        self
    }

    /// 保存到 `dir/policy_model.bin`
    pub fn save_checkpoint<P: AsRef<Path>>(&self, dir: P) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir.as_ref())?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::default();
        self.clone()
            .save_file(dir.as_ref().join(MODEL_FILE_STEM), &recorder)
            .map_err(|e| anyhow::anyhow!("Failed to save model: {}", e))
    }

    /// 按 `config` 构建新模型并从 `dir/policy_model.bin` 加载权重
    pub fn load_checkpoint<P: AsRef<Path>>(
        dir: P,
        config: &DiffusionConfig,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::default();
        Self::new(config, device)
            .load_file(dir.as_ref().join(MODEL_FILE_STEM), &recorder, device)
            .map_err(|e| anyhow::anyhow!("Failed to load model from {:?}: {}", dir.as_ref(), e))
    }
}

/// positions >= length 的位置为 true
fn padding_mask<B: Backend>(
    positions: Tensor<B, 2, Int>,
    lengths: Tensor<B, 1, Int>,
) -> Tensor<B, 2, Bool> {
    let [batch_size, seq_len] = positions.dims();
    let lengths = lengths.reshape([batch_size, 1]).expand([batch_size, seq_len]);
    positions.greater_equal(lengths)
}
