use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};

/// 双向多头自注意力
///
/// 扩散模型需要看到整条序列，所以没有 causal mask，
/// 只用 key padding mask 屏蔽补齐位置。
#[derive(Module, Debug)]
pub struct BidirectionalAttention<B: Backend> {
    pub w_q: Linear<B>,
    pub w_k: Linear<B>,
    pub w_v: Linear<B>,
    pub w_o: Linear<B>,
    pub dropout: Dropout,
    pub n_heads: usize,
    pub head_dim: usize,
}

impl<B: Backend> BidirectionalAttention<B> {
    pub fn new(hidden_dim: usize, n_heads: usize, dropout: f64, device: &B::Device) -> Self {
        let head_dim = hidden_dim / n_heads;
        Self {
            w_q: LinearConfig::new(hidden_dim, n_heads * head_dim).init(device),
            w_k: LinearConfig::new(hidden_dim, n_heads * head_dim).init(device),
            w_v: LinearConfig::new(hidden_dim, n_heads * head_dim).init(device),
            w_o: LinearConfig::new(n_heads * head_dim, hidden_dim).init(device),
            dropout: DropoutConfig::new(dropout).init(),
            n_heads,
            head_dim,
        }
    }

    /// # 参数
    /// - `x`: [Batch, Seq, Hidden]
    /// - `key_padding_mask`: [Batch, Seq]，true 表示该位置是补齐，不能被关注
    pub fn forward(&self, x: Tensor<B, 3>, key_padding_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let [batch_size, seq_len, _hidden_dim] = x.dims();

        // [Batch, Seq, Heads * Dim] -> [Batch, Heads, Seq, Dim]
        let split = |t: Tensor<B, 3>| {
            t.reshape([batch_size, seq_len, self.n_heads, self.head_dim])
                .swap_dims(1, 2)
        };
        let q = split(self.w_q.forward(x.clone()));
        let k = split(self.w_k.forward(x.clone()));
        let v = split(self.w_v.forward(x));

        let scale = (self.head_dim as f32).sqrt().recip();
        let scores = q.matmul(k.swap_dims(2, 3)) * scale;

        // 有限的大负数而不是 -inf，避免整行被屏蔽时出现 NaN
        let mask = key_padding_mask
            .reshape([batch_size, 1, 1, seq_len])
            .expand([batch_size, self.n_heads, seq_len, seq_len]);
        let scores = scores.mask_fill(mask, -1.0e9);

        let attn = burn::tensor::activation::softmax(scores, 3);
        let attn = self.dropout.forward(attn);

        let out = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch_size, seq_len, self.n_heads * self.head_dim]);
        self.w_o.forward(out)
    }
}
