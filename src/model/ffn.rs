use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// 逐位置前馈网络: Linear -> GELU -> Dropout -> Linear
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub w_in: Linear<B>,
    pub w_out: Linear<B>,
    pub activation: Gelu,
    pub dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(hidden_dim: usize, ff_dim: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            w_in: LinearConfig::new(hidden_dim, ff_dim).init(device),
            w_out: LinearConfig::new(ff_dim, hidden_dim).init(device),
            activation: Gelu::new(),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let h = self.activation.forward(self.w_in.forward(x));
        self.w_out.forward(self.dropout.forward(h))
    }
}
