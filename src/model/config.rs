use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::data::ALPHABET;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub ff_dim: usize,
    /// 位置编码支持的最大序列长度
    pub max_seq_len: usize,
    pub dropout: f64,
}

impl DiffusionConfig {
    /// 单元测试和冒烟测试用的小模型
    pub fn tiny() -> Self {
        Self {
            vocab_size: ALPHABET.chars().count(),
            hidden_dim: 32,
            num_layers: 2,
            num_heads: 4,
            ff_dim: 64,
            max_seq_len: 256,
            dropout: 0.0,
        }
    }

    /// 约 38M 参数规模，与常见的 order-agnostic 蛋白扩散模型同级
    pub fn small() -> Self {
        Self {
            vocab_size: ALPHABET.chars().count(),
            hidden_dim: 512,
            num_layers: 12,
            num_heads: 8,
            ff_dim: 2048,
            max_seq_len: 1024,
            dropout: 0.0,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("failed to write model config {:?}", path.as_ref()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read model config {:?}", path.as_ref()))?;
        Ok(serde_json::from_str(&json)?)
    }
}
