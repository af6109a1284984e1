use anyhow::ensure;
use burn::config::Config;
use burn::optim::{AdamWConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use log::warn;

use crate::infer::SamplingConfig;
use crate::model::MaskedDiffusionModel;

pub mod advantage;
pub mod checkpoint;
pub mod grpo;
pub mod likelihood;
pub mod reward;
pub mod trainer;

pub use advantage::normalize_advantages;
pub use grpo::{GrpoLoss, GrpoLossOutput};
pub use likelihood::{log_likelihood_ratio, sequence_nll, LikelihoodEvaluator};
pub use reward::{OracleReward, RewardBatch, RewardConfig, RewardModel};
pub use trainer::{EpochSummary, GrpoTrainer, Phase, StepReport};

/// GRPO 微调的全部超参数，进程启动时确定，运行中不再修改
#[derive(Config, Debug)]
pub struct GrpoTrainingConfig {
    /// KL 惩罚系数 beta
    #[config(default = 0.1)]
    pub kl_beta: f64,
    #[config(default = 1e-6)]
    pub learning_rate: f64,
    #[config(default = 30)]
    pub epochs: usize,
    #[config(default = 100)]
    pub steps_per_epoch: usize,
    /// 每步采样的序列数 (即 GRPO 的组大小)
    #[config(default = 32)]
    pub batch_size: usize,
    /// 生成序列的长度
    #[config(default = 100)]
    pub seq_len: usize,
    #[config(default = 0.9)]
    pub adam_beta_1: f32,
    #[config(default = 0.98)]
    pub adam_beta_2: f32,
    #[config(default = 1e-8)]
    pub adam_epsilon: f32,
    #[config(default = 0.01)]
    pub weight_decay: f32,
    /// 优势标准化时加在标准差上的常数
    #[config(default = 1e-8)]
    pub advantage_epsilon: f64,
    #[config(default = "RewardConfig::new()")]
    pub reward: RewardConfig,
    #[config(default = "SamplingConfig::new()")]
    pub sampling: SamplingConfig,
}

impl GrpoTrainingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.epochs > 0, "epochs must be positive");
        ensure!(self.steps_per_epoch > 0, "steps_per_epoch must be positive");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.seq_len > 0, "seq_len must be positive");
        ensure!(self.learning_rate > 0.0, "learning_rate must be positive");
        ensure!(
            self.advantage_epsilon > 0.0,
            "advantage_epsilon must be positive"
        );
        if self.batch_size < 2 {
            warn!("batch_size < 2: every advantage will be zero and the policy term vanishes");
        }
        Ok(())
    }

    pub fn optimizer(&self) -> AdamWConfig {
        AdamWConfig::new()
            .with_beta_1(self.adam_beta_1)
            .with_beta_2(self.adam_beta_2)
            .with_epsilon(self.adam_epsilon)
            .with_weight_decay(self.weight_decay)
    }

    /// 只针对 policy 参数构建 AdamW
    pub fn init_optimizer<B: AutodiffBackend>(&self) -> impl Optimizer<MaskedDiffusionModel<B>, B> {
        self.optimizer().init::<B, MaskedDiffusionModel<B>>()
    }
}
