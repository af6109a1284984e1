use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use log::{debug, warn};

use crate::oracle::{Prediction, ScoreRequest, StructureOracle};

/// 奖励 = confidence_weight * 排名置信度 + plddt_weight * 平均 pLDDT
#[derive(Config, Debug)]
pub struct RewardConfig {
    #[config(default = 1.0)]
    pub confidence_weight: f64,
    #[config(default = 0.1)]
    pub plddt_weight: f64,
    /// 打分失败时使用的固定惩罚
    #[config(default = "-100.0")]
    pub failure_penalty: f64,
}

/// 一批序列的奖励，下标与输入序列一一对应
#[derive(Debug, Clone, PartialEq)]
pub struct RewardBatch {
    pub rewards: Vec<f32>,
    /// 被惩罚值替代的序列个数
    pub failures: usize,
}

impl RewardBatch {
    pub fn mean(&self) -> f32 {
        if self.rewards.is_empty() {
            return 0.0;
        }
        self.rewards.iter().sum::<f32>() / self.rewards.len() as f32
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_floats(self.rewards.as_slice(), device)
    }
}

/// 奖励函数接口
pub trait RewardModel {
    /// 为一组生成的序列计算奖励；不允许失败，单条序列的错误必须在内部吸收
    fn score(&self, target: &str, sequences: &[String], step: usize) -> RewardBatch;
}

/// 基于结构预测的奖励
pub struct OracleReward<O: StructureOracle> {
    oracle: O,
    config: RewardConfig,
}

impl<O: StructureOracle> OracleReward<O> {
    pub fn new(oracle: O, config: RewardConfig) -> Self {
        Self { oracle, config }
    }

    pub fn reward_for(&self, prediction: &Prediction) -> f64 {
        self.config.confidence_weight * prediction.confidence
            + self.config.plddt_weight * prediction.mean_per_residue_confidence()
    }
}

impl<O: StructureOracle> RewardModel for OracleReward<O> {
    fn score(&self, target: &str, sequences: &[String], step: usize) -> RewardBatch {
        let mut failures = 0;
        let rewards = sequences
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let request = ScoreRequest {
                    target,
                    candidate,
                    step,
                    index,
                };
                match self.oracle.score(&request) {
                    Ok(prediction) => {
                        let reward = self.reward_for(&prediction);
                        debug!(
                            "step {} seq {}: model={} confidence={:.4} plddt={:.2} reward={:.4}",
                            step,
                            index,
                            prediction.model_name,
                            prediction.confidence,
                            prediction.mean_per_residue_confidence(),
                            reward
                        );
                        reward as f32
                    }
                    Err(e) => {
                        let kind = if e.is_process_error() { "process" } else { "output" };
                        warn!("[!] Error in sequence {} (step {}, {}): {}", index, step, kind, e);
                        failures += 1;
                        self.config.failure_penalty as f32
                    }
                }
            })
            .collect();

        RewardBatch { rewards, failures }
    }
}
