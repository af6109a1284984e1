use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// GRPO 损失的各个组成部分，方便分别记录
#[derive(Debug, Clone)]
pub struct GrpoLossOutput<B: Backend> {
    /// policy_objective + kl_penalty
    pub loss: Tensor<B, 1>,
    /// -mean(A_i * ratio_i)
    pub policy_objective: Tensor<B, 1>,
    /// beta * mean(ratio_i)
    pub kl_penalty: Tensor<B, 1>,
}

/// 带 KL 惩罚的组相对策略梯度目标
///
/// 不做 PPO 式的 ratio 裁剪，偏离 reference 的唯一约束是 KL 项。
pub struct GrpoLoss<B: Backend> {
    pub beta: f64,
    _marker: std::marker::PhantomData<B>,
}

impl<B: Backend> GrpoLoss<B> {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            _marker: std::marker::PhantomData,
        }
    }

    /// 计算 GRPO Loss
    ///
    /// # Arguments
    /// * `log_ratios`: [Batch] - log π(x) - log π_ref(x)
    /// * `advantages`: [Batch] - 组内标准化后的优势，视为常数
    pub fn forward(&self, log_ratios: Tensor<B, 1>, advantages: Tensor<B, 1>) -> GrpoLossOutput<B> {
        // 优势高于平均的序列提高似然，低于平均的降低似然
        let policy_objective = (advantages * log_ratios.clone()).mean().neg();

        // KL(π || π_ref) 用平均 log ratio 近似
        let kl_penalty = log_ratios.mean().mul_scalar(self.beta);

        GrpoLossOutput {
            loss: policy_objective.clone() + kl_penalty.clone(),
            policy_objective,
            kl_penalty,
        }
    }
}
