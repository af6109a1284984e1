use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// 组内标准化: A_i = (r_i - mean(r)) / (std(r) + epsilon)
///
/// 使用总体标准差 (除以 N)。奖励全部相同时结果为 0，不会出现 NaN。
/// 调用方应在非 autodiff 后端上计算，优势对 policy 梯度来说是常数。
pub fn normalize_advantages<B: Backend>(rewards: Tensor<B, 1>, epsilon: f64) -> Tensor<B, 1> {
    let [n] = rewards.dims();
    if n < 2 {
        return rewards.zeros_like();
    }

    let mean = rewards.clone().mean();
    let std = rewards.clone().var_bias(0).sqrt();

    (rewards - mean) / std.add_scalar(epsilon)
}
