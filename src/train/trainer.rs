use std::fmt;
use std::path::PathBuf;

use anyhow::{ensure, Context};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::data::ProteinTokenizer;
use crate::infer::SequenceGenerator;
use crate::model::{DiffusionConfig, MaskedDiffusionModel};
use crate::train::advantage::normalize_advantages;
use crate::train::checkpoint;
use crate::train::grpo::GrpoLoss;
use crate::train::likelihood::{log_likelihood_ratio, LikelihoodEvaluator};
use crate::train::reward::RewardModel;
use crate::train::GrpoTrainingConfig;

/// 训练循环所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sampling,
    Scoring,
    Evaluating,
    Updating,
    Checkpointing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 单步训练的统计
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: usize,
    pub loss: f32,
    pub policy_objective: f32,
    pub kl_penalty: f32,
    /// 与采样序列一一对应
    pub rewards: Vec<f32>,
    pub failures: usize,
}

impl StepReport {
    pub fn mean_reward(&self) -> f32 {
        if self.rewards.is_empty() {
            return 0.0;
        }
        self.rewards.iter().sum::<f32>() / self.rewards.len() as f32
    }
}

/// 单个 epoch 的统计
#[derive(Debug, Clone)]
pub struct EpochSummary {
    /// 从 1 开始
    pub epoch: usize,
    pub mean_loss: f32,
    /// 该 epoch 所有采样序列的平均奖励
    pub mean_reward: f32,
    pub failures: usize,
    pub checkpoint: PathBuf,
}

/// GRPO 训练器
///
/// 持有可训练的 policy、在构造时冻结的 reference 快照 (非 autodiff 后端，
/// 永远不会被更新) 以及只作用于 policy 参数的优化器。
/// 每一步: 采样 -> 打分 -> 计算优势 -> policy/reference NLL -> GRPO loss -> 更新。
pub struct GrpoTrainer<B, O, G, R>
where
    B: AutodiffBackend,
    O: Optimizer<MaskedDiffusionModel<B>, B>,
    G: SequenceGenerator<B::InnerBackend>,
    R: RewardModel,
{
    config: GrpoTrainingConfig,
    model_config: DiffusionConfig,
    policy: MaskedDiffusionModel<B>,
    reference: MaskedDiffusionModel<B::InnerBackend>,
    optimizer: O,
    generator: G,
    reward_model: R,
    evaluator: LikelihoodEvaluator,
    objective: GrpoLoss<B>,
    target: String,
    checkpoint_root: PathBuf,
    device: B::Device,
    phase: Phase,
    global_step: usize,
}

impl<B, O, G, R> GrpoTrainer<B, O, G, R>
where
    B: AutodiffBackend,
    O: Optimizer<MaskedDiffusionModel<B>, B>,
    G: SequenceGenerator<B::InnerBackend>,
    R: RewardModel,
{
    /// `policy` 与 reference 必须来自同一个预训练 checkpoint；
    /// reference 就是此刻 policy 的无梯度快照。
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GrpoTrainingConfig,
        model_config: DiffusionConfig,
        policy: MaskedDiffusionModel<B>,
        tokenizer: ProteinTokenizer,
        reference_tokenizer: &ProteinTokenizer,
        optimizer: O,
        generator: G,
        reward_model: R,
        target: impl Into<String>,
        checkpoint_root: impl Into<PathBuf>,
        device: B::Device,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        tokenizer.ensure_same_vocab(reference_tokenizer)?;
        ensure!(
            tokenizer.vocab_size() == model_config.vocab_size,
            "tokenizer vocab size {} does not match model vocab size {}",
            tokenizer.vocab_size(),
            model_config.vocab_size
        );
        ensure!(
            config.seq_len <= model_config.max_seq_len,
            "seq_len {} exceeds model max_seq_len {}",
            config.seq_len,
            model_config.max_seq_len
        );

        let target: String = target.into();
        ensure!(!target.trim().is_empty(), "target sequence is empty");

        if model_config.dropout > 0.0 {
            info!(
                "Disabling dropout ({}) so policy and reference score sequences identically",
                model_config.dropout
            );
        }
        let policy = policy.without_dropout();
        let reference = policy.valid();
        info!("Reference model parameters frozen.");

        Ok(Self {
            objective: GrpoLoss::new(config.kl_beta),
            config,
            model_config,
            policy,
            reference,
            optimizer,
            generator,
            reward_model,
            evaluator: LikelihoodEvaluator::new(tokenizer),
            target,
            checkpoint_root: checkpoint_root.into(),
            device,
            phase: Phase::Idle,
            global_step: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn policy(&self) -> &MaskedDiffusionModel<B> {
        &self.policy
    }

    pub fn reference(&self) -> &MaskedDiffusionModel<B::InnerBackend> {
        &self.reference
    }

    fn enter(&mut self, phase: Phase) {
        debug!("step {}: {} -> {}", self.global_step, self.phase, phase);
        self.phase = phase;
    }

    /// 执行一次完整的 GRPO 更新
    pub fn step(&mut self) -> anyhow::Result<StepReport> {
        let step = self.global_step;

        // 1. 采样 (无梯度)
        self.enter(Phase::Sampling);
        let sampler_model = self.policy.valid();
        let sequences = self
            .generator
            .generate(
                &sampler_model,
                self.evaluator.tokenizer(),
                self.config.seq_len,
                self.config.batch_size,
                &self.device,
            )
            .context("sampling failed")?;
        ensure!(
            sequences.len() == self.config.batch_size,
            "generator returned {} sequences, expected {}",
            sequences.len(),
            self.config.batch_size
        );

        // 2. 打分，并在非 autodiff 后端上计算优势
        self.enter(Phase::Scoring);
        let rewards = self.reward_model.score(&self.target, &sequences, step);
        let advantages = normalize_advantages(
            rewards.to_tensor::<B::InnerBackend>(&self.device),
            self.config.advantage_epsilon,
        );
        let advantages = Tensor::<B, 1>::from_inner(advantages);

        // 3. Policy NLL 带梯度，Reference NLL 不带
        self.enter(Phase::Evaluating);
        let policy_nll = self
            .evaluator
            .evaluate(&self.policy, &sequences, &self.device)
            .context("policy likelihood failed")?;
        let reference_nll = self
            .evaluator
            .evaluate(&self.reference, &sequences, &self.device)
            .context("reference likelihood failed")?;
        let log_ratios = log_likelihood_ratio(policy_nll, Tensor::from_inner(reference_nll));

        // 4. 损失必须有限，否则本步直接失败，不触碰 policy 参数
        self.enter(Phase::Updating);
        let output = self.objective.forward(log_ratios, advantages);
        let loss = output.loss.clone().into_scalar().elem::<f32>();
        ensure!(loss.is_finite(), "non-finite loss at step {}", step);

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.policy);
        self.policy = self
            .optimizer
            .step(self.config.learning_rate, self.policy.clone(), grads);

        let report = StepReport {
            step,
            loss,
            policy_objective: output.policy_objective.into_scalar().elem::<f32>(),
            kl_penalty: output.kl_penalty.into_scalar().elem::<f32>(),
            rewards: rewards.rewards,
            failures: rewards.failures,
        };
        debug!(
            "step {}: loss={:.4} policy={:.4} kl={:.4} mean_reward={:.3} failures={}",
            step,
            report.loss,
            report.policy_objective,
            report.kl_penalty,
            report.mean_reward(),
            report.failures
        );

        self.global_step += 1;
        Ok(report)
    }

    /// 跑完一个 epoch 并保存 checkpoint；`epoch` 从 1 开始
    pub fn run_epoch(&mut self, epoch: usize) -> anyhow::Result<EpochSummary> {
        let steps = self.config.steps_per_epoch;
        info!("--- Epoch {}/{} ---", epoch, self.config.epochs);

        let progress = ProgressBar::new(steps as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut total_loss = 0.0f32;
        let mut reward_sum = 0.0f32;
        let mut reward_count = 0usize;
        let mut failures = 0usize;

        for _ in 0..steps {
            let report = self.step()?;
            total_loss += report.loss;
            reward_sum += report.rewards.iter().sum::<f32>();
            reward_count += report.rewards.len();
            failures += report.failures;

            progress.inc(1);
            progress.set_message(format!(
                "Epoch {} Loss: {:.4}, Avg Reward: {:.2}",
                epoch,
                report.loss,
                reward_sum / reward_count.max(1) as f32
            ));
        }
        progress.finish_and_clear();

        let mean_loss = total_loss / steps as f32;
        let mean_reward = reward_sum / reward_count.max(1) as f32;

        self.enter(Phase::Checkpointing);
        let dir = checkpoint::epoch_dir(&self.checkpoint_root, epoch);
        checkpoint::save_checkpoint(
            &dir,
            &self.policy,
            &self.model_config,
            self.evaluator.tokenizer(),
        )?;

        info!(
            "Epoch {} finished. Average Loss: {:.4}, Average Reward: {:.2}, scoring failures: {}",
            epoch, mean_loss, mean_reward, failures
        );
        info!("Policy model checkpoint saved to {:?}", dir);

        Ok(EpochSummary {
            epoch,
            mean_loss,
            mean_reward,
            failures,
            checkpoint: dir,
        })
    }

    /// 完整训练: 共 `epochs` 个 epoch，每个 epoch 结束保存一次
    pub fn fit(&mut self) -> anyhow::Result<Vec<EpochSummary>> {
        info!("Starting GRPO fine-tuning...");
        let mut summaries = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            summaries.push(self.run_epoch(epoch)?);
        }
        self.enter(Phase::Done);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{get_device, MyAutodiffBackend};
    use crate::infer::{OrderAgnosticSampler, SamplingConfig};
    use crate::train::reward::RewardBatch;

    /// 按序列中 'A' 的比例给奖励
    struct AlanineReward;

    impl RewardModel for AlanineReward {
        fn score(&self, _target: &str, sequences: &[String], _step: usize) -> RewardBatch {
            let rewards = sequences
                .iter()
                .map(|s| s.chars().filter(|&c| c == 'A').count() as f32 / s.len() as f32)
                .collect();
            RewardBatch {
                rewards,
                failures: 0,
            }
        }
    }

    #[test]
    fn test_single_step_updates_policy_not_reference() {
        let device = get_device();
        let model_config = DiffusionConfig::tiny();
        let config = GrpoTrainingConfig::new()
            .with_batch_size(4)
            .with_seq_len(6)
            .with_learning_rate(1e-2)
            .with_epochs(1)
            .with_steps_per_epoch(1);
        let tokenizer = ProteinTokenizer::new().unwrap();
        let policy = MaskedDiffusionModel::<MyAutodiffBackend>::new(&model_config, &device);
        let root = tempfile::tempdir().unwrap();

        let mut trainer = GrpoTrainer::new(
            config.clone(),
            model_config,
            policy,
            tokenizer.clone(),
            &tokenizer,
            config.init_optimizer::<MyAutodiffBackend>(),
            OrderAgnosticSampler::new(&SamplingConfig::new().with_seed(Some(1))),
            AlanineReward,
            "MKTAYIAKQR",
            root.path(),
            device.clone(),
        )
        .unwrap();
        assert_eq!(trainer.phase(), Phase::Idle);

        let seqs = vec!["ACDEFG".to_string()];
        let evaluator = LikelihoodEvaluator::new(tokenizer);
        let before = evaluator
            .evaluate(trainer.reference(), &seqs, &device)
            .unwrap()
            .into_scalar();

        let report = trainer.step().unwrap();
        assert_eq!(report.rewards.len(), 4);
        // 奖励是 'A' 的比例
        assert!((0.0..=1.0).contains(&report.mean_reward()));
        assert!(report.loss.is_finite());
        assert!((report.loss - (report.policy_objective + report.kl_penalty)).abs() < 1e-5);

        // reference 不变，policy 已更新
        let reference_after = evaluator
            .evaluate(trainer.reference(), &seqs, &device)
            .unwrap()
            .into_scalar();
        let policy_after = evaluator
            .evaluate(&trainer.policy().valid(), &seqs, &device)
            .unwrap()
            .into_scalar();
        assert_eq!(before, reference_after);
        assert!((policy_after - reference_after).abs() > 0.0);
    }

    #[test]
    fn test_rejects_mismatched_tokenizer_vocab() {
        let device = get_device();
        let mut model_config = DiffusionConfig::tiny();
        model_config.vocab_size += 1;
        let config = GrpoTrainingConfig::new();
        let tokenizer = ProteinTokenizer::new().unwrap();
        let policy = MaskedDiffusionModel::<MyAutodiffBackend>::new(&model_config, &device);

        let result = GrpoTrainer::new(
            config.clone(),
            model_config,
            policy,
            tokenizer.clone(),
            &tokenizer,
            config.init_optimizer::<MyAutodiffBackend>(),
            OrderAgnosticSampler::new(&SamplingConfig::new()),
            AlanineReward,
            "MKT",
            "unused",
            device,
        );
        assert!(result.is_err());
    }

    /// 所有奖励都是 NaN，优势和损失随之变成 NaN
    struct NanReward;

    impl RewardModel for NanReward {
        fn score(&self, _target: &str, sequences: &[String], _step: usize) -> RewardBatch {
            RewardBatch {
                rewards: vec![f32::NAN; sequences.len()],
                failures: 0,
            }
        }
    }

    #[test]
    fn test_non_finite_loss_leaves_policy_untouched() {
        let device = get_device();
        let model_config = DiffusionConfig::tiny();
        let config = GrpoTrainingConfig::new()
            .with_batch_size(4)
            .with_seq_len(6)
            .with_learning_rate(1e-2);
        let tokenizer = ProteinTokenizer::new().unwrap();
        let policy = MaskedDiffusionModel::<MyAutodiffBackend>::new(&model_config, &device);
        let root = tempfile::tempdir().unwrap();

        let mut trainer = GrpoTrainer::new(
            config.clone(),
            model_config,
            policy,
            tokenizer.clone(),
            &tokenizer,
            config.init_optimizer::<MyAutodiffBackend>(),
            OrderAgnosticSampler::new(&SamplingConfig::new().with_seed(Some(3))),
            NanReward,
            "MKTAYIAKQR",
            root.path(),
            device.clone(),
        )
        .unwrap();

        let seqs = vec!["ACDEFG".to_string(), "MKTAYI".to_string()];
        let evaluator = LikelihoodEvaluator::new(tokenizer);
        let nll = |model: &MaskedDiffusionModel<_>| -> Vec<f32> {
            evaluator
                .evaluate(model, &seqs, &device)
                .unwrap()
                .into_data()
                .iter::<f32>()
                .collect()
        };

        let before = nll(&trainer.policy().valid());
        assert!(trainer.step().is_err());
        let after = nll(&trainer.policy().valid());
        assert_eq!(before, after);
    }

    #[test]
    fn test_dropout_does_not_split_policy_and_reference() {
        let device = get_device();
        let mut model_config = DiffusionConfig::tiny();
        model_config.dropout = 0.5;
        let config = GrpoTrainingConfig::new().with_batch_size(4).with_seq_len(6);
        let tokenizer = ProteinTokenizer::new().unwrap();
        let policy = MaskedDiffusionModel::<MyAutodiffBackend>::new(&model_config, &device);
        let root = tempfile::tempdir().unwrap();

        let trainer = GrpoTrainer::new(
            config.clone(),
            model_config,
            policy,
            tokenizer.clone(),
            &tokenizer,
            config.init_optimizer::<MyAutodiffBackend>(),
            OrderAgnosticSampler::new(&SamplingConfig::new()),
            AlanineReward,
            "MKTAYIAKQR",
            root.path(),
            device.clone(),
        )
        .unwrap();

        // 训练路径 (autodiff) 与 reference 路径在同一份权重上必须给出相同的 NLL
        let seqs = vec!["ACDEFGHIKL".to_string(), "MKTAYI".to_string()];
        let evaluator = LikelihoodEvaluator::new(tokenizer);
        let reference: Vec<f32> = evaluator
            .evaluate(trainer.reference(), &seqs, &device)
            .unwrap()
            .into_data()
            .iter::<f32>()
            .collect();
        for _ in 0..3 {
            let policy: Vec<f32> = evaluator
                .evaluate(trainer.policy(), &seqs, &device)
                .unwrap()
                .into_data()
                .iter::<f32>()
                .collect();
            for (p, r) in policy.iter().zip(&reference) {
                assert!((p - r).abs() < 1e-4, "{} vs {}", p, r);
            }
        }
    }
}
