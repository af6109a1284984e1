use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::config::Config;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use protgrpo::backend::{get_device, MyAutodiffBackend, MyBackend};
use protgrpo::train::checkpoint;
use protgrpo::train::{OracleReward, RewardConfig, RewardModel};
use protgrpo::{
    DiffusionConfig, ExternalPredictor, GrpoTrainer, GrpoTrainingConfig, MaskedDiffusionModel,
    OrderAgnosticSampler, PredictorConfig, ProteinTokenizer, SamplingConfig, SequenceGenerator,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModelPreset {
    Tiny,
    Small,
}

impl ModelPreset {
    fn config(self) -> DiffusionConfig {
        match self {
            ModelPreset::Tiny => DiffusionConfig::tiny(),
            ModelPreset::Small => DiffusionConfig::small(),
        }
    }
}

#[derive(clap::Args)]
struct TargetArgs {
    /// 目标蛋白序列
    #[arg(long, conflicts_with = "target_fasta")]
    target: Option<String>,
    /// 从 FASTA 文件读取目标序列 (取第一条记录)
    #[arg(long)]
    target_fasta: Option<PathBuf>,
}

#[derive(clap::Args)]
struct PredictorArgs {
    /// 结构预测包装脚本，调用方式为 `<predictor> [args..] <fasta> <output_dir>`
    #[arg(long, default_value = "run_af2_multimer.sh")]
    predictor: String,
    /// 额外传给预测器的参数，可重复
    #[arg(long = "predictor-arg", allow_hyphen_values = true)]
    predictor_args: Vec<String>,
    /// 单条序列的超时秒数，0 表示不限时
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,
    /// 预测器输入输出文件的根目录
    #[arg(long, default_value = "af2_multimer_outputs")]
    output_root: PathBuf,
}

impl PredictorArgs {
    fn build(self) -> ExternalPredictor {
        let timeout = (self.timeout_secs > 0).then_some(self.timeout_secs);
        let config = PredictorConfig::new(self.predictor)
            .with_args(self.predictor_args)
            .with_timeout_secs(timeout);
        ExternalPredictor::new(config, self.output_root)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// 写出默认训练配置
    InitConfig {
        #[arg(short, long, default_value = "grpo.json")]
        output: PathBuf,
    },
    /// 运行 GRPO 微调
    Train {
        /// JSON 训练配置，缺省时使用默认超参数
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        predictor: PredictorArgs,
        /// 每个 epoch 的 checkpoint 目录所在位置
        #[arg(long, default_value = ".")]
        checkpoint_root: PathBuf,
        /// 预训练 checkpoint 目录；policy 和 reference 都从这里加载
        #[arg(long)]
        pretrained: Option<PathBuf>,
        /// 没有预训练 checkpoint 时使用的模型规模
        #[arg(long, value_enum, default_value = "small")]
        model_preset: ModelPreset,
        /// 没有预训练 checkpoint 时使用的分词器文件
        #[arg(long)]
        tokenizer_path: Option<PathBuf>,
    },
    /// 从 checkpoint 采样序列
    Generate {
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(short = 'n', long, default_value_t = 8)]
        count: usize,
        #[arg(long, default_value_t = 100)]
        seq_len: usize,
        #[arg(long, default_value_t = 1.0)]
        temperature: f64,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// 用结构预测器给若干序列打分
    Score {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        predictor: PredictorArgs,
        #[arg(long = "sequence", required = true)]
        sequences: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { output } => {
            GrpoTrainingConfig::new()
                .save(&output)
                .with_context(|| format!("failed to write {:?}", output))?;
            println!("Default config written to {:?}", output);
        }
        Commands::Train {
            config,
            target,
            predictor,
            checkpoint_root,
            pretrained,
            model_preset,
            tokenizer_path,
        } => {
            let config = match config {
                Some(path) => GrpoTrainingConfig::load(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to load config {:?}: {:?}", path, e))?,
                None => GrpoTrainingConfig::new(),
            };
            let target = read_target(target)?;
            let device = get_device();
            info!("Using device: {:?}", device);

            info!("Loading models...");
            let (policy, model_config, tokenizer, reference_tokenizer) = match &pretrained {
                Some(dir) => {
                    let (policy, model_config, tokenizer) =
                        checkpoint::load_checkpoint::<MyAutodiffBackend>(dir, &device)?;
                    let reference_tokenizer = checkpoint::load_tokenizer(dir)?;
                    (policy, model_config, tokenizer, reference_tokenizer)
                }
                None => {
                    warn!("No pretrained checkpoint given, starting from a fresh initialisation");
                    let model_config = model_preset.config();
                    let policy = MaskedDiffusionModel::new(&model_config, &device);
                    let tokenizer = load_tokenizer(tokenizer_path.as_deref())?;
                    let reference_tokenizer = load_tokenizer(tokenizer_path.as_deref())?;
                    (policy, model_config, tokenizer, reference_tokenizer)
                }
            };

            let reward = OracleReward::new(predictor.build(), config.reward.clone());
            let sampler = OrderAgnosticSampler::new(&config.sampling);
            let optimizer = config.init_optimizer::<MyAutodiffBackend>();

            let mut trainer = GrpoTrainer::new(
                config,
                model_config,
                policy,
                tokenizer,
                &reference_tokenizer,
                optimizer,
                sampler,
                reward,
                target,
                checkpoint_root,
                device,
            )?;
            let summaries = trainer.fit()?;

            for summary in summaries {
                println!(
                    "epoch {:>3}  loss {:>10.4}  reward {:>8.2}  failures {:>4}  {:?}",
                    summary.epoch,
                    summary.mean_loss,
                    summary.mean_reward,
                    summary.failures,
                    summary.checkpoint
                );
            }
        }
        Commands::Generate {
            checkpoint,
            count,
            seq_len,
            temperature,
            seed,
        } => {
            let device = get_device();
            let (model, _config, tokenizer) =
                checkpoint::load_checkpoint::<MyBackend>(&checkpoint, &device)?;
            let mut sampler = OrderAgnosticSampler::new(
                &SamplingConfig::new()
                    .with_temperature(temperature)
                    .with_seed(seed),
            );

            let sequences = sampler.generate(&model, &tokenizer, seq_len, count, &device)?;
            for (i, sequence) in sequences.iter().enumerate() {
                println!(">sample_{}\n{}", i, sequence);
            }
        }
        Commands::Score {
            target,
            predictor,
            sequences,
        } => {
            let target = read_target(target)?;
            let reward = OracleReward::new(predictor.build(), RewardConfig::new());
            let batch = reward.score(&target, &sequences, 0);
            for (sequence, value) in sequences.iter().zip(&batch.rewards) {
                println!("{:>10.4}  {}", value, sequence);
            }
            println!("mean reward: {:.4}  failures: {}", batch.mean(), batch.failures);
        }
    }

    Ok(())
}

fn load_tokenizer(path: Option<&Path>) -> anyhow::Result<ProteinTokenizer> {
    match path {
        Some(path) => ProteinTokenizer::from_file(path),
        None => ProteinTokenizer::new(),
    }
}

fn read_target(args: TargetArgs) -> anyhow::Result<String> {
    match (args.target, args.target_fasta) {
        (Some(target), _) => Ok(target.trim().to_string()),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {:?}", path))?;
            first_fasta_record(&text).with_context(|| format!("no sequence in {:?}", path))
        }
        (None, None) => anyhow::bail!("either --target or --target-fasta is required"),
    }
}

/// 取 FASTA 中第一条记录的序列 (多行拼接)
fn first_fasta_record(text: &str) -> Option<String> {
    let mut lines = text.lines().map(str::trim).skip_while(|l| l.is_empty());
    let first = lines.next()?;

    let mut sequence = String::new();
    if !first.starts_with('>') {
        sequence.push_str(first);
    }
    for line in lines {
        if line.starts_with('>') {
            break;
        }
        sequence.push_str(line);
    }

    (!sequence.is_empty()).then_some(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fasta_record() {
        let text = ">gzmk\nIIGGKEV\nSPHSRP\n>other\nAAAA\n";
        assert_eq!(first_fasta_record(text).as_deref(), Some("IIGGKEVSPHSRP"));
        assert_eq!(first_fasta_record(">empty\n"), None);
        assert_eq!(first_fasta_record("MKT\n").as_deref(), Some("MKT"));
    }
}
