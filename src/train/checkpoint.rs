use std::path::{Path, PathBuf};

use anyhow::{ensure, Context};
use burn::tensor::backend::Backend;

use crate::data::ProteinTokenizer;
use crate::model::{DiffusionConfig, MaskedDiffusionModel, MODEL_CONFIG_FILE};

pub const CHECKPOINT_PREFIX: &str = "grpo_checkpoint_epoch_";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// `{root}/grpo_checkpoint_epoch_{epoch}`
pub fn epoch_dir(root: &Path, epoch: usize) -> PathBuf {
    root.join(format!("{}{}", CHECKPOINT_PREFIX, epoch))
}

/// 保存一个完整的 checkpoint 目录: 权重、模型结构配置和分词器
pub fn save_checkpoint<B: Backend>(
    dir: &Path,
    model: &MaskedDiffusionModel<B>,
    config: &DiffusionConfig,
    tokenizer: &ProteinTokenizer,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create checkpoint dir {:?}", dir))?;
    model.save_checkpoint(dir)?;
    config.save(dir.join(MODEL_CONFIG_FILE))?;
    tokenizer.save(dir.join(TOKENIZER_FILE))?;
    Ok(())
}

/// 加载 checkpoint 目录: 权重、模型结构配置和分词器
pub fn load_checkpoint<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> anyhow::Result<(MaskedDiffusionModel<B>, DiffusionConfig, ProteinTokenizer)> {
    let config = DiffusionConfig::load(dir.join(MODEL_CONFIG_FILE))?;
    let tokenizer = load_tokenizer(dir)?;
    ensure!(
        tokenizer.vocab_size() == config.vocab_size,
        "checkpoint {:?}: tokenizer vocab size {} does not match model vocab size {}",
        dir,
        tokenizer.vocab_size(),
        config.vocab_size
    );

    let model = MaskedDiffusionModel::load_checkpoint(dir, &config, device)?;

    Ok((model, config, tokenizer))
}

/// 读取 checkpoint 目录里的分词器，不存在时使用内置字母表
pub fn load_tokenizer(dir: &Path) -> anyhow::Result<ProteinTokenizer> {
    let path = dir.join(TOKENIZER_FILE);
    if path.exists() {
        ProteinTokenizer::from_file(&path)
    } else {
        ProteinTokenizer::new()
    }
}

/// 查找 `root` 下最新的 epoch checkpoint
pub fn find_latest_epoch(root: &Path) -> Option<usize> {
    std::fs::read_dir(root)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()?
                .strip_prefix(CHECKPOINT_PREFIX)?
                .parse::<usize>()
                .ok()
        })
        .max()
}
