use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use tokenizers::Tokenizer;

pub mod batch;

pub use batch::{SequenceBatch, SequenceBatcher};

/// 20 种标准氨基酸，采样时只允许输出这些残基
pub const CANONICAL_RESIDUES: &str = "ACDEFGHIKLMNPQRSTVWY";
/// 完整字母表: 标准残基 + 模糊残基 + gap/stop/mask/start/pad
pub const ALPHABET: &str = "ACDEFGHIKLMNPQRSTVWYBZXJOU-*#@!";

pub const MASK_TOKEN: &str = "#";
pub const PAD_TOKEN: &str = "!";
const UNK_TOKEN: &str = "X";

/// 蛋白序列分词器
///
/// 每个残基对应一个 token，底层使用 `tokenizers` 的 WordLevel 词表，
/// 因此可以和其它模型共享同一份 `tokenizer.json`。
#[derive(Clone)]
pub struct ProteinTokenizer {
    tokenizer: Tokenizer,
    pad_id: u32,
    mask_id: u32,
}

impl ProteinTokenizer {
    /// 使用内置字母表构建分词器
    pub fn new() -> anyhow::Result<Self> {
        let vocab: serde_json::Map<String, serde_json::Value> = ALPHABET
            .chars()
            .enumerate()
            .map(|(id, c)| (c.to_string(), serde_json::Value::from(id as u32)))
            .collect();

        let definition = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": null,
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN,
            }
        });

        let tokenizer = Tokenizer::from_str(&definition.to_string()).map_err(anyhow::Error::msg)?;
        Self::from_tokenizer(tokenizer)
    }

    /// 从 `tokenizer.json` 加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("failed to load tokenizer {:?}", path.as_ref()))?;
        Self::from_tokenizer(tokenizer)
    }

    fn from_tokenizer(tokenizer: Tokenizer) -> anyhow::Result<Self> {
        let pad_id = tokenizer
            .token_to_id(PAD_TOKEN)
            .context("tokenizer has no pad token")?;
        let mask_id = tokenizer
            .token_to_id(MASK_TOKEN)
            .context("tokenizer has no mask token")?;
        Ok(Self {
            tokenizer,
            pad_id,
            mask_id,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        self.tokenizer
            .save(path.as_ref(), true)
            .map_err(anyhow::Error::msg)
    }

    /// 逐残基编码，未知残基直接报错
    pub fn encode(&self, sequence: &str) -> anyhow::Result<Vec<u32>> {
        sequence
            .trim()
            .chars()
            .map(|c| {
                let mut buf = [0u8; 4];
                self.tokenizer
                    .token_to_id(c.encode_utf8(&mut buf))
                    .with_context(|| format!("unknown residue {:?} in sequence", c))
            })
            .collect()
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.tokenizer.id_to_token(id))
            .collect()
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn mask_id(&self) -> u32 {
        self.mask_id
    }

    /// 采样时允许输出的 token id
    pub fn canonical_ids(&self) -> Vec<u32> {
        CANONICAL_RESIDUES
            .chars()
            .filter_map(|c| self.tokenizer.token_to_id(&c.to_string()))
            .collect()
    }

    /// Policy 和 Reference 必须共享同一份词表，否则 log ratio 没有意义
    pub fn ensure_same_vocab(&self, other: &ProteinTokenizer) -> anyhow::Result<()> {
        if self.vocab_size() != other.vocab_size() {
            bail!(
                "tokenizers must be the same: vocab size {} vs {}",
                self.vocab_size(),
                other.vocab_size()
            );
        }
        for id in 0..self.vocab_size() as u32 {
            let ours = self.tokenizer.id_to_token(id);
            let theirs = other.tokenizer.id_to_token(id);
            if ours != theirs {
                bail!(
                    "tokenizers must be the same: id {} maps to {:?} vs {:?}",
                    id,
                    ours,
                    theirs
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_roundtrip() {
        let tokenizer = ProteinTokenizer::new().unwrap();
        assert_eq!(tokenizer.vocab_size(), ALPHABET.chars().count());

        let ids = tokenizer.encode("MKTAYIAK").unwrap();
        assert_eq!(ids.len(), 8);
        assert_eq!(tokenizer.decode(&ids), "MKTAYIAK");
    }

    #[test]
    fn test_special_ids() {
        let tokenizer = ProteinTokenizer::new().unwrap();
        assert_eq!(tokenizer.mask_id(), 28);
        assert_eq!(tokenizer.pad_id(), 30);

        let canonical = tokenizer.canonical_ids();
        assert_eq!(canonical.len(), 20);
        assert!(!canonical.contains(&tokenizer.pad_id()));
        assert!(!canonical.contains(&tokenizer.mask_id()));
    }

    #[test]
    fn test_unknown_residue_rejected() {
        let tokenizer = ProteinTokenizer::new().unwrap();
        assert!(tokenizer.encode("MK1A").is_err());
    }

    #[test]
    fn test_saved_tokenizer_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");

        let tokenizer = ProteinTokenizer::new().unwrap();
        tokenizer.save(&path).unwrap();
        let loaded = ProteinTokenizer::from_file(&path).unwrap();

        tokenizer.ensure_same_vocab(&loaded).unwrap();
        assert_eq!(loaded.mask_id(), tokenizer.mask_id());
    }
}
