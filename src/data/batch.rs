use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

/// 右侧补齐到同一长度的 token 批次
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    /// [Batch, MaxLen]，补齐位置为 pad_id
    pub tokens: Tensor<B, 2, Int>,
    /// [Batch]，每条序列未补齐前的真实长度
    pub lengths: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct SequenceBatcher<B: Backend> {
    pad_id: u32,
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> SequenceBatcher<B> {
    pub fn new(pad_id: u32) -> Self {
        Self {
            pad_id,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, Vec<u32>, SequenceBatch<B>> for SequenceBatcher<B> {
    fn batch(&self, items: Vec<Vec<u32>>, device: &B::Device) -> SequenceBatch<B> {
        let batch_size = items.len();
        let max_len = items.iter().map(|ids| ids.len()).max().unwrap_or(0);

        let mut tokens = Vec::with_capacity(batch_size * max_len);
        let mut lengths = Vec::with_capacity(batch_size);

        for ids in items {
            lengths.push(ids.len() as i64);
            tokens.extend(ids.iter().map(|&id| id as i64));
            tokens.extend(std::iter::repeat(self.pad_id as i64).take(max_len - ids.len()));
        }

        SequenceBatch {
            tokens: Tensor::from_data(TensorData::new(tokens, [batch_size, max_len]), device),
            lengths: Tensor::from_data(TensorData::new(lengths, [batch_size]), device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{get_device, MyBackend};

    #[test]
    fn test_right_padding() {
        let device = get_device();
        let batcher = SequenceBatcher::<MyBackend>::new(30);

        let batch = batcher.batch(vec![vec![1, 2, 3], vec![4]], &device);
        assert_eq!(batch.tokens.dims(), [2, 3]);

        let tokens: Vec<i64> = batch
            .tokens
            .into_data()
            .convert::<i64>()
            .iter::<i64>()
            .collect();
        assert_eq!(tokens, vec![1, 2, 3, 4, 30, 30]);

        let lengths: Vec<i64> = batch
            .lengths
            .into_data()
            .convert::<i64>()
            .iter::<i64>()
            .collect();
        assert_eq!(lengths, vec![3, 1]);
    }
}
