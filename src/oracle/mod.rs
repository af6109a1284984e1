// 结构预测打分接口
//
// 训练循环只依赖 `StructureOracle`，具体后端可以是外部预测进程
// (`ExternalPredictor`)、测试用的进程内桩或者远程服务。

pub mod error;
pub mod external;
pub mod process;

pub use error::OracleError;
pub use external::{ExternalPredictor, PredictorConfig};

/// 一次打分请求；`step` 和 `index` 用于给输出文件分命名空间
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub target: &'a str,
    pub candidate: &'a str,
    pub step: usize,
    pub index: usize,
}

/// 预测器对排名第一的模型给出的置信度
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub model_name: String,
    /// 排名置信度 (多聚体预测中通常是 0.8·ipTM + 0.2·pTM)
    pub confidence: f64,
    /// 逐残基置信度 (pLDDT)
    pub per_residue_confidence: Vec<f64>,
}

impl Prediction {
    pub fn mean_per_residue_confidence(&self) -> f64 {
        if self.per_residue_confidence.is_empty() {
            return 0.0;
        }
        self.per_residue_confidence.iter().sum::<f64>() / self.per_residue_confidence.len() as f64
    }
}

pub trait StructureOracle {
    fn score(&self, request: &ScoreRequest<'_>) -> Result<Prediction, OracleError>;
}

impl<T: StructureOracle + ?Sized> StructureOracle for Box<T> {
    fn score(&self, request: &ScoreRequest<'_>) -> Result<Prediction, OracleError> {
        (**self).score(request)
    }
}
