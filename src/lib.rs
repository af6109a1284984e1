pub mod backend;
pub mod data;
pub mod infer;
pub mod model;
pub mod oracle;
pub mod train;

// 重新导出常用类型
pub use data::ProteinTokenizer;
pub use infer::{OrderAgnosticSampler, SamplingConfig, SequenceGenerator};
pub use model::{DiffusionConfig, MaskedDiffusionModel};
pub use oracle::{ExternalPredictor, PredictorConfig, StructureOracle};
pub use train::{GrpoTrainer, GrpoTrainingConfig};
