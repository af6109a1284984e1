use std::path::PathBuf;

use thiserror::Error;

/// 单条序列打分失败的原因
///
/// 进程类错误与解析类错误分开，日志里可以直接看出是预测器没跑起来
/// 还是输出文件不符合预期。
#[derive(Debug, Error)]
pub enum OracleError {
    /// 写输入文件或建目录失败
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 预测器进程无法启动
    #[error("failed to spawn predictor `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 预测器以非零状态退出
    #[error("predictor exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },

    /// 预测器超时，已被终止
    #[error("predictor timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// 预测器退出成功但没有写出预期文件
    #[error("missing predictor output {0:?}")]
    MissingOutput(PathBuf),

    /// 输出文件不是合法 JSON 或字段缺失
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ranking has no models")]
    EmptyRanking,

    #[error("ranking has no confidence for model {0}")]
    UnknownModel(String),

    #[error("model {0} reported an empty per-residue confidence array")]
    EmptyConfidence(String),

    /// 进程内后端 (测试桩、远程服务等) 的失败
    #[error("oracle backend error: {0}")]
    Backend(String),
}

impl OracleError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 进程类失败 (启动失败、非零退出、超时)
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::ProcessFailed { .. } | Self::Timeout(_)
        )
    }
}
