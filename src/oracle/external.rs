use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use burn::config::Config;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::oracle::error::OracleError;
use crate::oracle::process::run_command;
use crate::oracle::{Prediction, ScoreRequest, StructureOracle};

/// 预测器写出的排名文件
pub const RANKING_FILE: &str = "ranking_debug.json";

#[derive(Config, Debug)]
pub struct PredictorConfig {
    /// 预测器可执行文件 (通常是包装 AlphaFold-Multimer 的脚本)
    pub program: String,
    /// 放在 `<fasta> <job_dir>` 之前的额外参数
    #[config(default = "Vec::new()")]
    pub args: Vec<String>,
    /// 单条序列的超时秒数；None 表示一直等待
    #[config(default = "Some(3600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RankingSummary {
    order: Vec<String>,
    #[serde(alias = "iptm+ptm", alias = "plddts")]
    ranking_confidences: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct ModelResult {
    plddt: Vec<f64>,
}

/// 基于文件交互的外部结构预测后端
///
/// 每条序列的输入输出都放在 `output_root/step_{s}/` 下:
/// - `seq_{i}.fasta`: `>target` 与 `>binder` 两条记录
/// - `job_{i}/`: 预测器输出目录，包含 `ranking_debug.json` 和 `result_{model}.json`
///
/// 这些文件不会被自动清理。
pub struct ExternalPredictor {
    config: PredictorConfig,
    output_root: PathBuf,
}

impl ExternalPredictor {
    pub fn new(config: PredictorConfig, output_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_root: output_root.into(),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout_secs.map(Duration::from_secs)
    }
}

impl StructureOracle for ExternalPredictor {
    fn score(&self, request: &ScoreRequest<'_>) -> Result<Prediction, OracleError> {
        let step_dir = self.output_root.join(format!("step_{}", request.step));
        fs::create_dir_all(&step_dir).map_err(|e| OracleError::io(&step_dir, e))?;

        let fasta_path = step_dir.join(format!("seq_{}.fasta", request.index));
        write_complex_fasta(&fasta_path, request.target, request.candidate)?;

        // 同一目录可能残留上一次运行的结果，先清掉以免读到旧文件
        let job_dir = step_dir.join(format!("job_{}", request.index));
        if job_dir.exists() {
            fs::remove_dir_all(&job_dir).map_err(|e| OracleError::io(&job_dir, e))?;
        }
        fs::create_dir_all(&job_dir).map_err(|e| OracleError::io(&job_dir, e))?;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(&fasta_path)
            .arg(&job_dir);
        run_command(command, self.timeout())?.check()?;

        read_prediction(&job_dir)
    }
}

/// 写出 target + binder 两条记录的 FASTA
pub fn write_complex_fasta(path: &Path, target: &str, binder: &str) -> Result<(), OracleError> {
    let content = format!(">target\n{}\n>binder\n{}\n", target.trim(), binder.trim());
    fs::write(path, content).map_err(|e| OracleError::io(path, e))
}

/// 从预测器输出目录解析排名第一的模型及其 pLDDT
pub fn read_prediction(job_dir: &Path) -> Result<Prediction, OracleError> {
    let ranking: RankingSummary = read_json(&job_dir.join(RANKING_FILE))?;

    let model_name = ranking
        .order
        .into_iter()
        .next()
        .ok_or(OracleError::EmptyRanking)?;
    let confidence = *ranking
        .ranking_confidences
        .get(&model_name)
        .ok_or_else(|| OracleError::UnknownModel(model_name.clone()))?;

    let result: ModelResult = read_json(&job_dir.join(format!("result_{}.json", model_name)))?;
    if result.plddt.is_empty() {
        return Err(OracleError::EmptyConfidence(model_name));
    }

    Ok(Prediction {
        model_name,
        confidence,
        per_residue_confidence: result.plddt,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, OracleError> {
    if !path.exists() {
        return Err(OracleError::MissingOutput(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|e| OracleError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| OracleError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_read_prediction() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(RANKING_FILE),
            r#"{"order": ["model_2", "model_1"], "ranking_confidences": {"model_1": 0.4, "model_2": 0.8}}"#,
        );
        write(
            &dir.path().join("result_model_2.json"),
            r#"{"plddt": [80.0, 90.0, 70.0]}"#,
        );

        let prediction = read_prediction(dir.path()).unwrap();
        assert_eq!(prediction.model_name, "model_2");
        assert!((prediction.confidence - 0.8).abs() < 1e-12);
        assert!((prediction.mean_per_residue_confidence() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_alphafold_ranking_key() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(RANKING_FILE),
            r#"{"iptm+ptm": {"model_1_multimer_v3_pred_0": 0.65}, "order": ["model_1_multimer_v3_pred_0"]}"#,
        );
        write(
            &dir.path().join("result_model_1_multimer_v3_pred_0.json"),
            r#"{"plddt": [50.0]}"#,
        );

        let prediction = read_prediction(dir.path()).unwrap();
        assert!((prediction.confidence - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_missing_and_corrupt_outputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_prediction(dir.path()),
            Err(OracleError::MissingOutput(_))
        ));

        write(&dir.path().join(RANKING_FILE), "{not json");
        assert!(matches!(
            read_prediction(dir.path()),
            Err(OracleError::Parse { .. })
        ));

        write(
            &dir.path().join(RANKING_FILE),
            r#"{"order": [], "ranking_confidences": {}}"#,
        );
        assert!(matches!(
            read_prediction(dir.path()),
            Err(OracleError::EmptyRanking)
        ));

        write(
            &dir.path().join(RANKING_FILE),
            r#"{"order": ["m"], "ranking_confidences": {"other": 1.0}}"#,
        );
        assert!(matches!(
            read_prediction(dir.path()),
            Err(OracleError::UnknownModel(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_predictor_process() {
        let root = tempfile::tempdir().unwrap();
        // $1 = fasta, $2 = job_dir
        let script = r#"
            grep -q '^>binder' "$1" || exit 1
            echo '{"order": ["m1"], "ranking_confidences": {"m1": 0.5}}' > "$2/ranking_debug.json"
            echo '{"plddt": [60.0, 80.0]}' > "$2/result_m1.json"
        "#;
        let config = PredictorConfig::new("sh".to_string()).with_args(vec![
            "-c".to_string(),
            script.to_string(),
            "fake-predictor".to_string(),
        ]);
        let predictor = ExternalPredictor::new(config, root.path());

        let request = ScoreRequest {
            target: "MKTAYIAKQR",
            candidate: "GSGSGS",
            step: 3,
            index: 1,
        };
        let prediction = predictor.score(&request).unwrap();
        assert_eq!(prediction.model_name, "m1");
        assert!((prediction.mean_per_residue_confidence() - 70.0).abs() < 1e-9);

        let fasta = fs::read_to_string(root.path().join("step_3/seq_1.fasta")).unwrap();
        assert_eq!(fasta, ">target\nMKTAYIAKQR\n>binder\nGSGSGS\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_predictor_is_process_error() {
        let root = tempfile::tempdir().unwrap();
        let config = PredictorConfig::new("sh".to_string()).with_args(vec![
            "-c".to_string(),
            "exit 2".to_string(),
            "fake-predictor".to_string(),
        ]);
        let predictor = ExternalPredictor::new(config, root.path());

        let request = ScoreRequest {
            target: "MK",
            candidate: "GS",
            step: 0,
            index: 0,
        };
        let err = predictor.score(&request).unwrap_err();
        assert!(err.is_process_error());
    }
}
