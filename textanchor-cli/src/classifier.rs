//! Classifiers available from the command line.
//!
//! The keyword classifier is built in; any other model runs as an external
//! process that receives a JSON array of texts on stdin and prints a JSON
//! array of labels or score rows on stdout.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use textanchor_core::{BoxError, ClassifierSettings, PredictorOutput, TextClassifier};
use tracing::debug;

/// Positive class when any keyword occurs as a word, negative otherwise.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
    positive: i64,
    negative: i64,
}

impl KeywordClassifier {
    pub fn new(keywords: &[String], positive: i64, negative: i64) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.trim().to_lowercase()).collect(),
            positive,
            negative,
        }
    }

    fn classify(&self, text: &str) -> i64 {
        let hit = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .any(|w| self.keywords.iter().any(|k| *k == w.to_lowercase()));
        if hit { self.positive } else { self.negative }
    }
}

impl TextClassifier for KeywordClassifier {
    fn predict(&self, texts: &[String]) -> Result<PredictorOutput, BoxError> {
        Ok(PredictorOutput::Labels(
            texts.iter().map(|t| self.classify(t)).collect(),
        ))
    }
}

/// Classifier backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("classifier command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl TextClassifier for CommandClassifier {
    fn predict(&self, texts: &[String]) -> Result<PredictorOutput, BoxError> {
        debug!(program = %self.program, batch = texts.len(), "Running classifier command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.program))?;

        let input = serde_json::to_vec(texts)?;
        let Some(mut stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!("no stdin pipe to {}", self.program).into());
        };
        // stdout and stderr are drained while the input is still being written.
        let writer = thread::spawn(move || stdin.write_all(&input));
        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| format!("writer thread for {} panicked", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "classifier command failed (exit {}): {}",
                output.status,
                stderr.trim()
            )
            .into());
        }
        written.map_err(|e| format!("failed to write texts to {}: {e}", self.program))?;
        let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(PredictorOutput::Json(value))
    }
}

/// Pick the classifier: an explicit command wins over keywords.
pub fn from_settings(settings: &ClassifierSettings) -> anyhow::Result<Arc<dyn TextClassifier>> {
    if let Some(command) = &settings.command {
        return Ok(Arc::new(CommandClassifier::new(command)?));
    }
    if settings.keywords.is_empty() {
        anyhow::bail!("no classifier configured: pass --keyword or --classifier-cmd");
    }
    Ok(Arc::new(KeywordClassifier::new(
        &settings.keywords,
        settings.positive_class,
        settings.negative_class,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keywords_match_whole_words_case_insensitively() {
        let classifier = KeywordClassifier::new(&["Good".to_string()], 1, 0);
        let out = classifier
            .predict(&texts(&["a GOOD film", "goodness me", "good."]))
            .unwrap();
        assert_eq!(out, PredictorOutput::Labels(vec![1, 0, 1]));
    }

    #[test]
    fn test_settings_require_a_classifier() {
        assert!(from_settings(&ClassifierSettings::default()).is_err());
        let settings = ClassifierSettings {
            keywords: vec!["good".into()],
            ..Default::default()
        };
        assert!(from_settings(&settings).is_ok());
        assert!(CommandClassifier::new(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_output_is_parsed_as_json() {
        let classifier = CommandClassifier::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; echo '[[0.2, 0.8]]'".to_string(),
        ])
        .unwrap();
        let out = classifier.predict(&texts(&["anything"])).unwrap();
        assert_eq!(out, PredictorOutput::Json(serde_json::json!([[0.2, 0.8]])));
    }

    #[cfg(unix)]
    #[test]
    fn test_large_batch_with_noisy_stderr_completes() {
        let classifier = CommandClassifier::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "head -c 200000 /dev/zero | tr '\\0' x >&2; cat > /dev/null; echo '[1]'".to_string(),
        ])
        .unwrap();
        let batch: Vec<String> = (0..20_000).map(|i| format!("text {i:05}")).collect();
        let out = classifier.predict(&batch).unwrap();
        assert_eq!(out, PredictorOutput::Json(serde_json::json!([1])));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_ignoring_stdin_is_an_error() {
        let classifier =
            CommandClassifier::new(&["sh".to_string(), "-c".to_string(), "exit 0".to_string()])
                .unwrap();
        let batch: Vec<String> = (0..20_000).map(|i| format!("text {i:05}")).collect();
        assert!(classifier.predict(&batch).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_is_an_error() {
        let classifier =
            CommandClassifier::new(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()])
                .unwrap();
        assert!(classifier.predict(&texts(&["x"])).is_err());
    }
}
