use crate::CoreError;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Source of answers to interactive questions.
pub trait Prompt: Send + Sync {
    fn ask(&self, question: &str, default: &str) -> Result<String, CoreError>;
}

/// Always answers the default. Used when no terminal is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPrompt;

impl Prompt for DefaultPrompt {
    fn ask(&self, question: &str, default: &str) -> Result<String, CoreError> {
        tracing::debug!("prompt '{question}' answered with default '{default}'");
        Ok(default.to_owned())
    }
}

/// Replays queued answers, then falls back to the default.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, question: &str, default: &str) -> Result<String, CoreError> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.to_owned());
        }
        let answer = self
            .answers
            .lock()
            .map_err(|e| CoreError::Prompt(format!("mutex poisoned: {e}")))?
            .pop_front();
        Ok(answer.unwrap_or_else(|| default.to_owned()))
    }
}

/// Ask until `parse` accepts the answer. An empty answer means the default.
pub(crate) fn ask_until<T>(
    prompt: &dyn Prompt,
    question: &str,
    default: &str,
    mut parse: impl FnMut(&str) -> Result<T, String>,
) -> Result<T, CoreError> {
    let mut current = question.to_owned();
    loop {
        let answer = prompt.ask(&current, default)?;
        let answer = answer.trim();
        let answer = if answer.is_empty() { default } else { answer };
        match parse(answer) {
            Ok(value) => return Ok(value),
            Err(reason) => {
                tracing::debug!("rejected answer '{answer}': {reason}");
                current = format!("{reason}. {question}");
            }
        }
    }
}
