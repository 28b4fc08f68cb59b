use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::base::{CallOptions, Completion, Provider};
use super::configs::{CliProviderConfig, PROMPT_PLACEHOLDER};
use super::utils::LineBuffer;
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::Conversation;
use crate::models::role::Role;

/// Drives a local agent CLI, one process per call.
///
/// These programs run their own tools, so none are offered through this adapter.
pub struct CliProvider {
    name: String,
    config: CliProviderConfig,
}

/// Flatten the conversation into one prompt: system prompt, transcript of
/// earlier turns, then the latest user message
pub fn build_prompt(conversation: &Conversation, system: Option<&str>) -> String {
    let messages = conversation.messages();
    let last_user = messages.iter().rposition(|m| m.role == Role::User);

    let mut sections = Vec::new();
    if let Some(system) = system {
        sections.push(system.trim().to_string());
    }

    let transcript: Vec<String> = messages[..last_user.unwrap_or(0)]
        .iter()
        .filter(|m| !m.text().trim().is_empty())
        .filter_map(|m| match m.role {
            Role::User => Some(format!("User: {}", m.text().trim())),
            Role::Assistant => Some(format!("Assistant: {}", m.text().trim())),
            _ => None,
        })
        .collect();
    if !transcript.is_empty() {
        sections.push(format!(
            "Conversation so far:\n{}",
            transcript.join("\n")
        ));
    }

    if let Some(index) = last_user {
        sections.push(messages[index].text().to_string());
    }
    sections.join("\n\n")
}

/// Find an executable by name on `PATH`, or check a path directly
pub fn find_program(program: &str) -> Option<std::path::PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

impl CliProvider {
    pub fn new(config: CliProviderConfig) -> Self {
        let name = Path::new(&config.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.program.clone());
        Self { name, config }
    }

    fn model_args(&self) -> Vec<String> {
        match (&self.config.model_flag, &self.config.model) {
            (Some(flag), Some(model)) => vec![flag.clone(), model.clone()],
            _ => Vec::new(),
        }
    }

    /// Arguments for a captured call, with the prompt substituted
    pub fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = self.model_args();
        let mut substituted = false;
        for arg in &self.config.args {
            if arg.contains(PROMPT_PLACEHOLDER) {
                substituted = true;
                args.push(arg.replace(PROMPT_PLACEHOLDER, prompt));
            } else {
                args.push(arg.clone());
            }
        }
        if !substituted {
            args.push(prompt.to_string());
        }
        args
    }

    fn spawn_error(&self, err: io::Error) -> AgentError {
        if err.kind() == io::ErrorKind::NotFound {
            AgentError::Configuration(format!(
                "{} was not found; install it or put it on PATH",
                self.config.program
            ))
        } else {
            AgentError::Configuration(format!("could not start {}: {}", self.config.program, err))
        }
    }

    async fn run(&self, prompt: &str, options: &CallOptions<'_>) -> AgentResult<String> {
        let mut child = Command::new(&self.config.program)
            .args(self.build_args(prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(AgentError::Protocol(format!(
                "{} output could not be captured",
                self.name
            )));
        };

        let read_stdout = async {
            let mut lines = LineBuffer::new();
            let mut output = String::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                for line in lines.push(&buf[..n]) {
                    let line = format!("{}\n", line);
                    options.emit(&line);
                    output.push_str(&line);
                }
            }
            if let Some(rest) = lines.finish() {
                options.emit(&rest);
                output.push_str(&rest);
            }
            Ok::<_, io::Error>(output)
        };
        let read_stderr = async {
            let mut captured = Vec::new();
            stderr.read_to_end(&mut captured).await?;
            Ok::<_, io::Error>(String::from_utf8_lossy(&captured).into_owned())
        };

        let (output, errors) = tokio::try_join!(read_stdout, read_stderr).map_err(|e| {
            AgentError::Transport(format!("reading from {} failed: {}", self.name, e))
        })?;
        let status = child.wait().await.map_err(|e| {
            AgentError::Transport(format!("waiting for {} failed: {}", self.name, e))
        })?;

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "a signal".to_string());
            return Err(AgentError::Protocol(format!(
                "{} exited with {}: {}",
                self.name,
                code,
                errors.trim()
            )));
        }
        Ok(output.trim_end().to_string())
    }
}

#[async_trait]
impl Provider for CliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_tools(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        find_program(&self.config.program).is_some()
    }

    async fn call(
        &self,
        conversation: &Conversation,
        options: &CallOptions<'_>,
    ) -> AgentResult<Completion> {
        let prompt = build_prompt(conversation, options.system());
        tracing::debug!(program = %self.config.program, prompt_len = prompt.len(), "running cli agent");
        let text = self.run(&prompt, options).await?;
        Ok(Completion::text(text))
    }

    async fn interactive(&self, prompt: Option<&str>) -> AgentResult<()> {
        let mut args = self.model_args();
        args.extend(self.config.interactive_args.iter().cloned());
        if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
            args.push(prompt.to_string());
        }
        tracing::debug!(program = %self.config.program, "handing the terminal to cli agent");

        let status = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if status.success() {
            Ok(())
        } else {
            Err(AgentError::Protocol(format!(
                "{} exited with {}",
                self.name, status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;

    fn conversation(text: &str) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text(text));
        conversation
    }

    #[test]
    fn test_build_prompt_with_history() {
        let mut history = Conversation::new();
        history.push(Message::user().with_text("my name is Sam"));
        history.push(Message::assistant().with_text("Hi Sam"));
        history.push(Message::user().with_text("what is my name?"));

        let prompt = build_prompt(&history, Some("be brief"));
        assert_eq!(
            prompt,
            "be brief\n\nConversation so far:\nUser: my name is Sam\nAssistant: Hi Sam\n\nwhat is my name?"
        );
        assert_eq!(build_prompt(&conversation("hello"), None), "hello");
    }

    #[test]
    fn test_build_args() {
        let provider = CliProvider::new(CliProviderConfig::claude().with_model("sonnet"));
        assert_eq!(
            provider.build_args("hi there"),
            vec!["--model", "sonnet", "-p", "hi there"]
        );

        let provider = CliProvider::new(CliProviderConfig::new("tool", vec!["--quiet".into()]));
        assert_eq!(provider.build_args("hi"), vec!["--quiet", "hi"]);
        assert_eq!(provider.name(), "tool");
    }

    #[tokio::test]
    async fn test_missing_program_is_configuration_error() {
        let provider = CliProvider::new(CliProviderConfig::new(
            "parley-no-such-program",
            vec![PROMPT_PLACEHOLDER.into()],
        ));
        assert!(!provider.is_available());
        let result = provider
            .call(&conversation("hi"), &CallOptions::default())
            .await;
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_captured_and_mirrored() -> AgentResult<()> {
        use std::sync::Mutex;

        let provider = CliProvider::new(CliProviderConfig::new(
            "echo",
            vec![PROMPT_PLACEHOLDER.into()],
        ));
        assert!(provider.is_available());

        let seen = Mutex::new(String::new());
        let sink = |text: &str| seen.lock().unwrap().push_str(text);
        let completion = provider
            .call(&conversation("hello there"), &CallOptions::default().with_sink(&sink))
            .await?;
        assert_eq!(completion.text, "hello there");
        assert!(completion.tool_calls.is_empty());
        assert_eq!(*seen.lock().unwrap(), "hello there\n");

        let silent = provider
            .call(
                &conversation("quiet"),
                &CallOptions::default().with_sink(&sink).silent(true),
            )
            .await?;
        assert_eq!(silent.text, "quiet");
        assert_eq!(*seen.lock().unwrap(), "hello there\n");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let provider = CliProvider::new(CliProviderConfig::new(
            "sh",
            vec![
                "-c".into(),
                "echo boom >&2; exit 3".into(),
                PROMPT_PLACEHOLDER.into(),
            ],
        ));
        let result = provider
            .call(&conversation("hi"), &CallOptions::default())
            .await;
        assert_eq!(
            result,
            Err(AgentError::Protocol("sh exited with 3: boom".into()))
        );
    }
}
