use std::{
    fmt,
    io::ErrorKind,
    path::Path,
    process::{Output, Stdio},
    time::Duration,
};

use tokio::process::Command;
use tracing::debug;

use crate::config::AppConfig;

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Executable plus argument pattern. `{input}` and `{output}` inside any
/// argument are replaced with the request's paths. No shell is involved.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> CommandTemplate
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandTemplate {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn render(&self, input: Option<&Path>, output: Option<&Path>) -> Vec<String> {
        let input = input.map(|p| p.to_string_lossy());
        let output = output.map(|p| p.to_string_lossy());

        self.args
            .iter()
            .map(|arg| {
                let mut arg = arg.clone();
                if let Some(input) = &input {
                    arg = arg.replace(INPUT_PLACEHOLDER, input);
                }
                if let Some(output) = &output {
                    arg = arg.replace(OUTPUT_PLACEHOLDER, output);
                }
                arg
            })
            .collect()
    }

    fn command(&self, input: Option<&Path>, output: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct ConverterSpec {
    pub name: String,
    pub command: CommandTemplate,
    /// Lower runs first.
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitIndicator {
    Code(i32),
    /// Terminated by a signal, no exit code available.
    Killed,
    TimedOut(Duration),
    NotFound,
    SpawnFailed(String),
    /// Exited zero but the output file is missing or empty.
    EmptyOutput,
}

impl fmt::Display for ExitIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitIndicator::Code(c) => write!(f, "exit code {c}"),
            ExitIndicator::Killed => write!(f, "killed by signal"),
            ExitIndicator::TimedOut(d) => write!(f, "timed out after {}s", d.as_secs_f32()),
            ExitIndicator::NotFound => write!(f, "not found"),
            ExitIndicator::SpawnFailed(_) => write!(f, "failed to start"),
            ExitIndicator::EmptyOutput => write!(f, "empty output"),
        }
    }
}

#[derive(Debug)]
pub struct Invocation {
    pub exit: Option<ExitIndicator>,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    /// stderr, or stdout when the tool only talks there.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    fn failed(exit: ExitIndicator) -> Invocation {
        let stderr = match &exit {
            ExitIndicator::SpawnFailed(e) => e.clone(),
            _ => String::new(),
        };
        Invocation {
            exit: Some(exit),
            stdout: String::new(),
            stderr,
        }
    }
}

impl From<Output> for Invocation {
    fn from(out: Output) -> Self {
        let exit = if out.status.success() {
            None
        } else {
            Some(
                out.status
                    .code()
                    .map(ExitIndicator::Code)
                    .unwrap_or(ExitIndicator::Killed),
            )
        };

        Invocation {
            exit,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

/// Runs `template` to completion or until `timeout` elapses. The child is
/// killed when the timeout fires.
pub async fn run(
    template: &CommandTemplate,
    input: Option<&Path>,
    output: Option<&Path>,
    timeout: Duration,
) -> Invocation {
    let mut cmd = template.command(input, output);
    debug!("spawn {} {:?}", template.program, template.render(input, output));

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Invocation::failed(ExitIndicator::NotFound)
        }
        Err(e) => return Invocation::failed(ExitIndicator::SpawnFailed(e.to_string())),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => out.into(),
        Ok(Err(e)) => Invocation::failed(ExitIndicator::SpawnFailed(e.to_string())),
        // dropping the future drops the child, kill_on_drop reaps it
        Err(_) => Invocation::failed(ExitIndicator::TimedOut(timeout)),
    }
}

#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: Vec<ConverterSpec>,
    probe: Option<CommandTemplate>,
    version: Option<CommandTemplate>,
    timeout: Duration,
}

impl ConverterRegistry {
    pub fn new(mut converters: Vec<ConverterSpec>, timeout: Duration) -> ConverterRegistry {
        converters.sort_by_key(|c| c.priority);
        ConverterRegistry {
            converters,
            probe: None,
            version: None,
            timeout,
        }
    }

    /// Diagnostic-only command run against the input once every converter has failed.
    pub fn with_probe(mut self, probe: CommandTemplate) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_version(mut self, version: CommandTemplate) -> Self {
        self.version = Some(version);
        self
    }

    pub fn from_config(config: &AppConfig) -> ConverterRegistry {
        let quality = config.jpeg_quality.to_string();
        let converters = vec![
            ConverterSpec {
                name: "imagemagick".to_string(),
                command: CommandTemplate::new(
                    config.magick_bin.as_str(),
                    ["{input}", "-quality", quality.as_str(), "{output}"],
                ),
                priority: 0,
            },
            ConverterSpec {
                name: "libheif".to_string(),
                command: CommandTemplate::new(
                    config.heif_convert_bin.as_str(),
                    ["-q", quality.as_str(), "{input}", "{output}"],
                ),
                priority: 1,
            },
        ];

        ConverterRegistry::new(converters, config.convert_timeout)
            .with_probe(CommandTemplate::new(
                config.magick_bin.as_str(),
                ["identify", "{input}"],
            ))
            .with_version(CommandTemplate::new(config.magick_bin.as_str(), ["-version"]))
    }

    pub fn converters(&self) -> &[ConverterSpec] {
        &self.converters
    }

    pub fn probe(&self) -> Option<&CommandTemplate> {
        self.probe.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn version(&self) -> Result<String, String> {
        let Some(template) = &self.version else {
            return Err("no version command configured".to_string());
        };

        let inv = run(template, None, None, self.timeout).await;
        match &inv.exit {
            None => Ok(inv
                .stdout
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()),
            Some(exit) => Err(format!("{} {}", template.program, exit)),
        }
    }
}
