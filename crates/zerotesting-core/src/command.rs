//! Container command model.
//!
//! A container runs either one native invocation (`command: [program]`,
//! `args: [...]`) or a shell script assembled from several [`Command`]s and
//! passed to `sh -c`. [`CommandConfig::render`] picks the form from the
//! explicit `single_native_command` flag, and [`CommandConfig::from_parts`]
//! rebuilds the model from an existing container.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::policy::OnDuplicate;

/// Outer program of script-mode containers.
pub const SHELL: [&str; 2] = ["sh", "-c"];

/// One command-line argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arg {
    /// `--name` or `--name=value`. `name` keeps its dashes.
    Flag { name: String, value: Option<String> },
    /// Positional token.
    Token(String),
}

impl Arg {
    pub fn flag(name: impl Into<String>, value: impl Into<String>) -> Self {
        Arg::Flag {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn switch(name: impl Into<String>) -> Self {
        Arg::Flag {
            name: name.into(),
            value: None,
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Arg::Token(token.into())
    }

    /// Parse one rendered argument. Anything starting with `-` is a flag.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with('-') {
            match raw.split_once('=') {
                Some((name, value)) => Arg::flag(name, value),
                None => Arg::switch(raw),
            }
        } else {
            Arg::token(raw)
        }
    }

    pub fn flag_name(&self) -> Option<&str> {
        match self {
            Arg::Flag { name, .. } => Some(name),
            Arg::Token(_) => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Arg::Flag { name, value: Some(v) } => format!("{name}={v}"),
            Arg::Flag { name, value: None } => name.clone(),
            Arg::Token(t) => t.clone(),
        }
    }
}

impl From<&str> for Arg {
    fn from(raw: &str) -> Self {
        Arg::parse(raw)
    }
}

impl From<String> for Arg {
    fn from(raw: String) -> Self {
        Arg::parse(&raw)
    }
}

impl From<(&str, &str)> for Arg {
    fn from((name, value): (&str, &str)) -> Self {
        Arg::flag(name, value)
    }
}

impl From<(String, String)> for Arg {
    fn from((name, value): (String, String)) -> Self {
        Arg::flag(name, value)
    }
}

impl From<(&str, Option<&str>)> for Arg {
    fn from((name, value): (&str, Option<&str>)) -> Self {
        Arg::Flag {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }
}

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    pub args: Vec<Arg>,
    /// Render one argument per line (script mode only).
    pub multiline: bool,
    /// Wrapper placed before the program, e.g. `nice -n 19`.
    pub pre: Option<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            multiline: false,
            pre: None,
        }
    }

    /// Merge `args` into this command.
    ///
    /// Tokens are always appended. Flags follow `on_duplicate`; with
    /// [`OnDuplicate::Replace`] every supplied flag ends up present exactly
    /// once with the supplied value.
    pub fn add_args<I, A>(&mut self, args: I, on_duplicate: OnDuplicate) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        for arg in args {
            let arg = arg.into();
            let Some(name) = arg.flag_name().map(str::to_string) else {
                self.args.push(arg);
                continue;
            };
            let existing = self
                .args
                .iter()
                .position(|a| a.flag_name() == Some(name.as_str()));
            match (existing, on_duplicate) {
                (None, _) | (Some(_), OnDuplicate::Append) => self.args.push(arg),
                (Some(_), OnDuplicate::Ignore) => {}
                (Some(_), OnDuplicate::Error) => {
                    return Err(ConfigError::DuplicateFlag {
                        program: self.program.clone(),
                        flag: name,
                    })
                }
                (Some(first), OnDuplicate::Replace) => {
                    self.args[first] = arg;
                    let mut seen = 0usize;
                    self.args.retain(|a| {
                        if a.flag_name() == Some(name.as_str()) {
                            seen += 1;
                            seen == 1
                        } else {
                            true
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Values of every occurrence of flag `name`.
    pub fn flag_values(&self, name: &str) -> Vec<Option<&str>> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Arg::Flag { name: n, value } if n == name => Some(value.as_deref()),
                _ => None,
            })
            .collect()
    }

    pub fn render_args(&self) -> Vec<String> {
        self.args.iter().map(Arg::render).collect()
    }

    /// One script line. Multiline commands use backslash continuations.
    pub fn render_line(&self) -> String {
        let mut line = match &self.pre {
            Some(pre) => format!("{pre} {}", self.program),
            None => self.program.clone(),
        };
        let sep = if self.multiline { " \\\n  " } else { " " };
        for arg in &self.args {
            line.push_str(sep);
            line.push_str(&arg.render());
        }
        line
    }

    fn parse_line(line: &str, multiline: bool) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let program = tokens.next()?;
        Some(Self {
            program: program.to_string(),
            args: tokens.map(Arg::parse).collect(),
            multiline,
            pre: None,
        })
    }
}

/// Rendered container command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedCommand {
    Native { command: Vec<String>, args: Vec<String> },
    Script { script: String },
}

impl RenderedCommand {
    /// `(command, args)` as stored on a container.
    pub fn into_container_fields(self) -> (Vec<String>, Option<Vec<String>>) {
        match self {
            RenderedCommand::Native { command, args } => {
                (command, if args.is_empty() { None } else { Some(args) })
            }
            RenderedCommand::Script { script } => {
                let mut command: Vec<String> = SHELL.iter().map(|s| s.to_string()).collect();
                command.push(script);
                (command, None)
            }
        }
    }
}

/// Ordered commands of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    commands: Vec<Command>,
    single_native_command: bool,
}

impl CommandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config holding one native command.
    pub fn native<I, A>(program: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let mut config = Self::new();
        config.insert_command(program, args, false, None)?;
        config.use_single_command(true)?;
        Ok(config)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_single_command(&self) -> bool {
        self.single_native_command
    }

    /// Insert a command at `index` (end when `None`).
    pub fn insert_command<I, A>(
        &mut self,
        program: &str,
        args: I,
        multiline: bool,
        index: Option<usize>,
    ) -> Result<&mut Command>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        if program.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "command.program".to_string(),
            });
        }
        if self.single_native_command && !self.commands.is_empty() {
            return Err(ConfigError::MultipleCommands {
                count: self.commands.len() + 1,
            });
        }
        let command = Command {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            multiline,
            pre: None,
        };
        let index = index.unwrap_or(self.commands.len()).min(self.commands.len());
        self.commands.insert(index, command);
        Ok(&mut self.commands[index])
    }

    /// First command running `program`.
    pub fn find_command(&self, program: &str) -> Result<&Command> {
        self.commands
            .iter()
            .find(|c| c.program == program)
            .ok_or_else(|| ConfigError::CommandNotFound {
                program: program.to_string(),
            })
    }

    pub fn find_command_mut(&mut self, program: &str) -> Result<&mut Command> {
        self.commands
            .iter_mut()
            .find(|c| c.program == program)
            .ok_or_else(|| ConfigError::CommandNotFound {
                program: program.to_string(),
            })
    }

    /// Merge flags into the first command running `program`.
    pub fn add_args<I, A>(&mut self, program: &str, args: I, on_duplicate: OnDuplicate) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.find_command_mut(program)?.add_args(args, on_duplicate)
    }

    pub fn use_single_command(&mut self, single: bool) -> Result<()> {
        if single && self.commands.len() > 1 {
            return Err(ConfigError::MultipleCommands {
                count: self.commands.len(),
            });
        }
        self.single_native_command = single;
        Ok(())
    }

    /// Render for a container; `None` keeps the image entrypoint.
    pub fn render(&self) -> Option<RenderedCommand> {
        if self.commands.is_empty() {
            return None;
        }
        if self.single_native_command {
            let cmd = &self.commands[0];
            let mut command: Vec<String> = cmd
                .pre
                .as_deref()
                .map(|pre| pre.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            command.push(cmd.program.clone());
            return Some(RenderedCommand::Native {
                command,
                args: cmd.render_args(),
            });
        }
        let mut script = self
            .commands
            .iter()
            .map(Command::render_line)
            .collect::<Vec<_>>()
            .join("\n");
        // Forces block-scalar `|` rather than `|-` when serialized.
        script.push('\n');
        Some(RenderedCommand::Script { script })
    }

    /// Rebuild from a container's `command` and `args`.
    ///
    /// `sh -c <script>` becomes one command per script line (continuations
    /// joined); anything else becomes a single native command.
    pub fn from_parts(command: Option<&[String]>, args: Option<&[String]>) -> Self {
        let command = command.unwrap_or_default();
        let args = args.unwrap_or_default();
        if command.len() >= 2 && command[0] == SHELL[0] && command[1] == SHELL[1] {
            let script = command
                .get(2)
                .or_else(|| args.first())
                .map(String::as_str)
                .unwrap_or_default();
            return Self {
                commands: parse_script(script),
                single_native_command: false,
            };
        }
        let mut tokens = command.iter().chain(args.iter());
        match tokens.next() {
            None => Self::default(),
            Some(program) => Self {
                commands: vec![Command {
                    program: program.clone(),
                    args: tokens.map(|t| Arg::parse(t)).collect(),
                    multiline: false,
                    pre: None,
                }],
                single_native_command: true,
            },
        }
    }
}

fn parse_script(script: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut pending = String::new();
    let mut multiline = false;
    for line in script.lines() {
        let trimmed = line.trim_end();
        if let Some(head) = trimmed.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            multiline = true;
            continue;
        }
        pending.push_str(trimmed);
        commands.extend(Command::parse_line(&pending, multiline));
        pending.clear();
        multiline = false;
    }
    commands.extend(Command::parse_line(&pending, multiline));
    commands
}
