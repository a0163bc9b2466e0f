use std::fmt;

use crate::error::{Error, Result};

/// Name of the agent launched when no command is given
pub const DEFAULT_AGENT: &str = "gemini";

/// A command to run under supervision: program plus verbatim arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    /// Build from a full argv; the first element is the program
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(Error::EmptyCommand)?;
        if program.is_empty() {
            return Err(Error::EmptyCommand);
        }
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }

    /// Resolve wrapper positional arguments into the command for `agent`
    ///
    /// No arguments runs the bare agent. Otherwise the agent name is prepended
    /// unless the first argument already is the agent name.
    pub fn for_agent(agent: &str, positional: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut positional: Vec<String> = positional.into_iter().map(Into::into).collect();
        if positional.first().is_some_and(|first| first == agent) {
            positional.remove(0);
        }
        Self::new(agent).args(positional)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by arguments
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Command {
    /// Shell-quoted rendering, for diagnostics
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<_> = std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| shell_escape::escape(part.as_str().into()))
            .collect();
        f.write_str(&rendered.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_runs_bare_agent() {
        let cmd = Command::for_agent("gemini", Vec::<String>::new());
        assert_eq!(cmd.argv(), vec!["gemini"]);
    }

    #[test]
    fn test_prepends_agent_on_mismatch() {
        let cmd = Command::for_agent("gemini", ["explain", "foo.py"]);
        assert_eq!(cmd.argv(), vec!["gemini", "explain", "foo.py"]);
    }

    #[test]
    fn test_does_not_double_prepend() {
        let cmd = Command::for_agent("gemini", ["gemini", "explain"]);
        assert_eq!(cmd.argv(), vec!["gemini", "explain"]);
    }

    #[test]
    fn test_path_to_agent_is_still_prepended() {
        let cmd = Command::for_agent("gemini", ["/usr/bin/gemini"]);
        assert_eq!(cmd.argv(), vec!["gemini", "/usr/bin/gemini"]);
    }

    #[test]
    fn test_from_argv_rejects_empty() {
        assert!(matches!(
            Command::from_argv(Vec::<String>::new()),
            Err(Error::EmptyCommand)
        ));
        assert!(matches!(
            Command::from_argv([""]),
            Err(Error::EmptyCommand)
        ));
    }

    #[test]
    fn test_display_quotes_arguments() {
        let cmd = Command::new("gemini").arg("explain this").arg("x.py");
        assert_eq!(cmd.to_string(), "gemini 'explain this' x.py");
    }
}
