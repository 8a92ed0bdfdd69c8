//! Command line tokenizing.

use thiserror::Error;

/// Command line error.
#[derive(Debug, Error)]
pub enum CommandLineError {
    #[error("Command line cannot be parsed: {0}")]
    Unparseable(String),
    #[error("Command line is empty")]
    Empty,
    #[error("Failed to quote command: {0}")]
    QuoteError(#[from] shlex::QuoteError),
}

/// A command line split into its key and option tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Command key (first word).
    pub key: String,
    /// Remaining tokens, handed to the argument binder.
    pub tokens: Vec<String>,
}

impl CommandLine {
    /// Create a command line from parts.
    #[must_use]
    pub fn new<S: Into<String>>(key: S, tokens: Vec<String>) -> Self {
        Self {
            key: key.into(),
            tokens,
        }
    }

    /// Split a raw line with shell-style quoting, e.g. `sum2 -a 1 -b "2"`.
    ///
    /// # Errors
    /// Returns error if quoting is unbalanced or the line has no words.
    pub fn parse(input: &str) -> Result<Self, CommandLineError> {
        let mut parts = split_command_line(input)?;
        if parts.is_empty() {
            return Err(CommandLineError::Empty);
        }
        let key = parts.remove(0);
        Ok(Self::new(key, parts))
    }

    /// Append an option and its value.
    #[must_use]
    pub fn arg<K, V>(mut self, option: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tokens.push(option.into());
        self.tokens.push(value.into());
        self
    }

    /// Render back into a single quoted line.
    ///
    /// # Errors
    /// Returns error if a token cannot be quoted (e.g. contains a NUL byte).
    pub fn render(&self) -> Result<String, CommandLineError> {
        let words = std::iter::once(self.key.as_str()).chain(self.tokens.iter().map(String::as_str));
        Ok(shlex::try_join(words)?)
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandLineError> {
    shlex::split(input).ok_or_else(|| CommandLineError::Unparseable(input.to_string()))
}
