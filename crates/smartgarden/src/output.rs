//! Output formatting: table, JSON, YAML, plain.
//!
//! Table uses `tabled`, structured formats use serde, plain emits one
//! identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Resolved presentation settings for one invocation.
#[derive(Debug, Clone)]
pub struct Printer {
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

/// Whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

impl Printer {
    /// Render a list of items in the chosen format.
    pub fn list<T, R>(
        &self,
        data: &[T],
        to_row: impl Fn(&T) -> R,
        id_fn: impl Fn(&T) -> String,
    ) -> Result<(), CliError>
    where
        T: Serialize,
        R: Tabled,
    {
        let rendered = match self.format {
            OutputFormat::Table => {
                let rows: Vec<R> = data.iter().map(to_row).collect();
                Table::new(rows).with(Style::rounded()).to_string()
            }
            OutputFormat::Plain => data.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
            _ => self.structured(data)?,
        };
        self.emit(&rendered)
    }

    /// Render a single item. Table mode uses `detail_fn` for a key/value view.
    pub fn single<T>(
        &self,
        data: &T,
        detail_fn: impl Fn(&T) -> String,
        id_fn: impl Fn(&T) -> String,
    ) -> Result<(), CliError>
    where
        T: Serialize,
    {
        let rendered = match self.format {
            OutputFormat::Table => detail_fn(data),
            OutputFormat::Plain => id_fn(data),
            _ => self.structured(data)?,
        };
        self.emit(&rendered)
    }

    /// One streamed event. Structured formats always emit a single line.
    pub fn event<T>(&self, data: &T, text_fn: impl Fn(&T) -> String) -> Result<(), CliError>
    where
        T: Serialize,
    {
        let rendered = match self.format {
            OutputFormat::Table | OutputFormat::Plain => text_fn(data),
            _ => serde_json::to_string(data)?,
        };
        self.emit(&rendered)
    }

    /// Status lines go to stderr so structured stdout stays parseable.
    pub fn note(&self, message: &str) {
        if self.quiet {
            return;
        }
        if self.color {
            eprintln!("{}", message.dimmed());
        } else {
            eprintln!("{message}");
        }
    }

    /// Highlight an activity label when a service is running.
    pub fn activity(&self, label: &str, active: bool) -> String {
        match (self.color, active) {
            (true, true) => label.green().to_string(),
            (true, false) => label.dimmed().to_string(),
            (false, _) => label.to_owned(),
        }
    }

    pub fn heading(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_owned()
        }
    }

    fn structured<T: Serialize + ?Sized>(&self, data: &T) -> Result<String, CliError> {
        Ok(match self.format {
            OutputFormat::JsonCompact => serde_json::to_string(data)?,
            OutputFormat::Yaml => serde_yaml::to_string(data)?,
            _ => serde_json::to_string_pretty(data)?,
        })
    }

    fn emit(&self, output: &str) -> Result<(), CliError> {
        if self.quiet || output.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", output.trim_end_matches('\n'))?;
        Ok(())
    }
}

/// Key/value lines for detail views, with aligned keys.
pub fn detail_lines(pairs: &[(&str, String)]) -> String {
    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k:<width$}  {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}
