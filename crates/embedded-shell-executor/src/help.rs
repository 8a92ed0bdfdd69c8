//! Help metadata and rendering.

use std::fmt::Write as _;

use embedded_shell_core::Interruptible;
use serde::Serialize;

use crate::{CommandDescriptor, CommandNotFound, CommandRegistry, ParamKind, ParamSpec};

/// Help for one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamHelp {
    pub name: String,
    pub short: Option<String>,
    pub long: Option<String>,
    pub type_name: String,
    pub required: bool,
    pub default: Option<String>,
    pub help: String,
}

/// Help for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelpEntry {
    pub key: String,
    pub group: String,
    pub help: String,
    pub interruptible: bool,
    pub params: Vec<ParamHelp>,
}

impl HelpEntry {
    /// Collect help from a descriptor. Bean fields are listed as options;
    /// the context parameter is omitted.
    #[must_use]
    pub fn from_descriptor(descriptor: &CommandDescriptor) -> Self {
        let mut params = Vec::new();
        for param in &descriptor.params {
            match &param.kind {
                ParamKind::Context(_) => {}
                ParamKind::Value(_) => params.push(param_help(param)),
                ParamKind::Bean(fields) => params.extend(fields.iter().map(param_help)),
            }
        }
        Self {
            key: descriptor.key.clone(),
            group: descriptor.group.clone(),
            help: descriptor.help.clone(),
            interruptible: descriptor.interruptible == Interruptible::Allow,
            params,
        }
    }
}

fn param_help(spec: &ParamSpec) -> ParamHelp {
    let type_name = match &spec.kind {
        ParamKind::Value(ty) => ty.to_string(),
        ParamKind::Bean(_) => "bean".to_string(),
        ParamKind::Context(_) => "context".to_string(),
    };
    ParamHelp {
        name: spec.name.clone(),
        short: spec.short.clone(),
        long: spec.long.clone(),
        type_name,
        required: spec.required,
        default: spec.default.clone(),
        help: spec.help.clone(),
    }
}

/// Render help text for the whole registry, or for one command.
///
/// # Errors
/// Returns [`CommandNotFound`] if `key` names no command.
pub fn render_help(registry: &CommandRegistry, key: Option<&str>) -> Result<String, CommandNotFound> {
    let mut out = String::new();
    if let Some(key) = key {
        let entry = registry.help_entry(key)?;
        render_entry(&mut out, &entry, true);
        return Ok(out);
    }

    let mut current_group: Option<&str> = None;
    let entries = registry.help_entries();
    for entry in &entries {
        if current_group != Some(entry.group.as_str()) {
            if current_group.is_some() {
                out.push('\n');
            }
            let _ = writeln!(out, "{}:", entry.group);
            current_group = Some(entry.group.as_str());
        }
        render_entry(&mut out, entry, false);
    }
    Ok(out)
}

fn render_entry(out: &mut String, entry: &HelpEntry, detailed: bool) {
    let marker = if entry.interruptible { " (interruptible)" } else { "" };
    let _ = writeln!(out, "  {:<12} {}{marker}", entry.key, entry.help);
    if !detailed && entry.params.is_empty() {
        return;
    }
    for param in &entry.params {
        let mut flags = Vec::new();
        if let Some(short) = &param.short {
            flags.push(format!("-{short}"));
        }
        if let Some(long) = &param.long {
            flags.push(format!("--{long}"));
        }
        let mut line = format!("      {} <{}>", flags.join(", "), param.type_name);
        if !param.help.is_empty() {
            let _ = write!(line, "  {}", param.help);
        }
        if let Some(default) = &param.default {
            let _ = write!(line, " (default: {default})");
        } else if param.required {
            line.push_str(" (required)");
        }
        let _ = writeln!(out, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextKind, ParamSpec};

    fn registry() -> CommandRegistry {
        CommandRegistry::build([
            CommandDescriptor::new("sum2", |_| Ok(()))
                .group("Example commands")
                .help("Adds two numbers")
                .param(ParamSpec::context(ContextKind::Simple))
                .param(ParamSpec::int("a").long("add1").help("Add number"))
                .param(
                    ParamSpec::int("b")
                        .long("add2")
                        .optional()
                        .default_value("1")
                        .help("Added number"),
                ),
            CommandDescriptor::new("task2", |_| Ok(()))
                .group("Example commands")
                .interruptible(Interruptible::Allow),
        ])
        .unwrap()
    }

    #[test]
    fn test_entry_omits_context() {
        let entry = registry().help_entry("sum2").unwrap();
        assert_eq!(entry.params.len(), 2);
        assert_eq!(entry.params[0].type_name, "integer");
        assert!(entry.params[0].required);
        assert!(!entry.params[1].required);
    }

    #[test]
    fn test_render_single_command() {
        let text = render_help(&registry(), Some("sum2")).unwrap();
        assert!(text.contains("-a, --add1 <integer>  Add number (required)"));
        assert!(text.contains("(default: 1)"));
    }

    #[test]
    fn test_render_all_grouped() {
        let text = render_help(&registry(), None).unwrap();
        assert!(text.starts_with("Example commands:"));
        assert!(text.contains("task2"));
        assert!(text.contains("(interruptible)"));
    }

    #[test]
    fn test_render_unknown_command() {
        assert!(render_help(&registry(), Some("nope")).is_err());
    }
}
