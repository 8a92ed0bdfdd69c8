//! Command registry.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use thiserror::Error;

use crate::{CommandDescriptor, HelpEntry, ParamKind, ParamSpec};

/// Registry construction error. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command key registered more than once: {0}")]
    RegistrationConflict(String),
    #[error("command {0} declares more than one context parameter")]
    MultipleContexts(String),
    #[error("command {command}: parameter {param} is invalid: {reason}")]
    InvalidParameter {
        command: String,
        param: String,
        reason: String,
    },
}

/// Lookup of an unknown command key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command not found: {0}")]
pub struct CommandNotFound(pub String);

/// Read-only table of commands, validated at construction.
///
/// Safe to share across threads without further synchronization.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandDescriptor>>,
}

impl CommandRegistry {
    /// Validate and index the supplied descriptors.
    ///
    /// # Errors
    /// Returns the first duplicate key, unresolvable parameter, or handler
    /// with more than one context parameter.
    pub fn build<I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = CommandDescriptor>,
    {
        let mut commands = HashMap::new();
        for descriptor in descriptors {
            validate(&descriptor)?;
            let key = descriptor.key.clone();
            if commands.insert(key.clone(), Arc::new(descriptor)).is_some() {
                return Err(RegistryError::RegistrationConflict(key));
            }
        }
        tracing::info!(commands = commands.len(), "command registry built");
        Ok(Self { commands })
    }

    /// Case-sensitive lookup.
    ///
    /// # Errors
    /// Returns [`CommandNotFound`] for an unknown key.
    pub fn lookup(&self, key: &str) -> Result<Arc<CommandDescriptor>, CommandNotFound> {
        self.commands
            .get(key)
            .cloned()
            .ok_or_else(|| CommandNotFound(key.to_string()))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.commands.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Command keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Help metadata for one command.
    ///
    /// # Errors
    /// Returns [`CommandNotFound`] for an unknown key.
    pub fn help_entry(&self, key: &str) -> Result<HelpEntry, CommandNotFound> {
        self.lookup(key).map(|d| HelpEntry::from_descriptor(&d))
    }

    /// Help metadata for all commands, sorted by group then key.
    #[must_use]
    pub fn help_entries(&self) -> Vec<HelpEntry> {
        let mut entries: Vec<HelpEntry> = self
            .commands
            .values()
            .map(|d| HelpEntry::from_descriptor(d))
            .collect();
        entries.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.key.cmp(&b.key)));
        entries
    }
}

fn validate(descriptor: &CommandDescriptor) -> Result<(), RegistryError> {
    let invalid = |param: &ParamSpec, reason: &str| RegistryError::InvalidParameter {
        command: descriptor.key.clone(),
        param: param.name.clone(),
        reason: reason.to_string(),
    };

    if descriptor.key.trim().is_empty() || descriptor.key.contains(char::is_whitespace) {
        return Err(RegistryError::InvalidParameter {
            command: descriptor.key.clone(),
            param: String::new(),
            reason: "command key must be a single non-empty word".to_string(),
        });
    }

    let contexts = descriptor.params.iter().filter(|p| p.is_context()).count();
    if contexts > 1 {
        return Err(RegistryError::MultipleContexts(descriptor.key.clone()));
    }

    let mut names = HashSet::new();
    let mut options = HashSet::new();
    for param in &descriptor.params {
        if !names.insert(param.name.as_str()) {
            return Err(invalid(param, "duplicate parameter name"));
        }
        match &param.kind {
            ParamKind::Context(_) => continue,
            ParamKind::Value(_) => {
                if param.short.is_none() && param.long.is_none() {
                    return Err(invalid(param, "no option name declared"));
                }
                if param.required && param.default.is_some() {
                    return Err(invalid(param, "a required option cannot carry a default"));
                }
            }
            ParamKind::Bean(fields) => {
                if fields.is_empty() {
                    return Err(invalid(param, "bean declares no fields"));
                }
                for field in fields {
                    if !matches!(field.kind, ParamKind::Value(_)) {
                        return Err(invalid(field, "bean fields must be plain options"));
                    }
                    if field.short.is_none() && field.long.is_none() {
                        return Err(invalid(field, "no option name declared"));
                    }
                    if field.required && field.default.is_some() {
                        return Err(invalid(field, "a required option cannot carry a default"));
                    }
                }
            }
        }
        for option in param.option_names() {
            if option.is_empty() || option.starts_with('-') || option.contains('=') {
                return Err(invalid(param, "malformed option name"));
            }
            if !options.insert(option) {
                return Err(invalid(param, "option name used twice"));
            }
        }
    }
    Ok(())
}
