//! Entry-point resolution

use crate::config::RunConfig;
use crate::lang::ast::Visibility;
use crate::{Result, SkiffError};

use super::loader::Program;

/// The method an artifact starts at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub class: String,
    pub method: String,
    /// Non-public entry points need reflective access to be invoked
    pub is_public: bool,
}

/// Find `class.method(String[])` in a loaded program
///
/// A method of the right shape that is not static is reported separately
/// from a missing one.
pub fn resolve(program: &Program, config: &RunConfig) -> Result<EntryPoint> {
    let missing = || SkiffError::MissingEntryPoint {
        class: config.entry_class.clone(),
        method: config.entry_method.clone(),
    };

    let class = program.class(&config.entry_class).ok_or_else(missing)?;
    let method = class
        .decl
        .methods
        .iter()
        .find(|m| {
            m.name == config.entry_method
                && m.params.len() == 1
                && m.params[0].ty.is_string_array()
        })
        .ok_or_else(missing)?;

    if !method.modifiers.is_static {
        return Err(SkiffError::NotStaticEntryPoint {
            class: config.entry_class.clone(),
            method: config.entry_method.clone(),
        });
    }

    Ok(EntryPoint {
        class: config.entry_class.clone(),
        method: config.entry_method.clone(),
        is_public: method.modifiers.visibility == Visibility::Public,
    })
}
