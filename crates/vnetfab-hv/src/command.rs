//! Command dispatch table: two-token `<module> <command>` lookup, arity
//! checking, then handoff to the registered handler.

use std::collections::HashMap;

use crate::reply::ReplyCode;
use crate::state::HvState;

pub enum CmdOutcome {
    /// Zero or more informational lines, followed by a final 100 OK.
    Ok(Vec<String>),
    Err(ReplyCode, String),
}

pub type CmdHandler = fn(&HvState, &[String]) -> CmdOutcome;

pub struct Command {
    pub min_params: usize,
    pub max_params: usize,
    pub handler: CmdHandler,
}

#[derive(Default)]
pub struct Module {
    commands: HashMap<String, Command>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, min_params: usize, max_params: usize, handler: CmdHandler) -> Self {
        self.commands.insert(name.to_string(), Command { min_params, max_params, handler });
        self
    }
}

#[derive(Default)]
pub struct CommandTable {
    modules: HashMap<String, Module>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(mut self, name: &str, module: Module) -> Self {
        self.modules.insert(name.to_string(), module);
        self
    }

    /// Runs one `<module> <command> <args...>` request, returning the reply
    /// lines to send back verbatim (last one marked done).
    pub fn dispatch(
        &self,
        state: &HvState,
        module_name: &str,
        cmd_name: &str,
        args: &[String],
    ) -> Vec<(ReplyCode, bool, String)> {
        let Some(module) = self.modules.get(module_name) else {
            return vec![(ReplyCode::ErrUnknownModule, true, format!("unknown module '{module_name}'"))];
        };
        let Some(cmd) = module.commands.get(cmd_name) else {
            return vec![(ReplyCode::ErrUnknownCmd, true, format!("unknown command '{cmd_name}'"))];
        };
        if args.len() < cmd.min_params || args.len() > cmd.max_params {
            return vec![(
                ReplyCode::ErrBadParam,
                true,
                format!("'{module_name} {cmd_name}' expects {}..{} parameters, got {}", cmd.min_params, cmd.max_params, args.len()),
            )];
        }

        match (cmd.handler)(state, args) {
            CmdOutcome::Ok(lines) => {
                let mut out: Vec<_> =
                    lines.into_iter().map(|l| (ReplyCode::InfoMsg, false, l)).collect();
                out.push((ReplyCode::InfoOk, true, "OK".to_string()));
                out
            }
            CmdOutcome::Err(code, msg) => vec![(code, true, msg)],
        }
    }
}

/// Parses `s` as a `u32`, returning a ready-made `CmdOutcome::Err` on
/// failure so handlers can propagate with `?`-like brevity via `match`.
pub fn parse_u32(s: &str) -> Result<u32, CmdOutcome> {
    s.parse().map_err(|_| CmdOutcome::Err(ReplyCode::ErrInvalidParam, format!("'{s}' is not a valid number")))
}
