//! Compensating actions for recorded commands
//!
//! A rule table keyed on the command's program and subcommand. Commands that
//! match no rule have no compensation and cannot be rolled back.

use std::path::Path;

/// Derives the compensating command for `program <subcommand> args...`
type Derive = fn(program: &str, args: &[&str]) -> Option<String>;

struct CompensationRule {
    program: &'static [&'static str],
    subcommand: Option<&'static [&'static str]>,
    derive: Derive,
}

const RULES: &[CompensationRule] = &[
    CompensationRule {
        program: &["git"],
        subcommand: Some(&["add"]),
        derive: git_add,
    },
    CompensationRule {
        program: &["git"],
        subcommand: Some(&["commit"]),
        derive: |_, _| Some("git reset --soft HEAD~1".to_string()),
    },
    CompensationRule {
        program: &["git"],
        subcommand: Some(&["branch"]),
        derive: git_branch,
    },
    CompensationRule {
        program: &["git"],
        subcommand: Some(&["checkout", "switch"]),
        derive: git_checkout_new_branch,
    },
    CompensationRule {
        program: &["git"],
        subcommand: Some(&["stash"]),
        derive: git_stash,
    },
    CompensationRule {
        program: &["npm", "pnpm"],
        subcommand: Some(&["install", "i", "add"]),
        derive: |program, args| packages(args).map(|p| format!("{} uninstall {}", program, p)),
    },
    CompensationRule {
        program: &["yarn"],
        subcommand: Some(&["add"]),
        derive: |_, args| packages(args).map(|p| format!("yarn remove {}", p)),
    },
    CompensationRule {
        program: &["pip", "pip3"],
        subcommand: Some(&["install"]),
        derive: pip_install,
    },
    CompensationRule {
        program: &["cargo"],
        subcommand: Some(&["add"]),
        derive: |_, args| packages(args).map(|p| format!("cargo remove {}", p)),
    },
    CompensationRule {
        program: &["mkdir"],
        subcommand: None,
        derive: mkdir,
    },
];

/// Derive the command that reverses `command`, if any rule matches
///
/// Compound commands (chains, pipes, redirects, substitutions, background
/// jobs) never get a compensation: only part of them would be reversed.
pub fn derive_compensation(command: &str) -> Option<String> {
    if is_compound(command) {
        return None;
    }
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let (sudo, tokens) = match tokens.split_first() {
        Some((&"sudo", rest)) => (true, rest),
        _ => (false, tokens.as_slice()),
    };

    let (program, rest) = tokens.split_first()?;
    let rule = RULES.iter().find(|rule| {
        rule.program.contains(program)
            && match rule.subcommand {
                Some(subs) => rest.first().is_some_and(|sub| subs.contains(sub)),
                None => true,
            }
    })?;

    let args = if rule.subcommand.is_some() { &rest[1..] } else { rest };
    let compensation = (rule.derive)(program, args)?;

    Some(if sudo {
        format!("sudo {}", compensation)
    } else {
        compensation
    })
}

/// Run `compensation` from `dir`, quoting the directory for `sh`
pub fn in_directory(dir: &Path, compensation: &str) -> String {
    let dir = dir.to_string_lossy().replace('\'', r"'\''");
    format!("cd '{}' && {}", dir, compensation)
}

fn is_compound(command: &str) -> bool {
    command.contains("$(")
        || command
            .chars()
            .any(|c| matches!(c, ';' | '&' | '|' | '<' | '>' | '`' | '\n'))
}

fn positional<'a>(args: &[&'a str]) -> Vec<&'a str> {
    args.iter().copied().filter(|a| !a.starts_with('-')).collect()
}

fn packages(args: &[&str]) -> Option<String> {
    let names = positional(args);
    if names.is_empty() {
        None
    } else {
        Some(names.join(" "))
    }
}

fn git_add(_: &str, args: &[&str]) -> Option<String> {
    let paths = positional(args);
    if paths.is_empty() {
        Some("git reset".to_string())
    } else {
        Some(format!("git reset {}", paths.join(" ")))
    }
}

fn git_branch(_: &str, args: &[&str]) -> Option<String> {
    // Flags mean delete/rename/list, which are not branch creation.
    if args.iter().any(|a| a.starts_with('-')) {
        return None;
    }
    args.first().map(|name| format!("git branch -D {}", name))
}

fn git_checkout_new_branch(_: &str, args: &[&str]) -> Option<String> {
    let flag = args.iter().position(|a| matches!(*a, "-b" | "-c"))?;
    let name = args.get(flag + 1)?;
    Some(format!("git checkout - && git branch -D {}", name))
}

fn git_stash(_: &str, args: &[&str]) -> Option<String> {
    match args.first() {
        None | Some(&"push") | Some(&"save") => Some("git stash pop".to_string()),
        Some(arg) if arg.starts_with('-') => Some("git stash pop".to_string()),
        _ => None,
    }
}

fn pip_install(program: &str, args: &[&str]) -> Option<String> {
    // Requirement files and editable installs cannot be reversed by name.
    if args.iter().any(|a| matches!(*a, "-r" | "--requirement" | "-e" | "--editable")) {
        return None;
    }
    packages(args).map(|p| format!("{} uninstall -y {}", program, p))
}

fn mkdir(_: &str, args: &[&str]) -> Option<String> {
    // With -p some parents may have existed already.
    if args.iter().any(|a| a.starts_with('-')) {
        return None;
    }
    packages(args).map(|dirs| format!("rmdir {}", dirs))
}
