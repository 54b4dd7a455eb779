//! Command-line surface: the reference tool takes a terse mode string,
//! then an init file, then a workload file -- `program -tal0 <init-file>
//! <workload-file>`; every letter in the mode string runs the whole
//! workload again under that mode, in the order given (spec.md §6 /
//! SPEC_FULL §6).

use std::path::PathBuf;

use clap::Parser;

use crate::errors::EngineError;
use crate::executor::Mode;

#[derive(Debug, Parser)]
#[command(name = "joinbench", about = "Analytical join-benchmark query engine")]
pub struct Cli {
    /// Mode string: `t` = interpreted (tree-walking), `a` = all (both
    /// modes), `l0`..`l3` = JIT at optimization level 0-3. Each letter
    /// reruns the whole workload once, in the order listed. Passed with
    /// its leading hyphen (e.g. `-tal0`), matching the reference tool's
    /// `argv[1]` convention.
    #[arg(allow_hyphen_values = true)]
    pub modes: String,

    /// File listing relation file paths, one per line (line i = relation i).
    pub init_file: PathBuf,

    /// File of workload lines to parse, rewrite, and run.
    pub workload_file: PathBuf,
}

/// Expand a mode string like `tal2` into the ordered list of execution
/// modes it names: `t` is the interpreter, `a` and `l[0-3]` both select
/// the JIT path. Spec.md §6 names `a` and `l[0-3]` as two distinct JIT
/// backends at different optimization levels; this engine has a single
/// Cranelift backend with no optimization tiers of its own (Cranelift's
/// own `opt_level` setting is fixed at `speed` in `compile`), so every
/// one of those letters just reruns the workload through that one JIT
/// path again.
pub fn parse_modes(modes: &str) -> Result<Vec<Mode>, EngineError> {
    let modes = modes.strip_prefix('-').unwrap_or(modes);
    let mut result = Vec::new();
    let chars: Vec<char> = modes.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            't' => {
                result.push(Mode::Interpret);
                i += 1;
            }
            'a' => {
                result.push(Mode::Jit);
                i += 1;
            }
            'l' => {
                if i + 1 >= chars.len() || !chars[i + 1].is_ascii_digit() {
                    return Err(EngineError::ParseError {
                        line: 0,
                        message: format!("mode string {modes:?}: 'l' must be followed by a digit"),
                    });
                }
                result.push(Mode::Jit);
                i += 2;
            }
            other => {
                return Err(EngineError::ParseError {
                    line: 0,
                    message: format!("mode string {modes:?}: unrecognized mode character '{other}'"),
                });
            }
        }
    }
    if result.is_empty() {
        result.push(Mode::Interpret);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_letters_in_order() {
        let modes = parse_modes("tal0").unwrap();
        assert_eq!(modes, vec![Mode::Interpret, Mode::Jit, Mode::Jit]);
    }

    #[test]
    fn strips_leading_hyphen() {
        let modes = parse_modes("-tal0").unwrap();
        assert_eq!(modes, vec![Mode::Interpret, Mode::Jit, Mode::Jit]);
    }

    #[test]
    fn rejects_dangling_l() {
        assert!(parse_modes("l").is_err());
    }

    #[test]
    fn rejects_unknown_letter() {
        assert!(parse_modes("q").is_err());
    }
}
