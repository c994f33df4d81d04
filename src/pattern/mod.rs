//! The pattern mini-language used to locate IR positions.
//!
//! Grammar: identifiers, the wildcard `_`, statement
//! forms (`for i in _: _`, `if _: _`, `x = _`, `x[_] = _`, `x += _`,
//! `x : _`, `f(_)`), `;`-separated statement sequences, expression forms,
//! and a trailing occurrence selector `#k` (1-indexed among pre-order
//! matches).

pub mod matcher;
pub mod parse;

use thiserror::Error;

use crate::cursors::CursorLoc;
use crate::ir::proc::Proc;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern syntax error: {0}")]
    Syntax(String),
    #[error("no match for pattern '{0}'")]
    NoMatch(String),
    #[error("pattern '{0}' has only {1} matches, occurrence #{2} requested")]
    OccurrenceOutOfRange(String, usize, usize),
}

/// All matches of `pattern_src` in pre-order.
pub fn find_all(proc: &Proc, pattern_src: &str) -> Result<Vec<CursorLoc>, PatternError> {
    let parsed = parse::parse_pattern(pattern_src)
        .map_err(|e| PatternError::Syntax(format!("{e} in '{pattern_src}'")))?;
    let matches = matcher::matches(proc, &parsed.pattern);
    if matches.is_empty() {
        return Err(PatternError::NoMatch(pattern_src.to_string()));
    }
    Ok(matches)
}

/// The selected match: `#k` if the pattern carries an occurrence
/// selector, the first match otherwise.
pub fn find(proc: &Proc, pattern_src: &str) -> Result<CursorLoc, PatternError> {
    let parsed = parse::parse_pattern(pattern_src)
        .map_err(|e| PatternError::Syntax(format!("{e} in '{pattern_src}'")))?;
    let matches = matcher::matches(proc, &parsed.pattern);
    if matches.is_empty() {
        return Err(PatternError::NoMatch(pattern_src.to_string()));
    }
    let k = parsed.occurrence.unwrap_or(1);
    if k == 0 || k > matches.len() {
        return Err(PatternError::OccurrenceOutOfRange(
            pattern_src.to_string(),
            matches.len(),
            k,
        ));
    }
    Ok(matches[k - 1].clone())
}
