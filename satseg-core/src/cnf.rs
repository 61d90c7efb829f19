//! DIMACS CNF model with variable compaction and clause normalization.
//!
//! A [`Cnf`] owns the clause list delivered to the graph builders. Parsing is
//! line-oriented: comment lines (`c`), blank lines, and stray whitespace are
//! tolerated; the `p cnf V C` problem line must precede any clause; clauses
//! are sequences of nonzero integers terminated by `0` and may span lines.
//! The declared clause count must match the number of clauses encountered.

use std::fmt;
use std::io::{self, BufRead};

use thiserror::Error;

/// Stable codes describing [`CnfError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CnfErrorCode {
    /// Reading from the input stream failed.
    Io,
    /// No `p cnf` problem line was found before clause data.
    MissingHeader,
    /// The problem line was present but malformed.
    InvalidHeader,
    /// A clause token was not a valid integer literal.
    InvalidLiteral,
    /// The declared clause count disagrees with the parsed clauses.
    ClauseCountMismatch,
}

impl CnfErrorCode {
    /// Returns the symbolic identifier for logging surfaces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "CNF_IO",
            Self::MissingHeader => "CNF_MISSING_HEADER",
            Self::InvalidHeader => "CNF_INVALID_HEADER",
            Self::InvalidLiteral => "CNF_INVALID_LITERAL",
            Self::ClauseCountMismatch => "CNF_CLAUSE_COUNT_MISMATCH",
        }
    }
}

impl fmt::Display for CnfErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while parsing a DIMACS CNF stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CnfError {
    /// Reading from the input stream failed.
    #[error("failed to read CNF input: {source}")]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// No `p cnf` problem line was found before clause data.
    #[error("no `p cnf` problem line found")]
    MissingHeader,
    /// The problem line was present but malformed.
    #[error("malformed problem line `{line}`")]
    InvalidHeader {
        /// The offending line, verbatim.
        line: String,
    },
    /// A clause token was not a valid integer literal.
    #[error("invalid literal token `{token}`")]
    InvalidLiteral {
        /// The offending token, verbatim.
        token: String,
    },
    /// The declared clause count disagrees with the parsed clauses.
    #[error("problem line declares {declared} clauses but {parsed} were parsed")]
    ClauseCountMismatch {
        /// Clause count from the problem line.
        declared: u32,
        /// Number of clauses actually encountered.
        parsed: u32,
    },
}

impl CnfError {
    /// Retrieve the stable [`CnfErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> CnfErrorCode {
        match self {
            Self::Io { .. } => CnfErrorCode::Io,
            Self::MissingHeader => CnfErrorCode::MissingHeader,
            Self::InvalidHeader { .. } => CnfErrorCode::InvalidHeader,
            Self::InvalidLiteral { .. } => CnfErrorCode::InvalidLiteral,
            Self::ClauseCountMismatch { .. } => CnfErrorCode::ClauseCountMismatch,
        }
    }
}

/// A CNF formula: clauses of signed nonzero literals over 1-based variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cnf {
    variable_count: u32,
    clause_count: u32,
    clauses: Vec<Vec<i32>>,
}

impl Cnf {
    /// Builds a formula directly from a clause list.
    ///
    /// Intended for programmatic construction; `variable_count` must cover
    /// every variable referenced by `clauses`.
    #[must_use]
    pub fn from_clauses(variable_count: u32, clauses: Vec<Vec<i32>>) -> Self {
        let clause_count = clauses.len() as u32;
        Self {
            variable_count,
            clause_count,
            clauses,
        }
    }

    /// Parses a DIMACS CNF stream.
    ///
    /// # Errors
    ///
    /// Returns [`CnfError`] when the stream cannot be read, the problem line
    /// is missing or malformed, a literal token is not an integer, or the
    /// declared clause count does not match the clauses encountered.
    ///
    /// # Examples
    ///
    /// ```
    /// use satseg_core::Cnf;
    ///
    /// let cnf = Cnf::parse("c comment\np cnf 2 1\n1 -2 0\n".as_bytes())?;
    /// assert_eq!(cnf.variable_count(), 2);
    /// assert_eq!(cnf.clauses(), &[vec![1, -2]]);
    /// # Ok::<(), satseg_core::CnfError>(())
    /// ```
    pub fn parse(reader: impl BufRead) -> Result<Self, CnfError> {
        let mut header: Option<(u32, u32)> = None;
        let mut clauses: Vec<Vec<i32>> = Vec::new();
        let mut current: Vec<i32> = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(|source| CnfError::Io { source })?;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('c') {
                continue;
            }
            if trimmed.starts_with('p') {
                if header.is_some() {
                    return Err(CnfError::InvalidHeader { line });
                }
                header = Some(parse_problem_line(trimmed).ok_or(CnfError::InvalidHeader {
                    line: line.clone(),
                })?);
                clauses.reserve(header.map_or(0, |(_, c)| c as usize));
                continue;
            }
            if header.is_none() {
                return Err(CnfError::MissingHeader);
            }
            for token in trimmed.split_whitespace() {
                let literal: i32 = token.parse().map_err(|_| CnfError::InvalidLiteral {
                    token: token.to_owned(),
                })?;
                if literal == 0 {
                    if !current.is_empty() {
                        clauses.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(literal);
                }
            }
        }
        // A trailing clause without its 0 terminator is still kept.
        if !current.is_empty() {
            clauses.push(current);
        }

        let (variable_count, declared) = header.ok_or(CnfError::MissingHeader)?;
        let parsed = clauses.len() as u32;
        if parsed != declared {
            return Err(CnfError::ClauseCountMismatch { declared, parsed });
        }

        Ok(Self {
            variable_count,
            clause_count: declared,
            clauses,
        })
    }

    /// Number of variables the formula ranges over.
    #[must_use]
    #[rustfmt::skip]
    pub fn variable_count(&self) -> u32 { self.variable_count }

    /// Number of clauses currently held.
    #[must_use]
    #[rustfmt::skip]
    pub fn clause_count(&self) -> u32 { self.clause_count }

    /// The clause list.
    #[must_use]
    #[rustfmt::skip]
    pub fn clauses(&self) -> &[Vec<i32>] { &self.clauses }

    /// Renumbers variables into a dense `1..=K` range by first appearance.
    ///
    /// Polarity is preserved. Variables the header declared but no clause
    /// uses are dropped from the range; variables used beyond the declared
    /// count are accommodated. Idempotent: compacting a compacted formula
    /// changes nothing.
    pub fn compact_variables(&mut self) {
        let mut map: Vec<u32> = vec![0; self.variable_count as usize];
        let mut next: u32 = 1;
        for clause in &mut self.clauses {
            for literal in clause.iter_mut() {
                if *literal == 0 {
                    continue;
                }
                let var = literal.unsigned_abs() as usize - 1;
                if var >= map.len() {
                    map.resize(var + 1, 0);
                }
                if map[var] == 0 {
                    map[var] = next;
                    next += 1;
                }
                *literal = literal.signum() * map[var] as i32;
            }
        }
        self.variable_count = next - 1;
    }

    /// Normalizes every clause: literals sorted ascending by absolute value,
    /// duplicate literals removed, tautological clauses (a literal and its
    /// negation) dropped, empty clauses dropped. Updates the clause count.
    ///
    /// Idempotent: normalizing a normalized formula changes nothing.
    pub fn normalize(&mut self) {
        self.clauses.retain_mut(|clause| {
            clause.sort_unstable_by_key(|lit| (lit.unsigned_abs(), *lit));
            clause.dedup();
            let tautological = clause
                .windows(2)
                .any(|pair| pair[0].unsigned_abs() == pair[1].unsigned_abs());
            !tautological && !clause.is_empty()
        });
        self.clause_count = self.clauses.len() as u32;
    }
}

fn parse_problem_line(line: &str) -> Option<(u32, u32)> {
    let mut fields = line.split_whitespace();
    if fields.next() != Some("p") || fields.next() != Some("cnf") {
        return None;
    }
    let variables: u32 = fields.next()?.parse().ok()?;
    let clauses: u32 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((variables, clauses))
}
