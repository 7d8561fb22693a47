//! Permission specifications: absolute octal modes and chmod-style symbolic
//! expressions such as `u=rwx,go=rx` or `a+X`.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use crate::error::LayerError;

const PERMISSION_BITS: u32 = 0o7777;
const SPECIAL_BITS: u32 = 0o7000;

/// A parsed `mode` field.
#[derive(Clone, Debug, PartialEq)]
pub enum ModeSpec {
    /// Fixed permission bits; `None` keeps whatever base the caller supplies.
    Absolute(Option<u32>),
    Symbolic(SymbolicMode),
}

impl Default for ModeSpec {
    fn default() -> Self {
        Self::Absolute(None)
    }
}

impl ModeSpec {
    /// Parses a mode string.
    ///
    /// Exactly four octal digits give an absolute mode. Any other all-digit
    /// string is rejected instead of being guessed at; everything else is a
    /// symbolic expression evaluated against `umask` when it has no scope.
    pub fn parse(spec: Option<&str>, umask: u32) -> Result<Self, LayerError> {
        let Some(spec) = spec else {
            return Ok(Self::Absolute(None));
        };
        if !spec.is_empty() && spec.bytes().all(|b| b.is_ascii_digit()) {
            if spec.len() != 4 {
                return Err(LayerError::InvalidNumericMode {
                    mode: spec.to_string(),
                });
            }
            let bits =
                u32::from_str_radix(spec, 8).map_err(|_| LayerError::InvalidNumericMode {
                    mode: spec.to_string(),
                })?;
            return Ok(Self::Absolute(Some(bits)));
        }
        SymbolicMode::parse(spec, umask).map(Self::Symbolic)
    }

    #[must_use]
    pub fn apply(&self, base: u32, is_dir: bool) -> u32 {
        match self {
            Self::Absolute(None) => base,
            Self::Absolute(Some(bits)) => *bits,
            Self::Symbolic(symbolic) => symbolic.apply(base, is_dir),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Add,
    Remove,
    Set,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
    User,
    Group,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Change {
    /// Copy one class's current bits to every class (`g=u`).
    Copy(Class),
    /// Permission letters from `rwxXst`.
    Letters {
        bits: u32,
        conditional_exec: bool,
        special: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Action {
    op: Op,
    change: Change,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Clause {
    /// `None` when the clause names no class; the umask then decides.
    scope: Option<u32>,
    actions: Vec<Action>,
}

/// A symbolic mode expression with a per-instance memo of results.
#[derive(Clone, Debug)]
pub struct SymbolicMode {
    expression: String,
    umask: u32,
    clauses: Vec<Clause>,
    cache: RefCell<HashMap<(u32, bool), u32>>,
}

impl PartialEq for SymbolicMode {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.umask == other.umask
    }
}

impl SymbolicMode {
    pub fn parse(expression: &str, umask: u32) -> Result<Self, LayerError> {
        let clauses = expression
            .split(',')
            .map(|clause| parse_clause(expression, clause))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expression: expression.to_string(),
            umask,
            clauses,
            cache: RefCell::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn apply(&self, base: u32, is_dir: bool) -> u32 {
        let key = (base, is_dir);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return *cached;
        }
        let mut mode = base;
        for clause in &self.clauses {
            mode = self.apply_clause(clause, mode, is_dir);
        }
        trace!(
            expression = %self.expression,
            base,
            is_dir,
            result = mode,
            "resolved symbolic mode"
        );
        self.cache.borrow_mut().insert(key, mode);
        mode
    }

    fn apply_clause(&self, clause: &Clause, mut mode: u32, is_dir: bool) -> u32 {
        let mut mask = clause
            .scope
            .unwrap_or(!self.umask & PERMISSION_BITS);
        for action in &clause.actions {
            let change = match action.change {
                Change::Copy(class) => copy_class(mode, class),
                Change::Letters {
                    bits,
                    conditional_exec,
                    special,
                } => {
                    let mut change = bits;
                    if conditional_exec && (is_dir || mode & 0o111 != 0) {
                        change |= 0o111;
                    }
                    if special != 0 {
                        mask |= SPECIAL_BITS;
                        change |= special;
                    }
                    change
                }
            };
            mode = match action.op {
                Op::Add => mode | (mask & change),
                Op::Remove => mode & !(mask & change),
                Op::Set => (mode & !mask) | (mask & change),
            };
        }
        mode
    }
}

fn copy_class(mode: u32, class: Class) -> u32 {
    match class {
        Class::User => {
            let bits = mode & 0o700;
            bits | (bits >> 3) | (bits >> 6)
        }
        Class::Group => {
            let bits = mode & 0o070;
            (bits << 3) | bits | (bits >> 3)
        }
        Class::Other => {
            let bits = mode & 0o007;
            (bits << 6) | (bits << 3) | bits
        }
    }
}

fn parse_clause(expression: &str, clause: &str) -> Result<Clause, LayerError> {
    let invalid = || LayerError::InvalidModeFormat {
        mode: expression.to_string(),
        clause: clause.to_string(),
    };
    let chars: Vec<char> = clause.chars().collect();
    let mut index = 0;

    let mut scope = 0;
    while let Some(c) = chars.get(index) {
        scope |= match c {
            'u' => 0o700,
            'g' => 0o070,
            'o' => 0o007,
            'a' => 0o777,
            _ => break,
        };
        index += 1;
    }
    let scope = (index > 0).then_some(scope);

    let mut actions = Vec::new();
    while let Some(op) = chars.get(index).and_then(|c| parse_op(*c)) {
        index += 1;
        let change = match chars.get(index) {
            Some('u') => Some(Class::User),
            Some('g') => Some(Class::Group),
            Some('o') => Some(Class::Other),
            _ => None,
        };
        if let Some(class) = change {
            index += 1;
            actions.push(Action {
                op,
                change: Change::Copy(class),
            });
            continue;
        }

        let mut bits = 0;
        let mut conditional_exec = false;
        let mut special = 0;
        while let Some(c) = chars.get(index) {
            match c {
                'r' => bits |= 0o444,
                'w' => bits |= 0o222,
                'x' => bits |= 0o111,
                'X' => conditional_exec = true,
                's' => special |= 0o4000 | 0o2000,
                't' => special |= 0o1000,
                _ => break,
            }
            index += 1;
        }
        actions.push(Action {
            op,
            change: Change::Letters {
                bits,
                conditional_exec,
                special,
            },
        });
    }

    if index != chars.len() {
        return Err(invalid());
    }
    Ok(Clause { scope, actions })
}

fn parse_op(c: char) -> Option<Op> {
    match c {
        '+' => Some(Op::Add),
        '-' => Some(Op::Remove),
        '=' => Some(Op::Set),
        _ => None,
    }
}
