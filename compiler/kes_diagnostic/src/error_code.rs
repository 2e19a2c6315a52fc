use std::fmt;

/// Error codes for back-end diagnostics.
///
/// Format: E#### where the first digit names the area:
/// - E1xxx: declaration shape (detected in the declaration phase)
/// - E2xxx: types, coercions and lock regions
/// - E3xxx: control flow
/// - E9xxx: internal compiler errors
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub enum ErrorCode {
    // Declaration shape (E1xxx)
    /// Duplicate argument name in a function signature
    E1001,
    /// Non-default argument follows a default argument
    E1002,
    /// Unconditional `except` clause is not the last one
    E1003,
    /// `nonlocal` declaration at module level
    E1004,
    /// `nonlocal` name has no binding in an enclosing function
    E1005,
    /// Name declared with conflicting storage or type
    E1006,

    // Types and regions (E2xxx)
    /// Cannot coerce a value to the required type
    E2001,
    /// Return with a value in a `void` function
    E2002,
    /// Return without a value in a non-void function
    E2003,
    /// `for ... from` relations point in different directions
    E2004,
    /// `for ... from` target is neither an integer nor an object
    E2005,
    /// Object operation while the lock is released
    E2006,
    /// Lock transition to the state already in effect
    E2007,
    /// Keyword arguments passed to a direct native call
    E2008,
    /// Operator not supported for the operand types
    E2009,
    /// Wrong number of arguments in a direct native call
    E2010,
    /// Expression cannot be deleted
    E2011,
    /// Expression cannot be assigned to
    E2012,

    // Control flow (E3xxx)
    /// `break` outside a loop
    E3001,
    /// `continue` outside a loop
    E3002,
    /// `return` outside a function
    E3003,
    /// `yield` outside a function
    E3004,

    // Internal (E9xxx)
    /// Internal compiler error
    E9001,
    /// Too many errors
    E9002,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E1001 => "E1001",
            ErrorCode::E1002 => "E1002",
            ErrorCode::E1003 => "E1003",
            ErrorCode::E1004 => "E1004",
            ErrorCode::E1005 => "E1005",
            ErrorCode::E1006 => "E1006",
            ErrorCode::E2001 => "E2001",
            ErrorCode::E2002 => "E2002",
            ErrorCode::E2003 => "E2003",
            ErrorCode::E2004 => "E2004",
            ErrorCode::E2005 => "E2005",
            ErrorCode::E2006 => "E2006",
            ErrorCode::E2007 => "E2007",
            ErrorCode::E2008 => "E2008",
            ErrorCode::E2009 => "E2009",
            ErrorCode::E2010 => "E2010",
            ErrorCode::E2011 => "E2011",
            ErrorCode::E2012 => "E2012",
            ErrorCode::E3001 => "E3001",
            ErrorCode::E3002 => "E3002",
            ErrorCode::E3003 => "E3003",
            ErrorCode::E3004 => "E3004",
            ErrorCode::E9001 => "E9001",
            ErrorCode::E9002 => "E9002",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
