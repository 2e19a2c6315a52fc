//! Operator enums shared by the expression and statement lowerings.

/// Arithmetic and bitwise binary operators.
///
/// The same set is used for plain binary expressions and for in-place
/// assignment (`a += b`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    /// Source-level symbol, used in diagnostics.
    pub const fn as_symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }

    /// C operator for native operands, or `None` when the operation needs a
    /// helper because C semantics differ (floor division, modulo, power).
    pub const fn c_operator(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("+"),
            Self::Sub => Some("-"),
            Self::Mul => Some("*"),
            Self::Div => Some("/"),
            Self::LShift => Some("<<"),
            Self::RShift => Some(">>"),
            Self::BitAnd => Some("&"),
            Self::BitOr => Some("|"),
            Self::BitXor => Some("^"),
            Self::FloorDiv | Self::Mod | Self::Pow => None,
        }
    }

    /// Suffix of the native helper used when `c_operator` is `None`.
    pub const fn native_helper(self) -> &'static str {
        match self {
            Self::FloorDiv => "__kes_floordiv",
            Self::Mod => "__kes_mod",
            _ => "__kes_pow",
        }
    }

    /// Runtime function applying the operator to two objects.
    pub const fn runtime_function(self) -> &'static str {
        match self {
            Self::Add => "Kes_Add",
            Self::Sub => "Kes_Subtract",
            Self::Mul => "Kes_Multiply",
            Self::Div => "Kes_TrueDivide",
            Self::FloorDiv => "Kes_FloorDivide",
            Self::Mod => "Kes_Remainder",
            Self::Pow => "Kes_Power",
            Self::LShift => "Kes_Lshift",
            Self::RShift => "Kes_Rshift",
            Self::BitAnd => "Kes_And",
            Self::BitOr => "Kes_Or",
            Self::BitXor => "Kes_Xor",
        }
    }

    /// Runtime function for the in-place form on objects.
    pub const fn inplace_runtime_function(self) -> &'static str {
        match self {
            Self::Add => "Kes_InPlaceAdd",
            Self::Sub => "Kes_InPlaceSubtract",
            Self::Mul => "Kes_InPlaceMultiply",
            Self::Div => "Kes_InPlaceTrueDivide",
            Self::FloorDiv => "Kes_InPlaceFloorDivide",
            Self::Mod => "Kes_InPlaceRemainder",
            Self::Pow => "Kes_InPlacePower",
            Self::LShift => "Kes_InPlaceLshift",
            Self::RShift => "Kes_InPlaceRshift",
            Self::BitAnd => "Kes_InPlaceAnd",
            Self::BitOr => "Kes_InPlaceOr",
            Self::BitXor => "Kes_InPlaceXor",
        }
    }

    /// Bitwise and shift operators are only defined on integers.
    pub const fn is_integer_only(self) -> bool {
        matches!(
            self,
            Self::LShift | Self::RShift | Self::BitAnd | Self::BitOr | Self::BitXor
        )
    }
}

/// Comparison operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Is,
    IsNot,
}

impl CmpOp {
    pub const fn as_symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }

    /// C operator; identity comparisons compare pointers.
    pub const fn c_operator(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq | Self::Is => "==",
            Self::Ne | Self::IsNot => "!=",
        }
    }

    /// Runtime rich-comparison opcode, `None` for identity tests.
    pub const fn rich_compare_op(self) -> Option<&'static str> {
        match self {
            Self::Lt => Some("KES_LT"),
            Self::Le => Some("KES_LE"),
            Self::Gt => Some("KES_GT"),
            Self::Ge => Some("KES_GE"),
            Self::Eq => Some("KES_EQ"),
            Self::Ne => Some("KES_NE"),
            Self::Is | Self::IsNot => None,
        }
    }

    /// The relation usable in a `for ... from` header, if any.
    pub const fn as_relation(self) -> Option<Relation> {
        match self {
            Self::Lt => Some(Relation::Lt),
            Self::Le => Some(Relation::Le),
            Self::Gt => Some(Relation::Gt),
            Self::Ge => Some(Relation::Ge),
            _ => None,
        }
    }
}

/// Iteration direction of an integer range loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Unit step operator (`++` / `--`).
    pub const fn increment(self) -> &'static str {
        match self {
            Self::Up => "++",
            Self::Down => "--",
        }
    }

    /// Compound operator for an explicit step (`+=` / `-=`).
    pub const fn compound(self) -> &'static str {
        match self {
            Self::Up => "+=",
            Self::Down => "-=",
        }
    }
}

/// Relations allowed in `for i from a <rel> i <rel> b`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    pub const fn as_symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Offset added to the lower bound and direction of travel when this is
    /// the first relation of the header.
    pub const fn start_offset_and_direction(self) -> (i8, Direction) {
        match self {
            Self::Le => (0, Direction::Up),
            Self::Lt => (1, Direction::Up),
            Self::Ge => (0, Direction::Down),
            Self::Gt => (-1, Direction::Down),
        }
    }

    pub const fn direction(self) -> Direction {
        self.start_offset_and_direction().1
    }
}
