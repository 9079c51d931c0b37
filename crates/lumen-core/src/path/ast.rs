/// Binary operators, in increasing binding strength: `or`, `and`,
/// equality, relational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
}

/// Parsed expression tree. `base: None` on members and functions means the
/// node applies to the evaluation focus.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `%name` environment variable reference (name stored without `%`).
    Variable(String),
    Member {
        base: Option<Box<Expr>>,
        name: String,
    },
    Function {
        base: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: usize,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}
