use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Alt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Name(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identity,
    Literal(Value),
    /// `target[index]`; field access `.name` is an index with a string literal.
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// `target[]`
    Iterate(Box<Expr>),
    /// `expr?`
    Optional(Box<Expr>),
    Array(Option<Box<Expr>>),
    Object(Vec<(ObjectKey, Option<Expr>)>),
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Call(String, Vec<Expr>),
    Var(String),
    /// `source as $name | body`
    Bind {
        source: Box<Expr>,
        name: String,
        body: Box<Expr>,
    },
}

impl Expr {
    pub(crate) fn field(target: Expr, name: impl Into<String>) -> Expr {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(Expr::Literal(Value::String(name.into()))),
        }
    }
}
