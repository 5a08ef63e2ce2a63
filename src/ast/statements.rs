use crate::Span;

use super::{ast::NodeId, expressions::Expr, types::TypeNode};

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `import a.b;`
    Import { path: Vec<String> },
    /// `export name;`
    Export { name: String },
    Function(FunctionDecl),
    Declaration(Declaration),
    Assignment { target: Expr, value: Expr },
    Expression(Expr),
    Return(Option<Expr>),
    If {
        condition: Expr,
        consequent: Vec<Stmt>,
        alternate: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        condition: Expr,
    },
    For {
        init: Box<Stmt>,
        condition: Expr,
        step: Box<Stmt>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Object(ObjectDecl),
    Operator(OperatorDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: Option<TypeNode>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub ty: Option<TypeNode>,
    pub value: Expr,
    pub constant: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDecl {
    pub name: String,
    /// Template attribute names, empty for plain objects.
    pub attributes: Vec<String>,
    pub fields: Vec<Field>,
    /// A `Function` statement whose first param is `self`.
    pub constructor: Option<Box<Stmt>>,
    /// `Function` statements whose first param is `self`.
    pub methods: Vec<Stmt>,
}

impl ObjectDecl {
    pub fn is_template(&self) -> bool {
        !self.attributes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeNode,
}

/// `operator (int:a + Vec:b) Vec { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDecl {
    pub op: super::expressions::BinaryOp,
    /// A `Function` statement with exactly two params.
    pub function: Box<Stmt>,
}

impl Stmt {
    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            StmtKind::Function(function) => Some(function),
            _ => None,
        }
    }
}
