use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Ident(String),
    Array(Vec<Option<Pattern>>, Option<Box<Pattern>>),
    Object(Vec<(PropKey, Pattern)>, Option<Box<Pattern>>),
    Default(Box<Pattern>, Box<Expr>),
    /// Assignment target that is not a plain binding, e.g. `[a.b] = xs`.
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum PropKey {
    Named(String),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum Prop {
    KeyValue(PropKey, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub(crate) name: Option<String>,
    pub(crate) params: Vec<Pattern>,
    pub(crate) rest: Option<Pattern>,
    pub(crate) body: FunctionBody,
    pub(crate) is_arrow: bool,
}

#[derive(Debug)]
pub(crate) struct ClassMember {
    pub(crate) key: PropKey,
    pub(crate) is_static: bool,
    pub(crate) kind: ClassMemberKind,
}

#[derive(Debug)]
pub(crate) enum ClassMemberKind {
    Method(Rc<FunctionDef>),
    Field(Option<Expr>),
}

#[derive(Debug)]
pub(crate) struct ClassDef {
    pub(crate) name: Option<String>,
    pub(crate) extends: Option<Expr>,
    pub(crate) constructor: Option<Rc<FunctionDef>>,
    pub(crate) members: Vec<ClassMember>,
}

#[derive(Debug, Clone)]
pub(crate) enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Number(f64),
    Str(Rc<str>),
    Template(Vec<TemplatePart>),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    This,
    Array(Vec<Option<Expr>>),
    Object(Vec<Prop>),
    Function(Rc<FunctionDef>),
    Class(Rc<ClassDef>),
    Unary(&'static str, Box<Expr>),
    Update {
        op: &'static str,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Logical(&'static str, Box<Expr>, Box<Expr>),
    Assign(&'static str, Box<Pattern>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Member {
        object: Box<Expr>,
        property: Box<PropKey>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    New(Box<Expr>, Vec<Expr>),
    Spread(Box<Expr>),
    Sequence(Vec<Expr>),
    SuperCall(Vec<Expr>),
    SuperMember(Box<PropKey>),
}

#[derive(Debug, Clone)]
pub(crate) enum ForInit {
    Decl(DeclKind, Vec<(Pattern, Option<Expr>)>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Expr(Expr),
    Decl(DeclKind, Vec<(Pattern, Option<Expr>)>),
    Function(Rc<FunctionDef>),
    Class(Rc<ClassDef>),
    Return(Option<Expr>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    Block(Vec<Stmt>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    /// A missing declaration kind assigns to existing bindings.
    ForOf(Option<DeclKind>, Pattern, Expr, Box<Stmt>),
    ForIn(Option<DeclKind>, Pattern, Expr, Box<Stmt>),
    Break(Option<String>),
    Continue(Option<String>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<Pattern>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Switch(Expr, Vec<(Option<Expr>, Vec<Stmt>)>),
    Labeled(String, Box<Stmt>),
    Empty,
}
