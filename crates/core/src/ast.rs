//! Small node builders and inspectors shared by the transform crates.
//!
//! All builders produce nodes with dummy spans and an empty syntax context;
//! rewritten code has no meaningful source position.

use swc_core::common::{SyntaxContext, DUMMY_SP};
use swc_core::ecma::ast::*;

/// Statement containers: plain statement lists and module bodies.
pub trait StmtLike: Sized {
    fn as_stmt(&self) -> Option<&Stmt>;
    fn as_stmt_mut(&mut self) -> Option<&mut Stmt>;
    fn into_stmt(self) -> Result<Stmt, Self>;
    fn from_stmt(stmt: Stmt) -> Self;
}

impl StmtLike for Stmt {
    fn as_stmt(&self) -> Option<&Stmt> {
        Some(self)
    }

    fn as_stmt_mut(&mut self) -> Option<&mut Stmt> {
        Some(self)
    }

    fn into_stmt(self) -> Result<Stmt, Self> {
        Ok(self)
    }

    fn from_stmt(stmt: Stmt) -> Self {
        stmt
    }
}

impl StmtLike for ModuleItem {
    fn as_stmt(&self) -> Option<&Stmt> {
        match self {
            Self::Stmt(stmt) => Some(stmt),
            Self::ModuleDecl(_) => None,
        }
    }

    fn as_stmt_mut(&mut self) -> Option<&mut Stmt> {
        match self {
            Self::Stmt(stmt) => Some(stmt),
            Self::ModuleDecl(_) => None,
        }
    }

    fn into_stmt(self) -> Result<Stmt, Self> {
        match self {
            Self::Stmt(stmt) => Ok(stmt),
            other => Err(other),
        }
    }

    fn from_stmt(stmt: Stmt) -> Self {
        Self::Stmt(stmt)
    }
}

pub fn ident(name: &str) -> Ident {
    Ident::new(name.into(), DUMMY_SP, SyntaxContext::empty())
}

pub fn ident_expr(name: &str) -> Expr {
    Expr::Ident(ident(name))
}

pub fn str_lit(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

/// Builds a number literal. Negative values become a unary minus, and
/// non-finite values are spelled as JavaScript would.
pub fn num_lit(value: f64) -> Expr {
    if value.is_nan() {
        return ident_expr("NaN");
    }
    if value.is_infinite() {
        let inf = ident_expr("Infinity");
        return if value > 0.0 { inf } else { unary(UnaryOp::Minus, inf) };
    }
    if value < 0.0 || (value == 0.0 && value.is_sign_negative()) {
        return unary(UnaryOp::Minus, num_lit(-value));
    }
    Expr::Lit(Lit::Num(Number {
        span: DUMMY_SP,
        value,
        raw: None,
    }))
}

pub fn bool_lit(value: bool) -> Expr {
    Expr::Lit(Lit::Bool(Bool {
        span: DUMMY_SP,
        value,
    }))
}

pub fn null_lit() -> Expr {
    Expr::Lit(Lit::Null(Null { span: DUMMY_SP }))
}

pub fn unary(op: UnaryOp, arg: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        span: DUMMY_SP,
        op,
        arg: Box::new(arg),
    })
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Bin(BinExpr {
        span: DUMMY_SP,
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        callee: Callee::Expr(Box::new(callee)),
        args: args
            .into_iter()
            .map(|expr| ExprOrSpread {
                spread: None,
                expr: Box::new(expr),
            })
            .collect(),
        type_args: None,
    })
}

/// `obj.prop`, or `obj["prop"]` when `prop` is not an identifier name.
pub fn member(obj: Expr, prop: &str) -> Expr {
    let prop = if is_identifier_name(prop) {
        MemberProp::Ident(IdentName::new(prop.into(), DUMMY_SP))
    } else {
        MemberProp::Computed(ComputedPropName {
            span: DUMMY_SP,
            expr: Box::new(str_lit(prop)),
        })
    };
    Expr::Member(MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(obj),
        prop,
    })
}

pub fn assign(left: AssignTarget, right: Expr) -> Expr {
    Expr::Assign(AssignExpr {
        span: DUMMY_SP,
        op: AssignOp::Assign,
        left,
        right: Box::new(right),
    })
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    })
}

pub fn block(stmts: Vec<Stmt>) -> BlockStmt {
    BlockStmt {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        stmts,
    }
}

/// Wraps a statement in a block unless it already is one.
pub fn into_block(stmt: Stmt) -> BlockStmt {
    match stmt {
        Stmt::Block(block) => block,
        Stmt::Empty(_) => block(vec![]),
        other => block(vec![other]),
    }
}

pub fn var_decl(kind: VarDeclKind, name: &str, init: Option<Expr>) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        kind,
        declare: false,
        decls: vec![VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(BindingIdent {
                id: ident(name),
                type_ann: None,
            }),
            init: init.map(Box::new),
            definite: false,
        }],
    })))
}

pub fn undefined() -> Expr {
    ident_expr("undefined")
}

/// JavaScript `IdentifierName`: valid after a dot or as an object key.
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || c == '_' || c.is_alphanumeric() || c == '\u{200c}' || c == '\u{200d}')
}

const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// An identifier that can be declared as a binding.
pub fn is_binding_name(name: &str) -> bool {
    is_identifier_name(name) && !RESERVED.contains(&name)
}

pub fn as_ident(expr: &Expr) -> Option<&Ident> {
    match expr {
        Expr::Ident(ident) => Some(ident),
        _ => None,
    }
}

pub fn is_ident(expr: &Expr, name: &str) -> bool {
    as_ident(expr).is_some_and(|i| &*i.sym == name)
}

pub fn as_str(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Lit(Lit::Str(s)) => Some(&*s.value),
        _ => None,
    }
}

/// Numeric value of a number literal, including a negated one.
pub fn as_number(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Lit(Lit::Num(n)) => Some(n.value),
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Minus,
            arg,
            ..
        }) => match &**arg {
            Expr::Lit(Lit::Num(n)) => Some(-n.value),
            _ => None,
        },
        _ => None,
    }
}

/// Literal values that are safe to duplicate or move.
pub fn is_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Lit(Lit::Str(_) | Lit::Num(_) | Lit::Bool(_) | Lit::Null(_) | Lit::BigInt(_)) => true,
        Expr::Unary(UnaryExpr { op: UnaryOp::Minus, arg, .. }) => {
            matches!(&**arg, Expr::Lit(Lit::Num(_)))
        }
        Expr::Tpl(tpl) => tpl.exprs.is_empty(),
        _ => false,
    }
}

/// Static name of a member property: `a.b`, `a["b"]` and `a[0]`.
pub fn member_prop_name(prop: &MemberProp) -> Option<String> {
    match prop {
        MemberProp::Ident(name) => Some(name.sym.to_string()),
        MemberProp::Computed(computed) => match &*computed.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            Expr::Lit(Lit::Num(n)) => Some(number_to_string(n.value)),
            _ => None,
        },
        MemberProp::PrivateName(_) => None,
    }
}

/// Static name of an object literal key.
pub fn prop_name_str(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(name) => Some(name.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        PropName::Num(n) => Some(number_to_string(n.value)),
        PropName::Computed(computed) => match &*computed.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            Expr::Lit(Lit::Num(n)) => Some(number_to_string(n.value)),
            _ => None,
        },
        PropName::BigInt(_) => None,
    }
}

/// `obj.name` or `obj["name"]`.
pub fn is_member_named(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Member(m) => member_prop_name(&m.prop).as_deref() == Some(name),
        _ => false,
    }
}

/// JavaScript's `Number.prototype.toString()` for the common cases.
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else if value == value.trunc() && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// The callee of a plain call, if it is an expression.
pub fn callee_expr(call: &CallExpr) -> Option<&Expr> {
    match &call.callee {
        Callee::Expr(expr) => Some(expr),
        _ => None,
    }
}

/// True when every argument is a literal and none is spread.
pub fn has_literal_args(call: &CallExpr) -> bool {
    call.args
        .iter()
        .all(|arg| arg.spread.is_none() && is_literal(&arg.expr))
}

/// Binding name of a simple `Pat::Ident`.
pub fn pat_ident_name(pat: &Pat) -> Option<&str> {
    match pat {
        Pat::Ident(binding) => Some(&*binding.id.sym),
        _ => None,
    }
}

/// Returns an immediately invoked function's callee function, looking
/// through `!function(){}()` style prefixes.
pub fn iife_function(expr: &Expr) -> Option<(&CallExpr, FunctionLike<'_>)> {
    let expr = match expr {
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Bang | UnaryOp::Void | UnaryOp::Plus | UnaryOp::Minus | UnaryOp::Tilde,
            arg,
            ..
        }) => &**arg,
        other => other,
    };
    let Expr::Call(call) = expr else {
        return None;
    };
    let function = FunctionLike::from_expr(callee_expr(call)?)?;
    Some((call, function))
}

/// A borrowed view over function expressions and arrows.
#[derive(Debug, Clone, Copy)]
pub enum FunctionLike<'a> {
    Function(&'a Function),
    Arrow(&'a ArrowExpr),
}

impl<'a> FunctionLike<'a> {
    pub fn from_expr(expr: &'a Expr) -> Option<Self> {
        match expr {
            Expr::Fn(f) => Some(Self::Function(&f.function)),
            Expr::Arrow(a) => Some(Self::Arrow(a)),
            _ => None,
        }
    }

    pub fn param_names(&self) -> Vec<Option<&'a str>> {
        match self {
            Self::Function(f) => f.params.iter().map(|p| pat_ident_name(&p.pat)).collect(),
            Self::Arrow(a) => a.params.iter().map(pat_ident_name).collect(),
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Self::Function(f) => f.params.len(),
            Self::Arrow(a) => a.params.len(),
        }
    }

    /// Statements of a block body. Expression-bodied arrows have none.
    pub fn body_stmts(&self) -> Option<&'a [Stmt]> {
        match self {
            Self::Function(f) => f.body.as_ref().map(|b| b.stmts.as_slice()),
            Self::Arrow(a) => match &*a.body {
                BlockStmtOrExpr::BlockStmt(b) => Some(b.stmts.as_slice()),
                BlockStmtOrExpr::Expr(_) => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_names() {
        assert!(is_identifier_name("foo"));
        assert!(is_identifier_name("$_a1"));
        assert!(is_identifier_name("default"));
        assert!(!is_identifier_name("1a"));
        assert!(!is_identifier_name("a-b"));
        assert!(!is_identifier_name(""));
        assert!(!is_binding_name("default"));
        assert!(is_binding_name("module"));
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-3.0), "-3");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_num_lit_negative() {
        assert_eq!(as_number(&num_lit(-2.0)), Some(-2.0));
        assert!(matches!(num_lit(f64::INFINITY), Expr::Ident(_)));
    }
}
