use std::rc::Rc;

use super::ast::*;
use super::lexer::{tokenize, Spanned, TemplateChunk, Token};
use super::value::number_to_string;
use super::SyntaxError;

type PResult<T> = Result<T, SyntaxError>;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof", "let",
    "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var", "void", "while",
    "null", "true", "false",
];

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

fn binary_precedence(op: &str) -> Option<u8> {
    let prec = match op {
        "??" => 1,
        "||" => 2,
        "&&" => 3,
        "|" => 4,
        "^" => 5,
        "&" => 6,
        "==" | "!=" | "===" | "!==" => 7,
        "<" | ">" | "<=" | ">=" | "instanceof" | "in" => 8,
        "<<" | ">>" | ">>>" => 9,
        "+" | "-" => 10,
        "*" | "/" | "%" => 11,
        "**" => 12,
        _ => return None,
    };
    Some(prec)
}

/// Parses a whole script into its statement list, rejecting anything nested
/// deeper than `max_nesting`.
pub(crate) fn parse_program(source: &str, max_nesting: usize) -> PResult<Vec<Stmt>> {
    let mut parser = Parser::new(tokenize(source)?, 0, max_nesting);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.parse_statement()?);
    }
    Ok(body)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// For each opening bracket, the index of the bracket that closes it.
    closers: Vec<Option<usize>>,
    depth: usize,
    max_depth: usize,
}

/// Pairs brackets in one pass. Any closer ends the innermost open bracket.
fn match_brackets(tokens: &[Spanned]) -> Vec<Option<usize>> {
    let mut closers = vec![None; tokens.len()];
    let mut open = Vec::new();
    for (index, spanned) in tokens.iter().enumerate() {
        match &spanned.token {
            Token::Punct("(") | Token::Punct("[") | Token::Punct("{") => open.push(index),
            Token::Punct(")") | Token::Punct("]") | Token::Punct("}") => {
                if let Some(opener) = open.pop() {
                    closers[opener] = Some(index);
                }
            }
            _ => {}
        }
    }
    closers
}

impl Parser {
    fn new(tokens: Vec<Spanned>, depth: usize, max_depth: usize) -> Parser {
        Parser {
            closers: match_brackets(&tokens),
            tokens,
            pos: 0,
            depth,
            max_depth,
        }
    }

    fn enter(&mut self) -> PResult<()> {
        if self.depth >= self.max_depth {
            return Err(SyntaxError::new("Expression too deeply nested", self.line()));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.enter()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn newline_before(&self) -> bool {
        self.tokens[self.pos].newline_before
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Ident(n) if n == name)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.is_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected<T>(&self) -> PResult<T> {
        let message = match self.peek() {
            Token::Eof => "Unexpected end of input".to_string(),
            Token::Punct(p) => format!("Unexpected token '{}'", p),
            Token::Ident(name) => format!("Unexpected identifier '{}'", name),
            Token::Number(_) => "Unexpected number".to_string(),
            Token::Str(_) => "Unexpected string".to_string(),
            Token::Template(_) => "Unexpected template string".to_string(),
        };
        Err(SyntaxError::new(&message, self.line()))
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            self.unexpected()
        }
    }

    fn expect_ident(&mut self, name: &str) -> PResult<()> {
        if self.eat_ident(name) {
            Ok(())
        } else {
            self.unexpected()
        }
    }

    /// A binding name: any identifier that is not a reserved word.
    fn binding_name(&mut self) -> PResult<String> {
        match self.peek() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.unexpected(),
        }
    }

    /// A property name after `.`, where reserved words are allowed.
    fn property_name(&mut self) -> PResult<String> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.unexpected(),
        }
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.newline_before() {
            Ok(())
        } else {
            self.unexpected()
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::statement_body)
    }

    fn statement_body(&mut self) -> PResult<Stmt> {
        if let Token::Ident(word) = self.peek() {
            let word = word.clone();
            match word.as_str() {
                "var" | "let" | "const" => {
                    let decl = self.parse_declaration()?;
                    self.consume_semicolon()?;
                    return Ok(decl);
                }
                "function" => {
                    self.advance();
                    let def = self.parse_function_rest(true)?;
                    return Ok(Stmt::Function(def));
                }
                "class" => {
                    self.advance();
                    let def = self.parse_class_rest(true)?;
                    return Ok(Stmt::Class(def));
                }
                "if" => return self.parse_if(),
                "while" => {
                    self.advance();
                    self.expect_punct("(")?;
                    let test = self.parse_expression()?;
                    self.expect_punct(")")?;
                    let body = self.parse_statement()?;
                    return Ok(Stmt::While(test, Box::new(body)));
                }
                "do" => {
                    self.advance();
                    let body = self.parse_statement()?;
                    self.expect_ident("while")?;
                    self.expect_punct("(")?;
                    let test = self.parse_expression()?;
                    self.expect_punct(")")?;
                    self.eat_punct(";");
                    return Ok(Stmt::DoWhile(Box::new(body), test));
                }
                "for" => return self.parse_for(),
                "return" => {
                    self.advance();
                    let value = if self.is_punct(";")
                        || self.is_punct("}")
                        || self.at_eof()
                        || self.newline_before()
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_semicolon()?;
                    return Ok(Stmt::Return(value));
                }
                "break" | "continue" => {
                    self.advance();
                    let label = match self.peek() {
                        Token::Ident(name) if !self.newline_before() => {
                            let name = name.clone();
                            self.advance();
                            Some(name)
                        }
                        _ => None,
                    };
                    self.consume_semicolon()?;
                    return Ok(if word == "break" {
                        Stmt::Break(label)
                    } else {
                        Stmt::Continue(label)
                    });
                }
                "throw" => {
                    self.advance();
                    if self.newline_before() {
                        return Err(SyntaxError::new("Illegal newline after throw", self.line()));
                    }
                    let value = self.parse_expression()?;
                    self.consume_semicolon()?;
                    return Ok(Stmt::Throw(value));
                }
                "try" => return self.parse_try(),
                "switch" => return self.parse_switch(),
                "import" | "export" => {
                    return Err(SyntaxError::new(
                        "Cannot use import statement outside a module",
                        self.line(),
                    ))
                }
                _ => {}
            }
            if matches!(self.peek_at(1), Token::Punct(":")) && !RESERVED.contains(&word.as_str()) {
                self.advance();
                self.advance();
                let body = self.parse_statement()?;
                return Ok(Stmt::Labeled(word, Box::new(body)));
            }
        }

        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }

        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return self.unexpected();
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn decl_kind(&mut self) -> PResult<DeclKind> {
        let kind = match self.peek() {
            Token::Ident(word) if word == "var" => DeclKind::Var,
            Token::Ident(word) if word == "let" => DeclKind::Let,
            Token::Ident(word) if word == "const" => DeclKind::Const,
            _ => return self.unexpected(),
        };
        self.advance();
        Ok(kind)
    }

    fn parse_declaration(&mut self) -> PResult<Stmt> {
        let kind = self.decl_kind()?;
        let declarators = self.parse_declarators(kind, None)?;
        Ok(Stmt::Decl(kind, declarators))
    }

    fn parse_declarators(
        &mut self,
        kind: DeclKind,
        first: Option<Pattern>,
    ) -> PResult<Vec<(Pattern, Option<Expr>)>> {
        let mut declarators = Vec::new();
        let mut pending = first;
        loop {
            let target = match pending.take() {
                Some(target) => target,
                None => self.parse_binding_target()?,
            };
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                if kind == DeclKind::Const {
                    return Err(SyntaxError::new(
                        "Missing initializer in const declaration",
                        self.line(),
                    ));
                }
                None
            };
            declarators.push((target, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(declarators)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect_ident("if")?;
        self.expect_punct("(")?;
        let test = self.parse_expression()?;
        self.expect_punct(")")?;
        let consequent = self.parse_statement()?;
        let alternate = if self.eat_ident("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If(test, Box::new(consequent), alternate))
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect_ident("for")?;
        self.expect_punct("(")?;

        let mut init = None;
        if self.is_ident("var") || self.is_ident("let") || self.is_ident("const") {
            let kind = self.decl_kind()?;
            let target = self.parse_binding_target()?;
            if self.eat_ident("of") {
                return self.finish_for_each(true, Some(kind), target);
            }
            if self.eat_ident("in") {
                return self.finish_for_each(false, Some(kind), target);
            }
            init = Some(ForInit::Decl(kind, self.parse_declarators(kind, Some(target))?));
        } else if !self.is_punct(";") {
            let checkpoint = self.pos;
            let lhs = self.parse_call_member()?;
            if self.is_ident("of") || self.is_ident("in") {
                let is_of = self.is_ident("of");
                self.advance();
                let target = expr_to_pattern(lhs, self.line())?;
                return self.finish_for_each(is_of, None, target);
            }
            self.pos = checkpoint;
            init = Some(ForInit::Expr(self.parse_expression()?));
        }

        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = self.parse_statement()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body: Box::new(body),
        })
    }

    fn finish_for_each(
        &mut self,
        is_of: bool,
        kind: Option<DeclKind>,
        target: Pattern,
    ) -> PResult<Stmt> {
        let iterable = if is_of {
            self.parse_assignment()?
        } else {
            self.parse_expression()?
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(if is_of {
            Stmt::ForOf(kind, target, iterable, body)
        } else {
            Stmt::ForIn(kind, target, iterable, body)
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        self.expect_ident("try")?;
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_ident("catch") {
            if self.eat_punct("(") {
                param = Some(self.parse_binding_target()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.eat_ident("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(SyntaxError::new("Missing catch or finally after try", self.line()));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        self.expect_ident("switch")?;
        self.expect_punct("(")?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_ident("case") {
                Some(self.parse_expression()?)
            } else if self.eat_ident("default") {
                None
            } else {
                return self.unexpected();
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.is_ident("case") && !self.is_ident("default") && !self.is_punct("}") {
                if self.at_eof() {
                    return self.unexpected();
                }
                body.push(self.parse_statement()?);
            }
            cases.push((test, body));
        }
        Ok(Stmt::Switch(discriminant, cases))
    }

    // ---- functions and classes ----

    fn parse_params(&mut self) -> PResult<(Vec<Pattern>, Option<Pattern>)> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        let mut rest = None;
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                rest = Some(self.parse_binding_target()?);
                self.expect_punct(")")?;
                break;
            }
            params.push(self.parse_binding_element()?);
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        Ok((params, rest))
    }

    /// Parses what follows the `function` keyword.
    fn parse_function_rest(&mut self, require_name: bool) -> PResult<Rc<FunctionDef>> {
        if self.is_punct("*") {
            return Err(SyntaxError::new("Generators are not supported", self.line()));
        }
        let name = if require_name || matches!(self.peek(), Token::Ident(_)) {
            Some(self.binding_name()?)
        } else {
            None
        };
        self.parse_function_tail(name, false)
    }

    fn parse_function_tail(&mut self, name: Option<String>, is_arrow: bool) -> PResult<Rc<FunctionDef>> {
        let (params, rest) = self.parse_params()?;
        if is_arrow {
            self.expect_punct("=>")?;
        }
        let body = if is_arrow && !self.is_punct("{") {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        } else {
            FunctionBody::Block(self.parse_block()?)
        };
        Ok(Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow,
        }))
    }

    fn parse_class_rest(&mut self, require_name: bool) -> PResult<Rc<ClassDef>> {
        let name = if require_name || (matches!(self.peek(), Token::Ident(_)) && !self.is_ident("extends")) {
            Some(self.binding_name()?)
        } else {
            None
        };
        let extends = if self.eat_ident("extends") {
            Some(self.parse_call_member()?)
        } else {
            None
        };
        self.expect_punct("{")?;
        let mut constructor = None;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct(";") {
                continue;
            }
            let is_static = self.is_ident("static")
                && !matches!(self.peek_at(1), Token::Punct("(") | Token::Punct("="));
            if is_static {
                self.advance();
            }
            let key = self.parse_property_key()?;
            if self.is_punct("(") {
                let method_name = match &key {
                    PropKey::Named(name) => Some(name.clone()),
                    PropKey::Computed(_) => None,
                };
                let def = self.parse_function_tail(method_name.clone(), false)?;
                if !is_static && method_name.as_deref() == Some("constructor") {
                    constructor = Some(def);
                } else {
                    members.push(ClassMember {
                        key,
                        is_static,
                        kind: ClassMemberKind::Method(def),
                    });
                }
            } else {
                let init = if self.eat_punct("=") {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                self.consume_semicolon()?;
                members.push(ClassMember {
                    key,
                    is_static,
                    kind: ClassMemberKind::Field(init),
                });
            }
        }
        Ok(Rc::new(ClassDef {
            name,
            extends,
            constructor,
            members,
        }))
    }

    fn parse_property_key(&mut self) -> PResult<PropKey> {
        let start = self.pos;
        let key = match self.advance() {
            Token::Ident(name) => PropKey::Named(name),
            Token::Str(text) => PropKey::Named(text),
            Token::Number(n) => PropKey::Named(number_to_string(n)),
            Token::Punct("[") => {
                let expr = self.parse_assignment()?;
                self.expect_punct("]")?;
                PropKey::Computed(expr)
            }
            _ => {
                self.pos = start;
                return self.unexpected();
            }
        };
        Ok(key)
    }

    // ---- binding patterns ----

    fn parse_binding_target(&mut self) -> PResult<Pattern> {
        self.nested(Self::binding_target_body)
    }

    fn binding_target_body(&mut self) -> PResult<Pattern> {
        if self.eat_punct("[") {
            let mut elements = Vec::new();
            let mut rest = None;
            while !self.eat_punct("]") {
                if self.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.parse_binding_target()?));
                    self.expect_punct("]")?;
                    break;
                }
                elements.push(Some(self.parse_binding_element()?));
                if !self.is_punct("]") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Pattern::Array(elements, rest));
        }
        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            while !self.eat_punct("}") {
                if self.eat_punct("...") {
                    rest = Some(Box::new(Pattern::Ident(self.binding_name()?)));
                    self.expect_punct("}")?;
                    break;
                }
                let key = self.parse_property_key()?;
                let value = if self.eat_punct(":") {
                    self.parse_binding_element()?
                } else {
                    let name = match &key {
                        PropKey::Named(name) if !RESERVED.contains(&name.as_str()) => name.clone(),
                        _ => return self.unexpected(),
                    };
                    self.with_default(Pattern::Ident(name))?
                };
                props.push((key, value));
                if !self.is_punct("}") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Pattern::Object(props, rest));
        }
        Ok(Pattern::Ident(self.binding_name()?))
    }

    fn parse_binding_element(&mut self) -> PResult<Pattern> {
        let target = self.parse_binding_target()?;
        self.with_default(target)
    }

    fn with_default(&mut self, target: Pattern) -> PResult<Pattern> {
        if self.eat_punct("=") {
            let default = self.parse_assignment()?;
            Ok(Pattern::Default(Box::new(target), Box::new(default)))
        } else {
            Ok(target)
        }
    }

    // ---- expressions ----

    fn parse_expression(&mut self) -> PResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_at(1), Token::Punct("=>"))
            }
            Token::Punct("(") => match self.closers[self.pos] {
                Some(close) => matches!(
                    self.tokens.get(close + 1).map(|t| &t.token),
                    Some(Token::Punct("=>"))
                ),
                None => false,
            },
            _ => false,
        }
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment_body)
    }

    fn assignment_body(&mut self) -> PResult<Expr> {
        if self.arrow_ahead() {
            if let Token::Ident(name) = self.peek() {
                let name = name.clone();
                self.advance();
                self.expect_punct("=>")?;
                let body = if self.is_punct("{") {
                    FunctionBody::Block(self.parse_block()?)
                } else {
                    FunctionBody::Expr(Box::new(self.parse_assignment()?))
                };
                return Ok(Expr::Function(Rc::new(FunctionDef {
                    name: None,
                    params: vec![Pattern::Ident(name)],
                    rest: None,
                    body,
                    is_arrow: true,
                })));
            }
            return Ok(Expr::Function(self.parse_function_tail(None, true)?));
        }

        let line = self.line();
        let left = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Punct(p) if ASSIGN_OPS.contains(p) => *p,
            _ => return Ok(left),
        };
        self.advance();
        let target = if op == "=" {
            expr_to_pattern(left, line)?
        } else {
            match left {
                Expr::Ident(name) => Pattern::Ident(name),
                member @ Expr::Member { .. } => Pattern::Expr(Box::new(member)),
                _ => return Err(SyntaxError::new("Invalid left-hand side in assignment", line)),
            }
        };
        let value = self.parse_assignment()?;
        Ok(Expr::Assign(op, Box::new(target), Box::new(value)))
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let test = self.parse_binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    fn current_binary_op(&self) -> Option<(&'static str, u8)> {
        let op: &'static str = match self.peek() {
            Token::Punct(p) => *p,
            Token::Ident(word) if word == "instanceof" => "instanceof",
            Token::Ident(word) if word == "in" => "in",
            _ => return None,
        };
        binary_precedence(op).map(|prec| (op, prec))
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let depth = self.depth;
        let result = self.binary_chain(min_prec);
        self.depth = depth;
        result
    }

    /// Each link of a left-associative chain nests the tree one level deeper.
    fn binary_chain(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((op, prec)) = self.current_binary_op() {
            if prec < min_prec {
                break;
            }
            self.enter()?;
            self.advance();
            // exponentiation is right associative
            let next_min = if op == "**" { prec } else { prec + 1 };
            let right = self.parse_binary(next_min)?;
            left = match op {
                "&&" | "||" | "??" => Expr::Logical(op, Box::new(left), Box::new(right)),
                _ => Expr::Binary(op, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        self.nested(Self::unary_body)
    }

    fn unary_body(&mut self) -> PResult<Expr> {
        let op: Option<&'static str> = match self.peek() {
            Token::Punct(p @ ("!" | "-" | "+" | "~")) => Some(*p),
            Token::Ident(word) if word == "typeof" => Some("typeof"),
            Token::Ident(word) if word == "void" => Some("void"),
            Token::Ident(word) if word == "delete" => Some("delete"),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        if let Token::Punct(op @ ("++" | "--")) = self.peek() {
            let op = *op;
            let line = self.line();
            self.advance();
            let target = self.parse_unary()?;
            check_update_target(&target, line)?;
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }

        let line = self.line();
        let expr = self.parse_call_member()?;
        if let Token::Punct(op @ ("++" | "--")) = self.peek() {
            if !self.newline_before() {
                let op = *op;
                check_update_target(&expr, line)?;
                self.advance();
                return Ok(Expr::Update {
                    op,
                    prefix: false,
                    target: Box::new(expr),
                });
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                args.push(Expr::Spread(Box::new(self.parse_assignment()?)));
            } else {
                args.push(self.parse_assignment()?);
            }
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        Ok(args)
    }

    fn parse_call_member(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let result = self.call_member_chain();
        self.depth = depth;
        result
    }

    fn call_member_chain(&mut self) -> PResult<Expr> {
        let mut expr = if self.eat_ident("new") {
            let mut callee = self.parse_primary()?;
            loop {
                self.enter()?;
                if self.eat_punct(".") {
                    let name = self.property_name()?;
                    callee = member(callee, PropKey::Named(name), false);
                } else if self.eat_punct("[") {
                    let property = self.parse_expression()?;
                    self.expect_punct("]")?;
                    callee = member(callee, PropKey::Computed(property), false);
                } else {
                    break;
                }
            }
            let args = if self.is_punct("(") {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            Expr::New(Box::new(callee), args)
        } else if self.eat_ident("super") {
            if self.is_punct("(") {
                Expr::SuperCall(self.parse_arguments()?)
            } else if self.eat_punct(".") {
                Expr::SuperMember(Box::new(PropKey::Named(self.property_name()?)))
            } else if self.eat_punct("[") {
                let property = self.parse_expression()?;
                self.expect_punct("]")?;
                Expr::SuperMember(Box::new(PropKey::Computed(property)))
            } else {
                return self.unexpected();
            }
        } else {
            self.parse_primary()?
        };

        loop {
            self.enter()?;
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = member(expr, PropKey::Named(name), false);
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let property = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = member(expr, PropKey::Computed(property), true);
                } else {
                    let name = self.property_name()?;
                    expr = member(expr, PropKey::Named(name), true);
                }
            } else if self.eat_punct("[") {
                let property = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = member(expr, PropKey::Computed(property), false);
            } else if self.is_punct("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let start = self.pos;
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(text) => Ok(Expr::Str(Rc::from(text.as_str()))),
            Token::Template(chunks) => {
                let mut parts = Vec::new();
                for chunk in chunks {
                    match chunk {
                        TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                        TemplateChunk::Code(code) => {
                            self.enter()?;
                            let tokens = tokenize(&code).map_err(|e| SyntaxError::new(&e.message, line))?;
                            let mut inner = Parser::new(tokens, self.depth, self.max_depth);
                            self.depth -= 1;
                            let expr = inner
                                .parse_expression()
                                .map_err(|e| SyntaxError::new(&e.message, line))?;
                            if !inner.at_eof() {
                                return Err(SyntaxError::new("Unexpected token in template", line));
                            }
                            parts.push(TemplatePart::Expr(expr));
                        }
                    }
                }
                Ok(Expr::Template(parts))
            }
            Token::Punct("(") => {
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                let mut elements = Vec::new();
                while !self.eat_punct("]") {
                    if self.eat_punct(",") {
                        elements.push(None);
                        continue;
                    }
                    let element = if self.eat_punct("...") {
                        Expr::Spread(Box::new(self.parse_assignment()?))
                    } else {
                        self.parse_assignment()?
                    };
                    elements.push(Some(element));
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(elements))
            }
            Token::Punct("{") => self.parse_object_literal(),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "this" => Ok(Expr::This),
                "function" => Ok(Expr::Function(self.parse_function_rest(false)?)),
                "class" => Ok(Expr::Class(self.parse_class_rest(false)?)),
                _ if RESERVED.contains(&word.as_str()) => {
                    self.pos = start;
                    self.unexpected()
                }
                _ => Ok(Expr::Ident(word)),
            },
            _ => {
                self.pos = start;
                self.unexpected()
            }
        }
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(Prop::Spread(self.parse_assignment()?));
            } else {
                let shorthand = matches!(self.peek(), Token::Ident(_));
                let key = self.parse_property_key()?;
                if self.is_punct("(") {
                    let name = match &key {
                        PropKey::Named(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    let def = self.parse_function_tail(name, false)?;
                    props.push(Prop::KeyValue(key, Expr::Function(def)));
                } else if self.eat_punct(":") {
                    props.push(Prop::KeyValue(key, self.parse_assignment()?));
                } else {
                    let name = match (&key, shorthand) {
                        (PropKey::Named(name), true) if !RESERVED.contains(&name.as_str()) => name.clone(),
                        _ => return self.unexpected(),
                    };
                    // `{ a = 1 } = obj` only makes sense as a pattern
                    let value = if self.eat_punct("=") {
                        let default = self.parse_assignment()?;
                        Expr::Assign("=", Box::new(Pattern::Ident(name.clone())), Box::new(default))
                    } else {
                        Expr::Ident(name)
                    };
                    props.push(Prop::KeyValue(key, value));
                }
            }
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        Ok(Expr::Object(props))
    }
}

fn member(object: Expr, property: PropKey, optional: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property: Box::new(property),
        optional,
    }
}

fn check_update_target(target: &Expr, line: usize) -> PResult<()> {
    match target {
        Expr::Ident(_) | Expr::Member { .. } => Ok(()),
        _ => Err(SyntaxError::new(
            "Invalid left-hand side expression in update operation",
            line,
        )),
    }
}

/// Reinterprets an already parsed expression as an assignment target.
fn expr_to_pattern(expr: Expr, line: usize) -> PResult<Pattern> {
    match expr {
        Expr::Ident(name) => Ok(Pattern::Ident(name)),
        member @ Expr::Member { .. } => Ok(Pattern::Expr(Box::new(member))),
        Expr::Assign("=", target, default) => Ok(Pattern::Default(target, default)),
        Expr::Array(elements) => {
            let mut items = Vec::new();
            let mut rest = None;
            let count = elements.len();
            for (index, element) in elements.into_iter().enumerate() {
                match element {
                    None => items.push(None),
                    Some(Expr::Spread(inner)) if index + 1 == count => {
                        rest = Some(Box::new(expr_to_pattern(*inner, line)?));
                    }
                    Some(item) => items.push(Some(expr_to_pattern(item, line)?)),
                }
            }
            Ok(Pattern::Array(items, rest))
        }
        Expr::Object(props) => {
            let mut items = Vec::new();
            let mut rest = None;
            for prop in props {
                match prop {
                    Prop::KeyValue(key, value) => items.push((key, expr_to_pattern(value, line)?)),
                    Prop::Spread(inner) => rest = Some(Box::new(expr_to_pattern(inner, line)?)),
                }
            }
            Ok(Pattern::Object(items, rest))
        }
        _ => Err(SyntaxError::new("Invalid left-hand side in assignment", line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> PResult<Vec<Stmt>> {
        parse_program(source, 1_000)
    }

    #[test]
    fn parses_declarations_and_functions() {
        let program = parse(
            "const a = 1, b = [1, 2];\nfunction f(x, y = 2, ...rest) { return x + y; }\nlet g = (p) => p * 2;",
        )
        .unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(&program[0], Stmt::Decl(DeclKind::Const, decls) if decls.len() == 2));
        match &program[1] {
            Stmt::Function(def) => {
                assert_eq!(def.name.as_deref(), Some("f"));
                assert_eq!(def.params.len(), 2);
                assert!(def.rest.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse("1 + 2 * 3").unwrap();
        match &program[0] {
            Stmt::Expr(Expr::Binary("+", _, right)) => {
                assert!(matches!(right.as_ref(), Expr::Binary("*", _, _)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn return_before_newline_returns_nothing() {
        let program = parse("function f() {\n  return\n  1;\n}").unwrap();
        match &program[0] {
            Stmt::Function(def) => match &def.body {
                FunctionBody::Block(body) => assert!(matches!(body[0], Stmt::Return(None))),
                _ => panic!("expected block body"),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn destructuring_assignment_becomes_pattern() {
        let program = parse("[a, b] = [b, a];").unwrap();
        assert!(matches!(
            &program[0],
            Stmt::Expr(Expr::Assign("=", target, _)) if matches!(target.as_ref(), Pattern::Array(items, None) if items.len() == 2)
        ));
    }

    #[test]
    fn classes_keep_constructor_apart() {
        let program =
            parse("class A extends B { constructor() { super(); } static make() {} x = 1; }").unwrap();
        match &program[0] {
            Stmt::Class(def) => {
                assert!(def.constructor.is_some());
                assert!(def.extends.is_some());
                assert_eq!(def.members.len(), 2);
                assert!(def.members[0].is_static);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn for_of_with_and_without_declaration() {
        let program = parse("for (const x of xs) {}\nfor (y of ys) {}").unwrap();
        assert!(matches!(&program[0], Stmt::ForOf(Some(DeclKind::Const), _, _, _)));
        assert!(matches!(&program[1], Stmt::ForOf(None, Pattern::Ident(_), _, _)));
    }

    #[test]
    fn arrow_lookahead_pairs_brackets() {
        let program = parse("let f = (a, [b, c], { d }) => a;\nlet g = (1) + (2);\n(x) => (y) => x;").unwrap();
        let init = |stmt: &Stmt| match stmt {
            Stmt::Decl(_, decls) => decls[0].1.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert!(matches!(init(&program[0]), Some(Expr::Function(def)) if def.is_arrow && def.params.len() == 3));
        assert!(matches!(init(&program[1]), Some(Expr::Binary("+", _, _))));
        assert!(matches!(&program[2], Stmt::Expr(Expr::Function(def)) if def.is_arrow));
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse_program(&shallow, 100).is_ok());
        let deep = format!("{}1{}", "(".repeat(60), ")".repeat(60));
        let err = parse_program(&deep, 100).unwrap_err();
        assert_eq!(err.message, "Expression too deeply nested");
        let chain = vec!["x"; 150].join(" * ");
        assert!(parse_program(&chain, 100).is_err());
        assert!(parse_program("`a${`b${`c${1}`}`}`", 6).is_err());
    }

    #[test]
    fn reports_line_of_unexpected_token() {
        let err = parse("let a = 1;\nlet b = );").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("')'"));
        assert!(parse("let = 5").is_err());
        assert!(parse("const x;").is_err());
    }
}
