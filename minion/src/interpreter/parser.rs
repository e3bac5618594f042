//! Recursive-descent parser producing the supported AST subset.
//!
//! Unsupported syntax (star-args, decorators, yield, async def, walrus,
//! match) is rejected with a syntax error naming the construct, so generated
//! code fails loudly instead of silently misbehaving.

use std::sync::Arc;

use super::ast::*;
use super::token::{tokenize, Tok, Token};
use super::InterpreterError;

/// Parses a module (sequence of statements).
pub fn parse(source: &str) -> Result<Vec<Stmt>, InterpreterError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_module()
}

/// Parses a single expression (used for f-string interpolations).
pub fn parse_expr_text(source: &str) -> Result<Expr, InterpreterError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_testlist()?;
    parser.eat_newlines();
    if !matches!(parser.peek(), Tok::EndOfFile) {
        return Err(parser.err("trailing input in expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::EndOfFile)
    }

    fn peek_ahead(&self, n: usize) -> &Tok {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::EndOfFile)
    }

    fn line(&self) -> u32 {
        self.tokens.get(self.pos).map(|t| t.line).unwrap_or(0)
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, msg: impl Into<String>) -> InterpreterError {
        InterpreterError::Syntax(format!("{} (line {})", msg.into(), self.line()))
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), InterpreterError> {
        if matches!(self.peek(), Tok::Sym(s) if *s == sym) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected '{sym}', found {:?}", self.peek())))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), InterpreterError> {
        if matches!(self.peek(), Tok::Kw(k) if *k == kw) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected '{kw}', found {:?}", self.peek())))
        }
    }

    fn at_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Tok::Sym(s) if *s == sym)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Kw(k) if *k == kw)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.at_sym(sym) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.bump();
        }
    }

    fn expect_name(&mut self) -> Result<String, InterpreterError> {
        match self.bump() {
            Tok::Name(n) => Ok(n),
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    fn parse_module(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        let mut stmts = Vec::new();
        self.eat_newlines();
        while !matches!(self.peek(), Tok::EndOfFile) {
            stmts.extend(self.parse_statement()?);
            self.eat_newlines();
        }
        Ok(stmts)
    }

    /// One statement; simple statements may expand to several via `;`.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        match self.peek() {
            Tok::Kw("if") => Ok(vec![self.parse_if()?]),
            Tok::Kw("while") => Ok(vec![self.parse_while()?]),
            Tok::Kw("for") => Ok(vec![self.parse_for()?]),
            Tok::Kw("def") => Ok(vec![self.parse_def()?]),
            Tok::Kw("class") => Ok(vec![self.parse_class()?]),
            Tok::Kw("try") => Ok(vec![self.parse_try()?]),
            Tok::Kw("with") => Ok(vec![self.parse_with()?]),
            Tok::Sym("@") => Err(self.err("decorators are not supported")),
            _ => self.parse_simple_line(),
        }
    }

    fn parse_simple_line(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        let mut stmts = vec![self.parse_simple_stmt()?];
        while self.eat_sym(";") {
            if matches!(self.peek(), Tok::Newline | Tok::EndOfFile) {
                break;
            }
            stmts.push(self.parse_simple_stmt()?);
        }
        if !matches!(self.peek(), Tok::EndOfFile) {
            if !matches!(self.peek(), Tok::Newline) {
                return Err(self.err(format!("unexpected token {:?}", self.peek())));
            }
            self.bump();
        }
        Ok(stmts)
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw("return") => {
                self.bump();
                if matches!(self.peek(), Tok::Newline | Tok::EndOfFile | Tok::Sym(";")) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist()?))
                }
            }
            Tok::Kw("break") => {
                self.bump();
                StmtKind::Break
            }
            Tok::Kw("continue") => {
                self.bump();
                StmtKind::Continue
            }
            Tok::Kw("pass") => {
                self.bump();
                StmtKind::Pass
            }
            Tok::Kw("import") => self.parse_import()?,
            Tok::Kw("from") => self.parse_from_import()?,
            Tok::Kw("raise") => {
                self.bump();
                if matches!(self.peek(), Tok::Newline | Tok::EndOfFile | Tok::Sym(";")) {
                    StmtKind::Raise { exc: None }
                } else {
                    StmtKind::Raise {
                        exc: Some(self.parse_test()?),
                    }
                }
            }
            Tok::Kw("assert") => {
                self.bump();
                let test = self.parse_test()?;
                let msg = if self.eat_sym(",") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            _ => self.parse_expr_or_assign()?,
        };
        Ok(Stmt { line, kind })
    }

    fn parse_expr_or_assign(&mut self) -> Result<StmtKind, InterpreterError> {
        let first = self.parse_testlist()?;

        // augmented assignment
        for (sym, op) in [
            ("+=", BinOpKind::Add),
            ("-=", BinOpKind::Sub),
            ("*=", BinOpKind::Mul),
            ("/=", BinOpKind::Div),
            ("//=", BinOpKind::FloorDiv),
            ("%=", BinOpKind::Mod),
            ("**=", BinOpKind::Pow),
            ("&=", BinOpKind::BitAnd),
            ("|=", BinOpKind::BitOr),
            ("^=", BinOpKind::BitXor),
            ("<<=", BinOpKind::Shl),
            (">>=", BinOpKind::Shr),
        ] {
            if self.at_sym(sym) {
                self.bump();
                let value = self.parse_testlist()?;
                let target = expr_to_target(&first).ok_or_else(|| {
                    self.err("invalid augmented assignment target")
                })?;
                return Ok(StmtKind::AugAssign { target, op, value });
            }
        }

        if !self.at_sym("=") {
            return Ok(StmtKind::Expr(first));
        }

        // a = b = value: collect all '='-separated expressions, last is value
        let mut parts = vec![first];
        while self.eat_sym("=") {
            parts.push(self.parse_testlist()?);
        }
        let value = parts.pop().unwrap();
        let targets = parts
            .iter()
            .map(expr_to_target)
            .collect::<Option<Vec<Target>>>()
            .ok_or_else(|| self.err("invalid assignment target"))?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn parse_import(&mut self) -> Result<StmtKind, InterpreterError> {
        self.expect_kw("import")?;
        let mut modules = Vec::new();
        loop {
            let path = self.parse_dotted_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            modules.push((path, alias));
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok(StmtKind::Import { modules })
    }

    fn parse_from_import(&mut self) -> Result<StmtKind, InterpreterError> {
        self.expect_kw("from")?;
        let module = self.parse_dotted_name()?;
        self.expect_kw("import")?;
        if self.at_sym("*") {
            return Err(self.err("star imports are not supported"));
        }
        let parenthesized = self.eat_sym("(");
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat_sym(",") {
                break;
            }
            if parenthesized && self.at_sym(")") {
                break;
            }
        }
        if parenthesized {
            self.expect_sym(")")?;
        }
        Ok(StmtKind::FromImport { module, names })
    }

    fn parse_dotted_name(&mut self) -> Result<String, InterpreterError> {
        let mut path = self.expect_name()?;
        while self.at_sym(".") {
            self.bump();
            path.push('.');
            path.push_str(&self.expect_name()?);
        }
        Ok(path)
    }

    fn parse_if(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("if")?;
        let cond = self.parse_test()?;
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        let orelse = self.parse_orelse_chain()?;
        Ok(Stmt {
            line,
            kind: StmtKind::If { cond, body, orelse },
        })
    }

    fn parse_orelse_chain(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        if self.at_kw("elif") {
            let line = self.line();
            self.bump();
            let cond = self.parse_test()?;
            self.expect_sym(":")?;
            let body = self.parse_suite()?;
            let orelse = self.parse_orelse_chain()?;
            Ok(vec![Stmt {
                line,
                kind: StmtKind::If { cond, body, orelse },
            }])
        } else if self.eat_kw("else") {
            self.expect_sym(":")?;
            self.parse_suite()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_while(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("while")?;
        let cond = self.parse_test()?;
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        Ok(Stmt {
            line,
            kind: StmtKind::While { cond, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("for")?;
        let target = self.parse_target_list()?;
        self.expect_kw("in")?;
        let iter = self.parse_testlist()?;
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        let orelse = if self.eat_kw("else") {
            self.expect_sym(":")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn parse_def(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_sym("(")?;
        let params = self.parse_params()?;
        self.expect_sym(")")?;
        // return annotation, parsed and discarded
        if self.eat_sym("->") {
            self.parse_test()?;
        }
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FuncDef {
                name,
                params,
                body: Arc::new(body),
            },
        })
    }

    fn parse_params(&mut self) -> Result<Vec<ParamSig>, InterpreterError> {
        let mut params = Vec::new();
        while !self.at_sym(")") {
            if self.at_sym("*") || self.at_sym("**") {
                return Err(self.err("star parameters are not supported"));
            }
            let name = self.expect_name()?;
            // type annotation, parsed and discarded
            if self.eat_sym(":") {
                self.parse_test()?;
            }
            let default = if self.eat_sym("=") {
                Some(self.parse_test()?)
            } else {
                None
            };
            params.push(ParamSig { name, default });
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok(params)
    }

    fn parse_class(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("class")?;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_sym("(") {
            while !self.at_sym(")") {
                bases.push(self.parse_test()?);
                if !self.eat_sym(",") {
                    break;
                }
            }
            self.expect_sym(")")?;
        }
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef { name, bases, body },
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("try")?;
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        let mut handlers = Vec::new();
        while self.at_kw("except") {
            self.bump();
            let mut exc_types = Vec::new();
            let mut name = None;
            if !self.at_sym(":") {
                if self.eat_sym("(") {
                    while !self.at_sym(")") {
                        exc_types.push(self.expect_name()?);
                        if !self.eat_sym(",") {
                            break;
                        }
                    }
                    self.expect_sym(")")?;
                } else {
                    exc_types.push(self.expect_name()?);
                }
                if self.eat_kw("as") {
                    name = Some(self.expect_name()?);
                }
            }
            self.expect_sym(":")?;
            let handler_body = self.parse_suite()?;
            handlers.push(ExceptHandler {
                exc_types,
                name,
                body: handler_body,
            });
        }
        let orelse = if self.eat_kw("else") {
            self.expect_sym(":")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.expect_sym(":")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.err("try without except or finally"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn parse_with(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw("with")?;
        let mut items = Vec::new();
        loop {
            let expr = self.parse_test()?;
            let target = if self.eat_kw("as") {
                Some(self.parse_target_atom()?)
            } else {
                None
            };
            items.push((expr, target));
            if !self.eat_sym(",") {
                break;
            }
        }
        self.expect_sym(":")?;
        let body = self.parse_suite()?;
        Ok(Stmt {
            line,
            kind: StmtKind::With { items, body },
        })
    }

    /// Suite: an indented block, or a simple statement on the same line.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        if matches!(self.peek(), Tok::Newline) {
            self.bump();
            self.eat_newlines();
            if !matches!(self.peek(), Tok::Indent) {
                return Err(self.err("expected an indented block"));
            }
            self.bump();
            let mut stmts = Vec::new();
            self.eat_newlines();
            while !matches!(self.peek(), Tok::Dedent | Tok::EndOfFile) {
                stmts.extend(self.parse_statement()?);
                self.eat_newlines();
            }
            if matches!(self.peek(), Tok::Dedent) {
                self.bump();
            }
            Ok(stmts)
        } else {
            self.parse_simple_line()
        }
    }

    // ---- targets ----

    fn parse_target_list(&mut self) -> Result<Target, InterpreterError> {
        let first = self.parse_target_atom()?;
        if !self.at_sym(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_sym(",") {
            if self.at_kw("in") || self.at_sym(":") {
                break;
            }
            items.push(self.parse_target_atom()?);
        }
        Ok(Target::Tuple(items))
    }

    fn parse_target_atom(&mut self) -> Result<Target, InterpreterError> {
        if self.eat_sym("(") {
            let t = self.parse_target_list()?;
            self.expect_sym(")")?;
            return Ok(t);
        }
        let expr = self.parse_postfix_expr()?;
        expr_to_target(&expr).ok_or_else(|| self.err("invalid target"))
    }

    // ---- expressions ----

    /// testlist: test (',' test)* — an unparenthesized tuple when commas appear.
    fn parse_testlist(&mut self) -> Result<Expr, InterpreterError> {
        let first = self.parse_test()?;
        if !self.at_sym(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_sym(",") {
            if matches!(
                self.peek(),
                Tok::Newline | Tok::EndOfFile | Tok::Sym("=") | Tok::Sym(")") | Tok::Sym("]") | Tok::Sym("}") | Tok::Sym(":") | Tok::Sym(";")
            ) {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// test: ternary conditional or lambda.
    fn parse_test(&mut self) -> Result<Expr, InterpreterError> {
        if self.at_kw("lambda") {
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if self.eat_kw("if") {
            let cond = self.parse_or()?;
            self.expect_kw("else")?;
            let orelse = self.parse_test()?;
            Ok(Expr::IfExp {
                cond: Box::new(cond),
                then: Box::new(body),
                orelse: Box::new(orelse),
            })
        } else {
            Ok(body)
        }
    }

    fn parse_lambda(&mut self) -> Result<Expr, InterpreterError> {
        self.expect_kw("lambda")?;
        let mut params = Vec::new();
        while !self.at_sym(":") {
            let name = self.expect_name()?;
            let default = if self.eat_sym("=") {
                Some(self.parse_test()?)
            } else {
                None
            };
            params.push(ParamSig { name, default });
            if !self.eat_sym(",") {
                break;
            }
        }
        self.expect_sym(":")?;
        let body = self.parse_test()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, InterpreterError> {
        let first = self.parse_and()?;
        if !self.at_kw("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("or") {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> Result<Expr, InterpreterError> {
        let first = self.parse_not()?;
        if !self.at_kw("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("and") {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::And,
            values,
        })
    }

    fn parse_not(&mut self) -> Result<Expr, InterpreterError> {
        if self.eat_kw("not") {
            let operand = self.parse_not()?;
            Ok(Expr::UnaryOp {
                op: UnaryOpKind::Not,
                operand: Box::new(operand),
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, InterpreterError> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Sym("==") => CmpOpKind::Eq,
                Tok::Sym("!=") => CmpOpKind::NotEq,
                Tok::Sym("<") => CmpOpKind::Lt,
                Tok::Sym("<=") => CmpOpKind::LtE,
                Tok::Sym(">") => CmpOpKind::Gt,
                Tok::Sym(">=") => CmpOpKind::GtE,
                Tok::Kw("in") => CmpOpKind::In,
                Tok::Kw("not") if matches!(self.peek_ahead(1), Tok::Kw("in")) => {
                    self.bump();
                    CmpOpKind::NotIn
                }
                Tok::Kw("is") => {
                    if matches!(self.peek_ahead(1), Tok::Kw("not")) {
                        self.bump();
                        CmpOpKind::IsNot
                    } else {
                        CmpOpKind::Is
                    }
                }
                _ => break,
            };
            self.bump();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
                comparators,
            })
        }
    }

    fn parse_bitor(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_bitxor()?;
        while self.at_sym("|") {
            self.bump();
            let right = self.parse_bitxor()?;
            left = bin(left, BinOpKind::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_bitand()?;
        while self.at_sym("^") {
            self.bump();
            let right = self.parse_bitand()?;
            left = bin(left, BinOpKind::BitXor, right);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_shift()?;
        while self.at_sym("&") {
            self.bump();
            let right = self.parse_shift()?;
            left = bin(left, BinOpKind::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_arith()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("<<") => BinOpKind::Shl,
                Tok::Sym(">>") => BinOpKind::Shr,
                _ => break,
            };
            self.bump();
            let right = self.parse_arith()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("+") => BinOpKind::Add,
                Tok::Sym("-") => BinOpKind::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_term()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("*") => BinOpKind::Mul,
                Tok::Sym("/") => BinOpKind::Div,
                Tok::Sym("//") => BinOpKind::FloorDiv,
                Tok::Sym("%") => BinOpKind::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_factor()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, InterpreterError> {
        let op = match self.peek() {
            Tok::Sym("-") => Some(UnaryOpKind::Neg),
            Tok::Sym("+") => Some(UnaryOpKind::Pos),
            Tok::Sym("~") => Some(UnaryOpKind::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_factor()?;
            return Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, InterpreterError> {
        let base = self.parse_postfix_expr()?;
        if self.at_sym("**") {
            self.bump();
            // right-associative
            let exp = self.parse_factor()?;
            return Ok(bin(base, BinOpKind::Pow, exp));
        }
        Ok(base)
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, InterpreterError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.at_sym("(") {
                self.bump();
                let (args, kwargs) = self.parse_call_args()?;
                self.expect_sym(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.at_sym(".") {
                self.bump();
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else if self.at_sym("[") {
                self.bump();
                let index = self.parse_subscript()?;
                self.expect_sym("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), InterpreterError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.at_sym(")") {
            if self.at_sym("*") || self.at_sym("**") {
                return Err(self.err("star arguments are not supported"));
            }
            // keyword argument: NAME '=' test (but not NAME '==')
            if let (Tok::Name(name), Tok::Sym("=")) = (self.peek(), self.peek_ahead(1)) {
                let name = name.clone();
                self.bump();
                self.bump();
                let value = self.parse_test()?;
                kwargs.push((name, value));
            } else {
                let value = self.parse_test()?;
                // generator argument: f(x for x in xs)
                if self.at_kw("for") {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Expr::GeneratorExp {
                        elt: Box::new(value),
                        generators,
                    });
                } else {
                    if !kwargs.is_empty() {
                        return Err(self.err("positional argument after keyword argument"));
                    }
                    args.push(value);
                }
            }
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self) -> Result<Index, InterpreterError> {
        let lower = if self.at_sym(":") {
            None
        } else {
            Some(self.parse_test()?)
        };
        if !self.at_sym(":") {
            return Ok(Index::Single(lower.ok_or_else(|| self.err("empty subscript"))?));
        }
        self.bump();
        let upper = if self.at_sym(":") || self.at_sym("]") {
            None
        } else {
            Some(self.parse_test()?)
        };
        let step = if self.eat_sym(":") {
            if self.at_sym("]") {
                None
            } else {
                Some(self.parse_test()?)
            }
        } else {
            None
        };
        Ok(Index::Slice { lower, upper, step })
    }

    fn parse_comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, InterpreterError> {
        let mut generators = Vec::new();
        while self.at_kw("for") {
            self.bump();
            let target = self.parse_target_list()?;
            self.expect_kw("in")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> Result<Expr, InterpreterError> {
        match self.bump() {
            Tok::Int(i) => Ok(Expr::Const(Const::Int(i))),
            Tok::Float(f) => Ok(Expr::Const(Const::Float(f))),
            Tok::Str(s) => {
                // adjacent string literal concatenation
                let mut full = s;
                while let Tok::Str(next) = self.peek() {
                    full.push_str(next);
                    self.bump();
                }
                Ok(Expr::Const(Const::Str(full)))
            }
            Tok::FStr(raw) => self.parse_fstring(&raw),
            Tok::Kw("True") => Ok(Expr::Const(Const::Bool(true))),
            Tok::Kw("False") => Ok(Expr::Const(Const::Bool(false))),
            Tok::Kw("None") => Ok(Expr::Const(Const::None)),
            Tok::Kw("lambda") => {
                self.pos -= 1;
                self.parse_lambda()
            }
            Tok::Name(n) => Ok(Expr::Name(n)),
            Tok::Sym("(") => {
                if self.eat_sym(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.at_kw("for") {
                    let generators = self.parse_comprehension_clauses()?;
                    self.expect_sym(")")?;
                    return Ok(Expr::GeneratorExp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                if self.at_sym(",") {
                    let mut items = vec![first];
                    while self.eat_sym(",") {
                        if self.at_sym(")") {
                            break;
                        }
                        items.push(self.parse_test()?);
                    }
                    self.expect_sym(")")?;
                    return Ok(Expr::Tuple(items));
                }
                self.expect_sym(")")?;
                Ok(first)
            }
            Tok::Sym("[") => {
                if self.eat_sym("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.at_kw("for") {
                    let generators = self.parse_comprehension_clauses()?;
                    self.expect_sym("]")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                let mut items = vec![first];
                while self.eat_sym(",") {
                    if self.at_sym("]") {
                        break;
                    }
                    items.push(self.parse_test()?);
                }
                self.expect_sym("]")?;
                Ok(Expr::List(items))
            }
            Tok::Sym("{") => {
                if self.eat_sym("}") {
                    return Ok(Expr::Dict {
                        keys: Vec::new(),
                        values: Vec::new(),
                    });
                }
                let first = self.parse_test()?;
                if self.eat_sym(":") {
                    let first_value = self.parse_test()?;
                    if self.at_kw("for") {
                        let generators = self.parse_comprehension_clauses()?;
                        self.expect_sym("}")?;
                        return Ok(Expr::DictComp {
                            key: Box::new(first),
                            value: Box::new(first_value),
                            generators,
                        });
                    }
                    let mut keys = vec![first];
                    let mut values = vec![first_value];
                    while self.eat_sym(",") {
                        if self.at_sym("}") {
                            break;
                        }
                        keys.push(self.parse_test()?);
                        self.expect_sym(":")?;
                        values.push(self.parse_test()?);
                    }
                    self.expect_sym("}")?;
                    return Ok(Expr::Dict { keys, values });
                }
                if self.at_kw("for") {
                    let generators = self.parse_comprehension_clauses()?;
                    self.expect_sym("}")?;
                    return Ok(Expr::SetComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                let mut items = vec![first];
                while self.eat_sym(",") {
                    if self.at_sym("}") {
                        break;
                    }
                    items.push(self.parse_test()?);
                }
                self.expect_sym("}")?;
                Ok(Expr::Set(items))
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    /// Splits a raw f-string body into literal and expression parts.
    fn parse_fstring(&mut self, raw: &str) -> Result<Expr, InterpreterError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '{' {
                if chars.get(i + 1) == Some(&'{') {
                    literal.push('{');
                    i += 2;
                    continue;
                }
                if !literal.is_empty() {
                    parts.push(FPart::Literal(process_escapes(&literal)));
                    literal.clear();
                }
                // find matching close brace, tracking bracket depth
                let mut depth = 0usize;
                let mut j = i + 1;
                let mut in_str: Option<char> = None;
                while j < chars.len() {
                    let cj = chars[j];
                    if let Some(q) = in_str {
                        if cj == q {
                            in_str = None;
                        }
                    } else {
                        match cj {
                            '\'' | '"' => in_str = Some(cj),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            '}' => {
                                if depth == 0 {
                                    break;
                                }
                                depth -= 1;
                            }
                            _ => {}
                        }
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(self.err("unterminated interpolation in f-string"));
                }
                let inner: String = chars[i + 1..j].iter().collect();
                let (expr_text, conversion, format_spec) = split_fstring_field(&inner);
                if expr_text.trim().is_empty() {
                    return Err(self.err("empty interpolation in f-string"));
                }
                let expr = parse_expr_text(expr_text.trim())?;
                parts.push(FPart::Expr {
                    expr,
                    format_spec,
                    conversion,
                });
                i = j + 1;
            } else if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(self.err("single '}' in f-string"));
            } else {
                literal.push(c);
                i += 1;
            }
        }
        if !literal.is_empty() {
            parts.push(FPart::Literal(process_escapes(&literal)));
        }
        Ok(Expr::FString(parts))
    }
}

fn bin(left: Expr, op: BinOpKind, right: Expr) -> Expr {
    Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// Splits one f-string field into (expression, conversion, format spec).
fn split_fstring_field(inner: &str) -> (&str, Option<char>, Option<String>) {
    // format spec: after the first ':' at depth 0
    let mut depth = 0usize;
    let mut in_str: Option<char> = None;
    let mut colon = None;
    for (idx, c) in inner.char_indices() {
        if let Some(q) = in_str {
            if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_str = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                colon = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let (head, spec) = match colon {
        Some(idx) => (&inner[..idx], Some(inner[idx + 1..].to_string())),
        None => (inner, None),
    };
    // conversion: trailing !r / !s / !a on the expression part
    if let Some(stripped) = head
        .strip_suffix("!r")
        .or_else(|| head.strip_suffix("!s"))
        .or_else(|| head.strip_suffix("!a"))
    {
        let conv = head.chars().last();
        (stripped, conv, spec)
    } else {
        (head, None, spec)
    }
}

fn process_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Converts an expression to an assignment target where valid.
fn expr_to_target(expr: &Expr) -> Option<Target> {
    match expr {
        Expr::Name(n) => Some(Target::Name(n.clone())),
        Expr::Tuple(items) | Expr::List(items) => items
            .iter()
            .map(expr_to_target)
            .collect::<Option<Vec<Target>>>()
            .map(Target::Tuple),
        Expr::Attribute { value, attr } => Some(Target::Attribute {
            value: (**value).clone(),
            attr: attr.clone(),
        }),
        Expr::Subscript { value, index } => Some(Target::Subscript {
            value: (**value).clone(),
            index: (**index).clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignment_and_call() {
        let stmts = parse("x = f(1, y=2)\n").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets, &vec![Target::Name("x".into())]);
                assert!(matches!(value, Expr::Call { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_if_elif_else() {
        let stmts = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n").unwrap();
        let StmtKind::If { orelse, .. } = &stmts[0].kind else {
            panic!()
        };
        assert_eq!(orelse.len(), 1);
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!()
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn parses_def_with_defaults_and_annotations() {
        let stmts = parse("def f(a, b: int = 2) -> int:\n    return a + b\n").unwrap();
        let StmtKind::FuncDef { name, params, body } = &stmts[0].kind else {
            panic!()
        };
        assert_eq!(name, "f");
        assert_eq!(params.len(), 2);
        assert!(params[1].default.is_some());
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn parses_chained_comparison() {
        let stmts = parse("r = 1 < x <= 10\n").unwrap();
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!()
        };
        let Expr::Compare { ops, .. } = value else {
            panic!()
        };
        assert_eq!(ops, &vec![CmpOpKind::Lt, CmpOpKind::LtE]);
    }

    #[test]
    fn parses_list_comprehension_with_condition() {
        let stmts = parse("xs = [i * i for i in range(10) if i % 2 == 0]\n").unwrap();
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!()
        };
        let Expr::ListComp { generators, .. } = value else {
            panic!()
        };
        assert_eq!(generators.len(), 1);
        assert_eq!(generators[0].ifs.len(), 1);
    }

    #[test]
    fn parses_fstring_with_format_spec() {
        let stmts = parse("s = f\"pi={pi:.2f} done\"\n").unwrap();
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!()
        };
        let Expr::FString(parts) = value else { panic!() };
        assert_eq!(parts.len(), 3);
        match &parts[1] {
            FPart::Expr { format_spec, .. } => {
                assert_eq!(format_spec.as_deref(), Some(".2f"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_try_except_finally() {
        let src = "try:\n    x = 1\nexcept ValueError as e:\n    x = 2\nfinally:\n    y = 3\n";
        let stmts = parse(src).unwrap();
        let StmtKind::Try {
            handlers, finalbody, ..
        } = &stmts[0].kind
        else {
            panic!()
        };
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].exc_types, vec!["ValueError".to_string()]);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn parses_slice_forms() {
        for src in ["a[1]\n", "a[1:2]\n", "a[:2]\n", "a[::2]\n", "a[1:]\n"] {
            assert!(parse(src).is_ok(), "failed to parse {src}");
        }
    }

    #[test]
    fn parses_tuple_unpacking_for() {
        let stmts = parse("for k, v in items:\n    pass\n").unwrap();
        let StmtKind::For { target, .. } = &stmts[0].kind else {
            panic!()
        };
        assert!(matches!(target, Target::Tuple(t) if t.len() == 2));
    }

    #[test]
    fn rejects_unsupported_constructs() {
        assert!(parse("def f(*args):\n    pass\n").is_err());
        assert!(parse("from os import *\n").is_err());
        assert!(parse("@decorator\ndef f():\n    pass\n").is_err());
    }

    #[test]
    fn parses_multiple_assignment_chain() {
        let stmts = parse("a = b = 1\n").unwrap();
        let StmtKind::Assign { targets, .. } = &stmts[0].kind else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn parses_with_statement() {
        let stmts = parse("with ctx() as c:\n    use(c)\n").unwrap();
        let StmtKind::With { items, .. } = &stmts[0].kind else {
            panic!()
        };
        assert_eq!(items.len(), 1);
        assert!(items[0].1.is_some());
    }
}
