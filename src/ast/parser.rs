//! Recursive-descent parser for fragments.

use super::ast::*;
use super::error::{ParseError, ParseResult};
use super::lexer::Lexer;
use super::token::{Span, Spanned, Token};

/// Fragment parser.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    /// Parse a complete fragment.
    pub fn parse(source: &str) -> ParseResult<Fragment> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        parser.fragment()
    }

    fn fragment(&mut self) -> ParseResult<Fragment> {
        let mut items = Vec::new();
        while !self.at_end() {
            if self.eat(&Token::Semi) {
                continue;
            }
            items.push(self.item()?);
        }
        Ok(Fragment { items })
    }

    // ==================== Token helpers ====================

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(tok) => ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: tok.token.to_string(),
                span: tok.span,
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    fn expect(&mut self, token: &Token) -> ParseResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ==================== Items ====================

    fn item(&mut self) -> ParseResult<Item> {
        let span = self.span();
        match self.peek() {
            Some(Token::KwTemplate) => self.template(span),
            Some(Token::KwNamespace) => self.namespace(span),
            Some(Token::KwStruct) | Some(Token::KwVirtual) => self.structure(span),
            _ if self.looks_like_declaration() => self.declaration(span),
            _ => Ok(Item::Stmt(self.statement()?)),
        }
    }

    /// A declaration starts with a qualifier, a builtin type, or `Ident Ident`.
    fn looks_like_declaration(&self) -> bool {
        match self.peek() {
            Some(tok) if tok.starts_declaration() => true,
            Some(Token::Ident(_)) => matches!(self.peek_at(1), Some(Token::Ident(_))),
            _ => false,
        }
    }

    fn type_name(&mut self) -> ParseResult<TypeName> {
        let ty = match self.peek() {
            Some(Token::KwInt) => TypeName::Int,
            Some(Token::KwBool) => TypeName::Bool,
            Some(Token::KwVoid) => TypeName::Void,
            Some(Token::Ident(name)) => TypeName::Named(name.clone()),
            _ => return Err(self.unexpected("type")),
        };
        self.pos += 1;
        Ok(ty)
    }

    fn declaration(&mut self, span: Span) -> ParseResult<Item> {
        let mut is_const = false;
        let mut is_extern = false;
        let mut is_inline = false;
        loop {
            if self.eat(&Token::KwConst) {
                is_const = true;
            } else if self.eat(&Token::KwExtern) {
                is_extern = true;
            } else if self.eat(&Token::KwInline) {
                is_inline = true;
            } else {
                break;
            }
        }

        let ty = self.type_name()?;
        let name = self.ident()?;

        if self.check(&Token::LParen) {
            if is_const || is_extern {
                return Err(ParseError::Syntax {
                    message: format!("qualifier not allowed on function '{}'", name),
                    span,
                });
            }
            let function = self.function_rest(name, ty, is_inline, span)?;
            return Ok(Item::Function(function));
        }

        if is_inline {
            return Err(ParseError::Syntax {
                message: format!("'inline' not allowed on variable '{}'", name),
                span,
            });
        }
        let var = self.var_rest(name, ty, is_const, is_extern, span)?;
        Ok(Item::Var(var))
    }

    fn var_rest(
        &mut self,
        name: String,
        ty: TypeName,
        is_const: bool,
        is_extern: bool,
        span: Span,
    ) -> ParseResult<VarItem> {
        let init = if self.eat(&Token::Assign) {
            Some(self.expr()?)
        } else {
            None
        };
        self.expect(&Token::Semi)?;
        Ok(VarItem {
            name,
            ty,
            init,
            is_const,
            is_extern,
            span,
        })
    }

    fn function_rest(
        &mut self,
        name: String,
        ret: TypeName,
        is_inline: bool,
        span: Span,
    ) -> ParseResult<FunctionItem> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let ty = self.type_name()?;
                let name = self.ident()?;
                params.push(Param { name, ty });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;

        let body = if self.eat(&Token::Semi) {
            None
        } else {
            Some(self.block()?)
        };

        Ok(FunctionItem {
            name,
            ret,
            params,
            body,
            is_inline,
            span,
        })
    }

    fn template(&mut self, span: Span) -> ParseResult<Item> {
        self.expect(&Token::KwTemplate)?;
        self.expect(&Token::Lt)?;
        let mut params = vec![self.ident()?];
        while self.eat(&Token::Comma) {
            params.push(self.ident()?);
        }
        self.expect(&Token::Gt)?;

        let inner_span = self.span();
        match self.declaration(inner_span)? {
            Item::Function(function) if function.body.is_some() => Ok(Item::Template(TemplateItem {
                params,
                function,
                span,
            })),
            _ => Err(ParseError::Syntax {
                message: "template must be a function definition".to_string(),
                span,
            }),
        }
    }

    fn namespace(&mut self, span: Span) -> ParseResult<Item> {
        self.expect(&Token::KwNamespace)?;
        let name = self.ident()?;
        self.expect(&Token::LBrace)?;
        let mut items = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat(&Token::Semi) {
                continue;
            }
            let item_span = self.span();
            let item = match self.peek() {
                Some(Token::KwNamespace) => self.namespace(item_span)?,
                Some(Token::KwTemplate) => self.template(item_span)?,
                Some(Token::KwStruct) | Some(Token::KwVirtual) => self.structure(item_span)?,
                _ if self.looks_like_declaration() => self.declaration(item_span)?,
                _ => return Err(self.unexpected("declaration")),
            };
            items.push(item);
        }
        Ok(Item::Namespace(NamespaceItem { name, items, span }))
    }

    fn structure(&mut self, span: Span) -> ParseResult<Item> {
        let is_virtual = self.eat(&Token::KwVirtual);
        self.expect(&Token::KwStruct)?;
        let name = self.ident()?;
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.eat(&Token::RBrace) {
            let ty = self.type_name()?;
            let field = self.ident()?;
            self.expect(&Token::Semi)?;
            fields.push(Field { name: field, ty });
        }
        self.expect(&Token::Semi)?;
        Ok(Item::Struct(StructItem {
            name,
            fields,
            is_virtual,
            span,
        }))
    }

    // ==================== Statements ====================

    fn block(&mut self) -> ParseResult<Block> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat(&Token::Semi) {
                continue;
            }
            stmts.push(self.statement()?);
        }
        Ok(Block { stmts })
    }

    /// A block, or a single statement treated as one.
    fn body(&mut self) -> ParseResult<Block> {
        if self.check(&Token::LBrace) {
            self.block()
        } else {
            Ok(Block {
                stmts: vec![self.statement()?],
            })
        }
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        match self.peek() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.block()?, span)),
            Some(Token::KwReturn) => {
                self.pos += 1;
                let value = if self.check(&Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Token::Semi)?;
                Ok(Stmt::Return(value, span))
            }
            Some(Token::KwIf) => {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let cond = self.expr()?;
                self.expect(&Token::RParen)?;
                let then = self.body()?;
                let otherwise = if self.eat(&Token::KwElse) {
                    Some(self.body()?)
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                    span,
                })
            }
            Some(Token::KwWhile) => {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let cond = self.expr()?;
                self.expect(&Token::RParen)?;
                let body = self.body()?;
                Ok(Stmt::While { cond, body, span })
            }
            Some(Token::KwConst)
            | Some(Token::KwInt)
            | Some(Token::KwBool)
            | Some(Token::KwVoid) => self.local(span),
            Some(Token::Ident(_)) if matches!(self.peek_at(1), Some(Token::Ident(_))) => {
                self.local(span)
            }
            _ => {
                let expr = self.expr()?;
                self.expect(&Token::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn local(&mut self, span: Span) -> ParseResult<Stmt> {
        let is_const = self.eat(&Token::KwConst);
        let ty = self.type_name()?;
        let name = self.ident()?;
        if self.check(&Token::LParen) {
            return Err(ParseError::Syntax {
                message: format!("function '{}' cannot be defined inside a block", name),
                span,
            });
        }
        Ok(Stmt::Local(self.var_rest(name, ty, is_const, false, span)?))
    }

    // ==================== Expressions ====================

    pub(crate) fn expr(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let lhs = self.binary(0)?;
        if self.eat(&Token::Assign) {
            let value = self.expr()?;
            return match lhs {
                Expr::Name(target, _) => Ok(Expr::Assign {
                    target,
                    value: Box::new(value),
                    span,
                }),
                _ => Err(ParseError::Syntax {
                    message: "left side of assignment must be a name".to_string(),
                    span,
                }),
            };
        }
        Ok(lhs)
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.peek()? {
            Token::OrOr => (BinaryOp::Or, 1),
            Token::AndAnd => (BinaryOp::And, 2),
            Token::EqEq => (BinaryOp::Eq, 3),
            Token::NotEq => (BinaryOp::NotEq, 3),
            Token::Lt => (BinaryOp::Lt, 4),
            Token::LtEq => (BinaryOp::LtEq, 4),
            Token::Gt => (BinaryOp::Gt, 4),
            Token::GtEq => (BinaryOp::GtEq, 4),
            Token::Plus => (BinaryOp::Add, 5),
            Token::Minus => (BinaryOp::Sub, 5),
            Token::Star => (BinaryOp::Mul, 6),
            Token::Slash => (BinaryOp::Div, 6),
            Token::Percent => (BinaryOp::Rem, 6),
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing over left-associative binary operators.
    fn binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec <= min_prec {
                break;
            }
            let span = self.span();
            self.pos += 1;
            let rhs = self.binary(prec)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.primary(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        match self.peek().cloned() {
            Some(Token::Int(value)) => {
                self.pos += 1;
                Ok(Expr::Int(value, span))
            }
            Some(Token::KwTrue) => {
                self.pos += 1;
                Ok(Expr::Bool(true, span))
            }
            Some(Token::KwFalse) => {
                self.pos += 1;
                Ok(Expr::Bool(false, span))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::KwSizeof) => {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let ty = self.type_name()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::SizeOf(ty, span))
            }
            Some(Token::Ident(_)) => self.name_or_call(span),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn path(&mut self) -> ParseResult<Path> {
        let mut segments = vec![self.ident()?];
        while self.eat(&Token::PathSep) {
            segments.push(self.ident()?);
        }
        Ok(Path { segments })
    }

    fn name_or_call(&mut self, span: Span) -> ParseResult<Expr> {
        let callee = self.path()?;
        let type_args = self.try_type_args();
        if self.eat(&Token::LParen) {
            let mut args = Vec::new();
            if !self.check(&Token::RParen) {
                loop {
                    args.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(Expr::Call {
                callee,
                type_args: type_args.unwrap_or_default(),
                args,
                span,
            });
        }
        Ok(Expr::Name(callee, span))
    }

    /// Speculatively parse `<T, ...>` directly followed by `(`.
    ///
    /// Restores the position when the tokens turn out to be a comparison.
    fn try_type_args(&mut self) -> Option<Vec<TypeName>> {
        if !self.check(&Token::Lt) {
            return None;
        }
        let saved = self.pos;
        self.pos += 1;
        let mut args = Vec::new();
        loop {
            match self.type_name() {
                Ok(ty) => args.push(ty),
                Err(_) => {
                    self.pos = saved;
                    return None;
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        if self.eat(&Token::Gt) && self.check(&Token::LParen) {
            Some(args)
        } else {
            self.pos = saved;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(src: &str) -> Item {
        let mut frag = Parser::parse(src).unwrap();
        assert_eq!(frag.items.len(), 1, "expected one item in {:?}", src);
        frag.items.remove(0)
    }

    #[test]
    fn test_parse_variable() {
        match single("const int x = 1 + 2;") {
            Item::Var(v) => {
                assert_eq!(v.name, "x");
                assert!(v.is_const);
                assert!(matches!(v.init, Some(Expr::Binary { op: BinaryOp::Add, .. })));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_forward_and_definition() {
        let frag = Parser::parse("int f(int a); inline int f(int a) { return a * 2; }").unwrap();
        assert_eq!(frag.items.len(), 2);
        match (&frag.items[0], &frag.items[1]) {
            (Item::Function(fwd), Item::Function(def)) => {
                assert!(fwd.body.is_none());
                assert!(def.is_inline);
                assert_eq!(def.params.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_template_call_vs_comparison() {
        match single("twice<int>(3);") {
            Item::Stmt(Stmt::Expr(Expr::Call { type_args, .. })) => {
                assert_eq!(type_args, vec![TypeName::Int]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match single("a < b;") {
            Item::Stmt(Stmt::Expr(Expr::Binary { op: BinaryOp::Lt, .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_namespace_struct_and_template() {
        let frag = Parser::parse(
            "namespace m { int k = 3; int get() { return k; } }
             virtual struct Shape { int sides; };
             template<T> T id(T v) { return v; }",
        )
        .unwrap();
        assert!(matches!(&frag.items[0], Item::Namespace(ns) if ns.items.len() == 2));
        assert!(matches!(&frag.items[1], Item::Struct(s) if s.is_virtual && s.fields.len() == 1));
        assert!(matches!(&frag.items[2], Item::Template(t) if t.params == vec!["T".to_string()]));
    }

    #[test]
    fn test_parse_statements() {
        let frag = Parser::parse("if (x > 1) print(x); else { x = 0; } while (x) x = x - 1;").unwrap();
        assert!(matches!(&frag.items[0], Item::Stmt(Stmt::If { otherwise: Some(_), .. })));
        assert!(matches!(&frag.items[1], Item::Stmt(Stmt::While { .. })));
    }

    #[test]
    fn test_precedence() {
        match single("1 + 2 * 3 == 7 && true;") {
            Item::Stmt(Stmt::Expr(Expr::Binary { op: BinaryOp::And, lhs, .. })) => {
                assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Eq, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Parser::parse("int f() { return 1;").unwrap_err().is_incomplete());
        assert!(matches!(
            Parser::parse("int = 3;"),
            Err(ParseError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Parser::parse("1 = 2;"),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn test_empty_fragment() {
        assert!(Parser::parse(" ; ; // nothing\n").unwrap().items.is_empty());
    }
}
