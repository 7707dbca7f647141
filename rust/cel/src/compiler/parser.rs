//! Recursive-descent precedence-climbing parser. Grammar (low to high):
//! ternary `?:` (right-assoc) → `||` → `&&` → `== !=` → `< <= > >= in`
//! → `+ -` → `* / %` → unary `! -` → postfix (`. .? [] [?]`, call/receiver
//! call) → primary. Macro expansion happens inline at every call/receiver
//! call site, immediately after the call's arguments are parsed.

use std::rc::Rc;

use crate::compiler::ast::{Arena, Ast, BinOp, ExprKind, Literal, NodeId};
use crate::compiler::macros;
use crate::compiler::registry::Registry;
use crate::compiler::tokens::{NumberLit, Pos, Token, TokenKind};
use crate::error::{ParseError, ParseErrorKind};

/// Structural limits enforced while parsing, each reported at the
/// offending position.
#[derive(Debug, Clone)]
pub struct ParserLimits {
    pub max_ast_nodes: usize,
    pub max_depth: usize,
    pub max_list_elements: usize,
    pub max_map_entries: usize,
    pub max_call_arguments: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        ParserLimits { max_ast_nodes: 10_000, max_depth: 250, max_list_elements: 1000, max_map_entries: 1000, max_call_arguments: 255 }
    }
}

pub fn parse(input: &str, registry: &Registry, enable_optional_types: bool, limits: ParserLimits) -> Result<Ast, ParseError> {
    let source: Rc<str> = Rc::from(input);
    let mut lexer = super::lexer::Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token().map_err(|e| e.with_ast(0, source.clone()))?;
        let is_eof = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    let mut parser = Parser { tokens, idx: 0, arena: Arena::default(), input: source.clone(), registry, enable_optional_types, limits, depth: 0 };
    let root = parser.parse_expr()?;
    parser.expect(TokenKind::Eof, "end of expression")?;
    Ok(Ast { arena: parser.arena, root, input: source })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    idx: usize,
    arena: Arena,
    input: Rc<str>,
    registry: &'a Registry,
    enable_optional_types: bool,
    limits: ParserLimits,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.idx]
    }

    fn peek_pos(&self) -> Pos {
        self.peek().pos
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.idx].clone();
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected_desc: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            self.err_here(ParseErrorKind::UnexpectedToken { found: self.peek().kind.to_string(), expected: expected_desc.to_string() })
        }
    }

    fn expect_ident(&mut self) -> Result<(Rc<str>, Pos), ParseError> {
        let pos = self.peek_pos();
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((Rc::from(name.as_str()), pos))
            }
            _ => self.err_here(ParseErrorKind::UnexpectedToken { found: self.peek().kind.to_string(), expected: "identifier".to_string() }),
        }
    }

    fn err_here<T>(&self, kind: ParseErrorKind) -> Result<T, ParseError> {
        Err(ParseError::new(kind).with_ast(self.peek_pos(), self.input.clone()))
    }

    fn err_at<T>(&self, kind: ParseErrorKind, pos: Pos) -> Result<T, ParseError> {
        Err(ParseError::new(kind).with_ast(pos, self.input.clone()))
    }

    fn push(&mut self, kind: ExprKind, pos: Pos) -> Result<NodeId, ParseError> {
        if self.arena.len() >= self.limits.max_ast_nodes {
            return self.err_at(ParseErrorKind::TooManyAstNodes(self.limits.max_ast_nodes), pos);
        }
        Ok(self.arena.push(kind, pos))
    }

    fn enter(&mut self, pos: Pos) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return self.err_at(ParseErrorKind::TooDeep(self.limits.max_depth), pos);
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }

    // ternary ?: (right-assoc)
    fn parse_expr(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        self.enter(pos)?;
        let cond = self.parse_or()?;
        let result = if self.eat(&TokenKind::Question) {
            let then_branch = self.parse_expr()?;
            self.expect(TokenKind::Colon, "':'")?;
            let else_branch = self.parse_expr()?;
            self.push(ExprKind::Ternary { cond, then_branch, else_branch }, pos)
        } else {
            Ok(cond)
        };
        self.exit();
        result
    }

    fn parse_or(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = self.push(ExprKind::Or(left, right), pos)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = self.push(ExprKind::And(left, right), pos)?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = self.push(ExprKind::Binary { op, left, right }, pos)?;
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        let mut left = self.parse_additive()?;
        loop {
            if self.eat(&TokenKind::In) {
                let right = self.parse_additive()?;
                left = self.push(ExprKind::In { item: left, container: right }, pos)?;
                continue;
            }
            let op = match self.peek().kind {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = self.push(ExprKind::Binary { op, left, right }, pos)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.push(ExprKind::Binary { op, left, right }, pos)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.push(ExprKind::Binary { op, left, right }, pos)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        if self.eat(&TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return self.push(ExprKind::Not(operand), pos);
        }
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return self.push(ExprKind::Neg(operand), pos);
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        self.enter(pos)?;
        let result = self.parse_postfix_inner();
        self.exit();
        result
    }

    fn parse_postfix_inner(&mut self) -> Result<NodeId, ParseError> {
        let mut node = self.parse_primary()?;
        loop {
            let step_pos = self.peek_pos();
            if self.eat(&TokenKind::Dot) {
                let (field, _) = self.expect_ident()?;
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_arg_list()?;
                    node = self.finish_call(Some(node), field, args, step_pos)?;
                } else {
                    node = self.push(ExprKind::Field { receiver: node, field }, step_pos)?;
                }
            } else if self.eat(&TokenKind::OptDot) {
                if !self.enable_optional_types {
                    return self.err_at(ParseErrorKind::OptionalSyntaxDisabled, step_pos);
                }
                let (field, _) = self.expect_ident()?;
                node = self.push(ExprKind::OptField { receiver: node, field }, step_pos)?;
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "']'")?;
                node = self.push(ExprKind::Index { receiver: node, index }, step_pos)?;
            } else if self.eat(&TokenKind::OptLBracket) {
                if !self.enable_optional_types {
                    return self.err_at(ParseErrorKind::OptionalSyntaxDisabled, step_pos);
                }
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "']'")?;
                node = self.push(ExprKind::OptIndex { receiver: node, index }, step_pos)?;
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_arg_list(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let open_pos = self.peek_pos();
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if args.len() > self.limits.max_call_arguments {
                    return self.err_at(ParseErrorKind::TooManyCallArguments(self.limits.max_call_arguments), open_pos);
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                if self.check(&TokenKind::RParen) {
                    break; // trailing comma
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }

    /// Builds a `Call`/`ReceiverCall` node, first checking whether
    /// `(name, receiver.is_some(), args.len())` identifies a built-in
    /// macro — if so, expanding it in place instead of emitting a plain
    /// call node.
    fn finish_call(&mut self, receiver: Option<NodeId>, name: Rc<str>, args: Vec<NodeId>, pos: Pos) -> Result<NodeId, ParseError> {
        let has_receiver = receiver.is_some();
        if let Some(handle) = self.registry.lookup_macro(&name, has_receiver, args.len()) {
            let _ = handle;
            return self.expand_macro(&name, receiver, args, pos);
        }
        match receiver {
            Some(receiver) => self.push(ExprKind::ReceiverCall { name, receiver, args }, pos),
            None => self.push(ExprKind::Call { name, args }, pos),
        }
    }

    fn expand_macro(&mut self, name: &str, receiver: Option<NodeId>, args: Vec<NodeId>, pos: Pos) -> Result<NodeId, ParseError> {
        match (name, receiver, args.as_slice()) {
            ("has", None, [arg]) => macros::expand_has(&mut self.arena, *arg, pos),
            ("all", Some(iterable), [var, pred]) => macros::expand_all(&mut self.arena, iterable, *var, *pred, pos),
            ("exists", Some(iterable), [var, pred]) => macros::expand_exists(&mut self.arena, iterable, *var, *pred, pos),
            ("exists_one", Some(iterable), [var, pred]) => macros::expand_exists_one(&mut self.arena, iterable, *var, *pred, pos),
            ("filter", Some(iterable), [var, pred]) => macros::expand_filter(&mut self.arena, iterable, *var, *pred, pos),
            ("map", Some(iterable), [var, transform]) => macros::expand_map(&mut self.arena, iterable, *var, None, *transform, pos),
            ("map", Some(iterable), [var, pred, transform]) => macros::expand_map(&mut self.arena, iterable, *var, Some(*pred), *transform, pos),
            _ => self.err_at(ParseErrorKind::BadMacroArity(name.to_string(), args.len()), pos),
        }
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek_pos();
        match self.peek().kind.clone() {
            TokenKind::Number(lit) => {
                self.advance();
                let literal = match lit {
                    NumberLit::Int(v) => Literal::Int(v),
                    NumberLit::Uint(v) => Literal::Uint(v),
                    NumberLit::Double(v) => Literal::Double(v),
                };
                self.push(ExprKind::Value(literal), pos)
            }
            TokenKind::Str(s) => {
                self.advance();
                self.push(ExprKind::Value(Literal::String(Rc::from(s.as_str()))), pos)
            }
            TokenKind::Bytes(b) => {
                self.advance();
                self.push(ExprKind::Value(Literal::Bytes(Rc::from(b.as_slice()))), pos)
            }
            TokenKind::Bool(b) => {
                self.advance();
                self.push(ExprKind::Value(Literal::Bool(b)), pos)
            }
            TokenKind::Null => {
                self.advance();
                self.push(ExprKind::Value(Literal::Null), pos)
            }
            TokenKind::Ident(name) => {
                self.advance();
                let name: Rc<str> = Rc::from(name.as_str());
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_arg_list()?;
                    self.finish_call(None, name, args, pos)
                } else {
                    self.push(ExprKind::Id(name), pos)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_list(pos),
            TokenKind::LBrace => self.parse_map(pos),
            _ => self.err_at(ParseErrorKind::UnexpectedToken { found: self.peek().kind.to_string(), expected: "expression".to_string() }, pos),
        }
    }

    fn parse_list(&mut self, open_pos: Pos) -> Result<NodeId, ParseError> {
        self.advance();
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                elements.push(self.parse_expr()?);
                if elements.len() > self.limits.max_list_elements {
                    return self.err_at(ParseErrorKind::TooManyListElements(self.limits.max_list_elements), open_pos);
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                if self.check(&TokenKind::RBracket) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket, "']'")?;
        self.push(ExprKind::List(elements), open_pos)
    }

    fn parse_map(&mut self, open_pos: Pos) -> Result<NodeId, ParseError> {
        self.advance();
        let mut entries = Vec::new();
        if !self.check(&TokenKind::RBrace) {
            loop {
                let key = self.parse_expr()?;
                self.expect(TokenKind::Colon, "':'")?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if entries.len() > self.limits.max_map_entries {
                    return self.err_at(ParseErrorKind::TooManyMapEntries(self.limits.max_map_entries), open_pos);
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                if self.check(&TokenKind::RBrace) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        self.push(ExprKind::Map(entries), open_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::ExprKind;

    fn parse_default(src: &str) -> Ast {
        let registry = Registry::new();
        parse(src, &registry, true, ParserLimits::default()).unwrap()
    }

    #[test]
    fn ternary_is_right_associative_and_lowest_precedence() {
        let ast = parse_default("true ? 1 : false ? 2 : 3");
        assert!(matches!(ast.node(ast.root).kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn field_and_call_chains_parse_left_to_right() {
        let ast = parse_default("a.b.c(1, 2)");
        assert!(matches!(ast.node(ast.root).kind, ExprKind::ReceiverCall { .. }));
    }

    #[test]
    fn has_macro_expands_to_has_chain() {
        let ast = parse_default("has(a.b)");
        assert!(matches!(ast.node(ast.root).kind, ExprKind::HasChain(_)));
    }

    #[test]
    fn all_macro_expands_to_comprehension() {
        let ast = parse_default("[1,2,3].all(x, x > 0)");
        assert!(matches!(ast.node(ast.root).kind, ExprKind::Comprehension(_)));
    }

    #[test]
    fn optional_postfix_rejected_when_disabled() {
        let registry = Registry::new();
        let err = parse("a.?b", &registry, false, ParserLimits::default()).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::OptionalSyntaxDisabled));
    }

    #[test]
    fn trailing_comma_allowed_in_list_and_call() {
        let ast = parse_default("[1, 2, 3,]");
        assert!(matches!(ast.node(ast.root).kind, ExprKind::List(_)));
    }

    #[test]
    fn max_depth_limit_is_enforced() {
        let registry = Registry::new();
        let deeply_nested = "(".repeat(300) + "1" + &")".repeat(300);
        let limits = ParserLimits { max_depth: 10, ..ParserLimits::default() };
        assert!(parse(&deeply_nested, &registry, true, limits).is_err());
    }
}
