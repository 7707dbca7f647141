//! The three error kinds (`ParseError`, `TypeCheckError`, `EvaluationError`)
//! and the bit-exact caret-highlight renderer shared by all of them.

use std::fmt;
use std::rc::Rc;

use crate::compiler::tokens::Pos;

/// Renders `<message>\n\n> <line>|   <source-line>\n<9+col spaces>^`, where
/// `<line>` is the 1-based line number padded to width 4 and `<source-line>`
/// is the bytes between the two nearest line breaks around `pos`. Bit-exact
/// by construction: consumers parse this format.
pub fn render_highlight(message: &str, input: &str, pos: Pos) -> String {
    let pos = pos.min(input.len());
    let line_start = input[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = input[pos..].find('\n').map(|i| pos + i).unwrap_or(input.len());
    let source_line = &input[line_start..line_end];
    let line_number = input[..line_start].matches('\n').count() + 1;
    let column = pos - line_start;
    format!("{message}\n\n> {line_number:>4}|   {source_line}\n{}^", " ".repeat(9 + column))
}

/// Shared attach-point machinery: position information is attached at most
/// once, so the innermost location survives a rethrow through outer context.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub pos: Option<Pos>,
    pub input: Option<Rc<str>>,
}

impl Attachment {
    pub fn attach_once(&mut self, pos: Pos, input: Rc<str>) {
        if self.pos.is_none() {
            self.pos = Some(pos);
            self.input = Some(input);
        }
    }

    fn render(&self, bare_message: &str) -> String {
        match (&self.input, self.pos) {
            (Some(input), Some(pos)) => render_highlight(bare_message, input, pos),
            _ => bare_message.to_string(),
        }
    }
}

macro_rules! attach_point_error {
    ($name:ident, $kind:ident, $code_fn:path) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            pub kind: $kind,
            pub attachment: Attachment,
        }

        impl $name {
            pub fn new(kind: $kind) -> Self {
                $name { kind, attachment: Attachment::default() }
            }

            pub fn with_ast(mut self, pos: Pos, input: Rc<str>) -> Self {
                self.attachment.attach_once(pos, input);
                self
            }

            pub fn message(&self) -> String {
                self.kind.to_string()
            }

            pub fn code(&self) -> &'static str {
                $code_fn(&self.kind)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.attachment.render(&self.message()))
            }
        }

        impl std::error::Error for $name {}

        impl From<$kind> for $name {
            fn from(kind: $kind) -> Self {
                $name::new(kind)
            }
        }
    };
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("invalid bytes literal: {0}")]
    InvalidBytesLiteral(String),
    #[error("invalid escape sequence: {0}")]
    InvalidEscape(String),
    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken { found: String, expected: String },
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error("'{0}' is a reserved word and cannot be used as an identifier")]
    ReservedWord(String),
    #[error("optional field/index syntax is not enabled in this environment")]
    OptionalSyntaxDisabled,
    #[error("expression exceeds maxAstNodes ({0})")]
    TooManyAstNodes(usize),
    #[error("expression exceeds maxDepth ({0})")]
    TooDeep(usize),
    #[error("list exceeds maxListElements ({0})")]
    TooManyListElements(usize),
    #[error("map exceeds maxMapEntries ({0})")]
    TooManyMapEntries(usize),
    #[error("call exceeds maxCallArguments ({0})")]
    TooManyCallArguments(usize),
    #[error("`has()` argument must be a field-selection chain")]
    InvalidHasArgument,
    #[error("macro '{0}' expects {1} argument(s)")]
    BadMacroArity(String, usize),
    #[error("macro '{0}' requires a bare identifier as its loop variable")]
    BadMacroLoopVar(String),
}

pub fn parse_error_code(kind: &ParseErrorKind) -> &'static str {
    use ParseErrorKind::*;
    match kind {
        UnexpectedChar(_) => "E0101",
        UnterminatedString => "E0102",
        InvalidNumber(_) => "E0103",
        InvalidBytesLiteral(_) => "E0104",
        InvalidEscape(_) => "E0105",
        UnexpectedToken { .. } => "E0110",
        UnexpectedEof(_) => "E0111",
        ReservedWord(_) => "E0112",
        OptionalSyntaxDisabled => "E0113",
        TooManyAstNodes(_) => "E0120",
        TooDeep(_) => "E0121",
        TooManyListElements(_) => "E0122",
        TooManyMapEntries(_) => "E0123",
        TooManyCallArguments(_) => "E0124",
        InvalidHasArgument => "E0130",
        BadMacroArity(..) => "E0131",
        BadMacroLoopVar(_) => "E0132",
    }
}

attach_point_error!(ParseError, ParseErrorKind, parse_error_code);

#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeCheckErrorKind {
    #[error("undeclared reference to '{0}'")]
    UnknownVariable(String),
    #[error("undefined type '{0}'")]
    UnknownType(String),
    #[error("found no matching overload for '{0}'")]
    NoMatchingOverload(String),
    #[error("branch types cannot be unified: {0} vs {1}")]
    BranchUnificationFailure(String, String),
    #[error("list/map literal elements must share a common type")]
    HomogeneityFailure,
    #[error("bad macro shape for '{0}': {1}")]
    BadMacroShape(String, String),
    #[error("duplicate declaration of '{0}'")]
    DuplicateDeclaration(String),
    #[error("overload for '{0}' overlaps an existing overload")]
    OverlappingOverload(String),
}

pub fn type_check_error_code(kind: &TypeCheckErrorKind) -> &'static str {
    use TypeCheckErrorKind::*;
    match kind {
        UnknownVariable(_) => "E0201",
        UnknownType(_) => "E0202",
        NoMatchingOverload(_) => "E0210",
        BranchUnificationFailure(..) => "E0211",
        HomogeneityFailure => "E0212",
        BadMacroShape(..) => "E0220",
        DuplicateDeclaration(_) => "E0230",
        OverlappingOverload(_) => "E0231",
    }
}

attach_point_error!(TypeCheckError, TypeCheckErrorKind, type_check_error_code);

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluationErrorKind {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("No such key: {0}")]
    NoSuchKey(String),
    #[error("no such overload: {0}")]
    NoMatchingOverload(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("{0}")]
    Arithmetic(String),
    #[error("{0}")]
    IndexOutOfRange(String),
    #[error("Logical operator requires bool operands")]
    PredicateNotBoolean,
    #[error("bad pattern: {0}")]
    BadPattern(String),
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("runtime type mismatch: {0}")]
    TypeMismatch(String),
}

pub fn evaluation_error_code(kind: &EvaluationErrorKind) -> &'static str {
    use EvaluationErrorKind::*;
    match kind {
        UnknownVariable(_) => "E0301",
        NoSuchKey(_) => "E0302",
        NoMatchingOverload(_) => "E0303",
        Conversion(_) => "E0304",
        Arithmetic(_) => "E0305",
        IndexOutOfRange(_) => "E0306",
        PredicateNotBoolean => "E0307",
        BadPattern(_) => "E0308",
        Cancelled => "E0309",
        TypeMismatch(_) => "E0310",
    }
}

attach_point_error!(EvaluationError, EvaluationErrorKind, evaluation_error_code);

impl EvaluationError {
    pub fn is_recoverable_in_short_circuit(&self) -> bool {
        !matches!(self.kind, EvaluationErrorKind::UnknownVariable(_) | EvaluationErrorKind::PredicateNotBoolean)
    }
}
