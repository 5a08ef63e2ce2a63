use std::fmt::Display;

use thiserror::Error;

use crate::Span;

/// The error families a compilation unit can fail with.
///
/// Everything except [`ErrorCategory::TranslationInvariant`] is attributed
/// to user input and carries the span of the offending node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Syntax,
    Redeclaration,
    UnresolvedReference,
    TypeMismatch,
    StructuralMisuse,
    TranslationInvariant,
}

#[derive(Debug, Clone, Error)]
#[error("{internal_error}")]
pub struct Error {
    internal_error: ErrorImpl,
    span: Option<Span>,
}

impl Error {
    pub fn new(error_impl: ErrorImpl, span: Span) -> Self {
        Error {
            internal_error: error_impl,
            span: Some(span),
        }
    }

    /// An internal compiler defect. These are never attributed to a source
    /// location.
    pub fn internal(message: impl Into<String>) -> Self {
        Error {
            internal_error: ErrorImpl::TranslationInvariant {
                message: message.into(),
            },
            span: None,
        }
    }

    pub fn get_span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn kind(&self) -> &ErrorImpl {
        &self.internal_error
    }

    pub fn category(&self) -> ErrorCategory {
        match &self.internal_error {
            ErrorImpl::UnrecognisedToken { .. }
            | ErrorImpl::UnexpectedToken { .. }
            | ErrorImpl::UnexpectedTokenDetailed { .. }
            | ErrorImpl::NumberParseError { .. } => ErrorCategory::Syntax,
            ErrorImpl::VariableAlreadyDeclared { .. }
            | ErrorImpl::OperatorAlreadyDeclared { .. } => ErrorCategory::Redeclaration,
            ErrorImpl::VariableNotDeclared { .. }
            | ErrorImpl::UnknownType { .. }
            | ErrorImpl::ModuleNotFound { .. } => ErrorCategory::UnresolvedReference,
            ErrorImpl::UnexpectedArguments { .. }
            | ErrorImpl::MissingArguments { .. }
            | ErrorImpl::ArgumentTypeMatchError { .. }
            | ErrorImpl::TypeMatchError { .. }
            | ErrorImpl::InvalidOperandType { .. }
            | ErrorImpl::NotCallable { .. }
            | ErrorImpl::InvalidCast { .. }
            | ErrorImpl::ExpectedExplicitValue => ErrorCategory::TypeMismatch,
            ErrorImpl::ExportOutsideModuleScope { .. }
            | ErrorImpl::DeclarationOutsideModuleScope { .. }
            | ErrorImpl::LoopControlOutsideLoop { .. }
            | ErrorImpl::MemberNotFound { .. }
            | ErrorImpl::ImportCycle { .. }
            | ErrorImpl::InvalidAssignmentTarget
            | ErrorImpl::ConstantReassignment { .. }
            | ErrorImpl::ForeignReference { .. }
            | ErrorImpl::TemplateArity { .. } => ErrorCategory::StructuralMisuse,
            ErrorImpl::TranslationInvariant { .. } => ErrorCategory::TranslationInvariant,
        }
    }

    pub fn get_error_name(&self) -> &str {
        match &self.internal_error {
            ErrorImpl::UnrecognisedToken { .. } => "UnrecognisedToken",
            ErrorImpl::UnexpectedToken { .. } => "UnexpectedToken",
            ErrorImpl::UnexpectedTokenDetailed { .. } => "UnexpectedTokenDetailed",
            ErrorImpl::NumberParseError { .. } => "NumberParseError",
            ErrorImpl::VariableAlreadyDeclared { .. } => "VariableAlreadyDeclared",
            ErrorImpl::OperatorAlreadyDeclared { .. } => "OperatorAlreadyDeclared",
            ErrorImpl::VariableNotDeclared { .. } => "VariableNotDeclared",
            ErrorImpl::UnknownType { .. } => "UnknownType",
            ErrorImpl::ModuleNotFound { .. } => "ModuleNotFound",
            ErrorImpl::UnexpectedArguments { .. } => "UnexpectedArguments",
            ErrorImpl::MissingArguments { .. } => "MissingArguments",
            ErrorImpl::ArgumentTypeMatchError { .. } => "ArgumentTypeMatchError",
            ErrorImpl::TypeMatchError { .. } => "TypeMatchError",
            ErrorImpl::InvalidOperandType { .. } => "InvalidOperandType",
            ErrorImpl::NotCallable { .. } => "NotCallable",
            ErrorImpl::InvalidCast { .. } => "InvalidCast",
            ErrorImpl::ExpectedExplicitValue => "ExpectedExplicitValue",
            ErrorImpl::ExportOutsideModuleScope { .. } => "ExportOutsideModuleScope",
            ErrorImpl::DeclarationOutsideModuleScope { .. } => "DeclarationOutsideModuleScope",
            ErrorImpl::LoopControlOutsideLoop { .. } => "LoopControlOutsideLoop",
            ErrorImpl::MemberNotFound { .. } => "MemberNotFound",
            ErrorImpl::ImportCycle { .. } => "ImportCycle",
            ErrorImpl::InvalidAssignmentTarget => "InvalidAssignmentTarget",
            ErrorImpl::ConstantReassignment { .. } => "ConstantReassignment",
            ErrorImpl::ForeignReference { .. } => "ForeignReference",
            ErrorImpl::TemplateArity { .. } => "TemplateArity",
            ErrorImpl::TranslationInvariant { .. } => "TranslationInvariant",
        }
    }

    pub fn get_tip(&self) -> ErrorTip {
        match &self.internal_error {
            ErrorImpl::UnrecognisedToken { .. } => ErrorTip::None,
            ErrorImpl::UnexpectedToken { token } => ErrorTip::Suggestion(format!(
                "Unexpected token: `{}`, did you miss a semicolon?",
                token
            )),
            ErrorImpl::UnexpectedTokenDetailed { token, message } => {
                ErrorTip::Suggestion(format!("Unexpected token: `{}`, {}", token, message))
            }
            ErrorImpl::NumberParseError { token } => ErrorTip::Suggestion(format!(
                "Invalid number: `{}`, is it above the integer limit?",
                token
            )),
            ErrorImpl::VariableAlreadyDeclared { variable } => ErrorTip::Suggestion(format!(
                "`{}` is already declared in this scope",
                variable
            )),
            ErrorImpl::OperatorAlreadyDeclared {
                operator,
                left,
                right,
            } => ErrorTip::Suggestion(format!(
                "Operator `{} {} {}` is already overloaded",
                left, operator, right
            )),
            ErrorImpl::VariableNotDeclared { variable } => {
                ErrorTip::Suggestion(format!("Variable `{}` not declared", variable))
            }
            ErrorImpl::UnknownType { type_ } => {
                ErrorTip::Suggestion(format!("Unknown type `{}` found", type_))
            }
            ErrorImpl::ModuleNotFound { module } => {
                ErrorTip::Suggestion(format!("Could not find imported module `{}`", module))
            }
            ErrorImpl::UnexpectedArguments { expected, received }
            | ErrorImpl::MissingArguments { expected, received } => ErrorTip::Suggestion(
                format!("Expected {} arguments, received {}", expected, received),
            ),
            ErrorImpl::ArgumentTypeMatchError { expected, received } => {
                ErrorTip::Suggestion(format!(
                    "Expected argument type `{}`, received `{}`",
                    expected, received
                ))
            }
            ErrorImpl::TypeMatchError { expected, received } => ErrorTip::Suggestion(format!(
                "Expected type `{}`, received `{}`",
                expected, received
            )),
            ErrorImpl::InvalidOperandType { operator, received } => ErrorTip::Suggestion(
                format!("Operator `{}` cannot be applied to `{}`", operator, received),
            ),
            ErrorImpl::NotCallable { received } => {
                ErrorTip::Suggestion(format!("Values of type `{}` cannot be called", received))
            }
            ErrorImpl::InvalidCast { from, to } => {
                ErrorTip::Suggestion(format!("Cannot cast `{}` to `{}`", from, to))
            }
            ErrorImpl::ExpectedExplicitValue => ErrorTip::Suggestion(String::from(
                "A `null` initializer needs an explicit type",
            )),
            ErrorImpl::ExportOutsideModuleScope { name } => ErrorTip::Suggestion(format!(
                "`export {}` must appear at module scope",
                name
            )),
            ErrorImpl::DeclarationOutsideModuleScope { what } => {
                ErrorTip::Suggestion(format!("{} may only be declared at module scope", what))
            }
            ErrorImpl::LoopControlOutsideLoop { keyword } => {
                ErrorTip::Suggestion(format!("`{}` used outside of a loop", keyword))
            }
            ErrorImpl::MemberNotFound { member, type_ } => {
                ErrorTip::Suggestion(format!("Type `{}` has no member `{}`", type_, member))
            }
            ErrorImpl::ImportCycle { module } => ErrorTip::Suggestion(format!(
                "Module `{}` is imported while it is still being loaded",
                module
            )),
            ErrorImpl::InvalidAssignmentTarget => ErrorTip::Suggestion(String::from(
                "Only variables, members and subscripts can be assigned to",
            )),
            ErrorImpl::ConstantReassignment { variable } => {
                ErrorTip::Suggestion(format!("`{}` cannot be reassigned", variable))
            }
            ErrorImpl::ForeignReference { name } => ErrorTip::Suggestion(format!(
                "Foreign function `{}` can only be called directly",
                name
            )),
            ErrorImpl::TemplateArity { name, expected, received } => {
                ErrorTip::Suggestion(format!(
                    "Object `{}` expects {} attributes, received {}",
                    name, expected, received
                ))
            }
            ErrorImpl::TranslationInvariant { message } => {
                ErrorTip::Suggestion(format!("Internal compiler error: {}", message))
            }
        }
    }
}

pub enum ErrorTip {
    None,
    Suggestion(String),
}

impl Display for ErrorTip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorTip::None => write!(f, ""),
            ErrorTip::Suggestion(suggestion) => write!(f, "{}", suggestion),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorImpl {
    #[error("unrecognised token: {token:?}")]
    UnrecognisedToken { token: String },
    #[error("unexpected token: {token:?}")]
    UnexpectedToken { token: String },
    #[error("unexpected token ({message:?}): {token:?}")]
    UnexpectedTokenDetailed { token: String, message: String },
    #[error("error parsing number: {token:?}")]
    NumberParseError { token: String },
    #[error("{variable:?} already declared")]
    VariableAlreadyDeclared { variable: String },
    #[error("operator {operator:?} already declared for {left} and {right}")]
    OperatorAlreadyDeclared {
        operator: String,
        left: String,
        right: String,
    },
    #[error("reference to undefined variable {variable:?}")]
    VariableNotDeclared { variable: String },
    #[error("unknown type {type_} found")]
    UnknownType { type_: String },
    #[error("could not find imported module {module:?}")]
    ModuleNotFound { module: String },
    #[error("too many arguments: expected {expected:?}, received {received:?}")]
    UnexpectedArguments { expected: usize, received: usize },
    #[error("too few arguments: expected {expected:?}, received {received:?}")]
    MissingArguments { expected: usize, received: usize },
    #[error("argument types do not match: expected {expected}, received {received}")]
    ArgumentTypeMatchError { expected: String, received: String },
    #[error("types do not match: expected {expected}, received {received}")]
    TypeMatchError { expected: String, received: String },
    #[error("invalid operand type {received} for operator {operator:?}")]
    InvalidOperandType { operator: String, received: String },
    #[error("call to non-executable type {received}")]
    NotCallable { received: String },
    #[error("invalid cast from {from} to {to}")]
    InvalidCast { from: String, to: String },
    #[error("expected explicit type for null initializer")]
    ExpectedExplicitValue,
    #[error("unexpected export of {name:?}: all exports must be in the module scope")]
    ExportOutsideModuleScope { name: String },
    #[error("{what} must be declared in the module scope")]
    DeclarationOutsideModuleScope { what: String },
    #[error("{keyword:?} outside of a loop")]
    LoopControlOutsideLoop { keyword: String },
    #[error("member {member:?} not found on type {type_}")]
    MemberNotFound { member: String, type_: String },
    #[error("import cycle detected at module {module:?}")]
    ImportCycle { module: String },
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("cannot assign to {variable:?}")]
    ConstantReassignment { variable: String },
    #[error("foreign function {name:?} cannot be used as a value")]
    ForeignReference { name: String },
    #[error("wrong number of attributes for {name:?}: expected {expected}, received {received}")]
    TemplateArity {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("translation invariant violated: {message}")]
    TranslationInvariant { message: String },
}
