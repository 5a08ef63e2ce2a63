//! Unit tests for error handling.

use crate::errors::errors::{Error, ErrorCategory, ErrorImpl, ErrorTip};
use crate::{display_error, Position, Span};
use std::rc::Rc;

fn span(start: u32, end: u32) -> Span {
    let file = Rc::new("test.bt".to_string());
    Span {
        start: Position(start, Rc::clone(&file)),
        end: Position(end, file),
    }
}

#[test]
fn test_error_creation() {
    let error = Error::new(
        ErrorImpl::UnrecognisedToken {
            token: "@".to_string(),
        },
        span(10, 11),
    );

    assert_eq!(error.get_error_name(), "UnrecognisedToken");
    assert_eq!(error.category(), ErrorCategory::Syntax);
}

#[test]
fn test_error_span() {
    let error = Error::new(
        ErrorImpl::UnexpectedToken {
            token: "identifier".to_string(),
        },
        span(42, 50),
    );

    let span = error.get_span().unwrap();
    assert_eq!(span.start.0, 42);
    assert_eq!(span.end.0, 50);
}

#[test]
fn test_categories() {
    let redeclared = Error::new(
        ErrorImpl::VariableAlreadyDeclared {
            variable: "x".to_string(),
        },
        span(0, 1),
    );
    assert_eq!(redeclared.category(), ErrorCategory::Redeclaration);

    let unresolved = Error::new(
        ErrorImpl::VariableNotDeclared {
            variable: "x".to_string(),
        },
        span(0, 1),
    );
    assert_eq!(unresolved.category(), ErrorCategory::UnresolvedReference);

    let mismatch = Error::new(
        ErrorImpl::TypeMatchError {
            expected: "int".to_string(),
            received: "float".to_string(),
        },
        span(0, 1),
    );
    assert_eq!(mismatch.category(), ErrorCategory::TypeMismatch);

    let misuse = Error::new(
        ErrorImpl::LoopControlOutsideLoop {
            keyword: "break".to_string(),
        },
        span(0, 1),
    );
    assert_eq!(misuse.category(), ErrorCategory::StructuralMisuse);
}

#[test]
fn test_internal_error_has_no_span() {
    let error = Error::internal("output stack leaked");

    assert!(error.get_span().is_none());
    assert_eq!(error.category(), ErrorCategory::TranslationInvariant);
    assert_eq!(
        error.to_string(),
        "translation invariant violated: output stack leaked"
    );
}

#[test]
fn test_error_tips() {
    let error = Error::new(
        ErrorImpl::ExportOutsideModuleScope {
            name: "inner".to_string(),
        },
        span(0, 1),
    );

    match error.get_tip() {
        ErrorTip::Suggestion(tip) => assert!(tip.contains("module scope")),
        ErrorTip::None => panic!("expected a suggestion"),
    }
}

#[test]
fn test_display_error_points_at_column() {
    let source = "func int:main() {\n    return 1.5;\n}\n";
    let error = Error::new(
        ErrorImpl::TypeMatchError {
            expected: "int".to_string(),
            received: "float".to_string(),
        },
        span(29, 32),
    );

    let rendered = display_error(&error, source);

    assert!(rendered.starts_with("Error: TypeMatchError"));
    assert!(rendered.contains("-> test.bt"));
    assert!(rendered.contains("2 | return 1.5;"));
    assert!(rendered.contains("| -------^"));
}
