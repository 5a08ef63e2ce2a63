//! Type annotations as written in source.
//!
//! A [`TypeNode`] is syntax only. The resolver turns each one into a
//! [`crate::types::types::Type`] and records it under the node's id.

use std::fmt::Display;

use crate::Span;

use super::ast::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct TypeNode {
    pub id: NodeId,
    pub span: Span,
    pub kind: TypeNodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeNodeKind {
    /// `int`, `array<int>`, `tuple<int, float>`, `Box<int>`
    Named {
        name: String,
        attributes: Vec<TypeNode>,
    },
    /// `func<int, float>`; a `null` return is stored as `None`.
    Func {
        ret: Option<Box<TypeNode>>,
        params: Vec<TypeNode>,
    },
}

impl TypeNode {
    pub fn named(id: NodeId, span: Span, name: impl Into<String>) -> Self {
        TypeNode {
            id,
            span,
            kind: TypeNodeKind::Named {
                name: name.into(),
                attributes: vec![],
            },
        }
    }

    /// Identifier-safe spelling used to name template instantiations.
    pub fn mangle(&self) -> String {
        match &self.kind {
            TypeNodeKind::Named { name, attributes } if attributes.is_empty() => name.clone(),
            TypeNodeKind::Named { name, attributes } => {
                let inner: Vec<String> = attributes.iter().map(TypeNode::mangle).collect();
                format!("{}${}$$", name, inner.join("$"))
            }
            TypeNodeKind::Func { ret, params } => {
                let ret = ret.as_ref().map_or(String::from("null"), |ret| ret.mangle());
                let params: Vec<String> = params.iter().map(TypeNode::mangle).collect();
                format!("func${}${}$$", ret, params.join("$"))
            }
        }
    }

    /// Immediate child type nodes.
    pub fn children(&self) -> Vec<&TypeNode> {
        match &self.kind {
            TypeNodeKind::Named { attributes, .. } => attributes.iter().collect(),
            TypeNodeKind::Func { ret, params } => {
                ret.iter().map(|ret| ret.as_ref()).chain(params.iter()).collect()
            }
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut TypeNode> {
        match &mut self.kind {
            TypeNodeKind::Named { attributes, .. } => attributes.iter_mut().collect(),
            TypeNodeKind::Func { ret, params } => ret
                .iter_mut()
                .map(|ret| ret.as_mut())
                .chain(params.iter_mut())
                .collect(),
        }
    }
}

impl Display for TypeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TypeNodeKind::Named { name, attributes } if attributes.is_empty() => {
                write!(f, "{}", name)
            }
            TypeNodeKind::Named { name, attributes } => {
                let inner: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
                write!(f, "{}<{}>", name, inner.join(", "))
            }
            TypeNodeKind::Func { ret, params } => {
                let mut inner = vec![ret
                    .as_ref()
                    .map_or(String::from("null"), |ret| ret.to_string())];
                inner.extend(params.iter().map(|p| p.to_string()));
                write!(f, "func<{}>", inner.join(", "))
            }
        }
    }
}
