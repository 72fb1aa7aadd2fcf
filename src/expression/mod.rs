//! Expression and predicate trees.
//!
//! Both are closed sum types: every consumer (path resolution, the analyzers, the
//! renderer) matches them exhaustively. Path expressions start out unresolved; path
//! resolution fills in [`PathExpression::reference`] with the join node the path is
//! based on and the residual field below that node.

pub mod errors;
pub mod function_registry;
pub mod parser;
pub mod render;

use std::fmt;

use crate::join_tree::JoinNodeId;

pub use errors::ExpressionParseError;
pub use parser::{
    parse_expression, parse_join_path, parse_order_by_item, parse_path, parse_predicate,
};
pub use render::{write_expression, write_predicate, PathStyle, SourceText};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(PathExpression),
    Parameter(String),
    Literal(Literal),
    Function(FunctionExpression),
    /// `INDEX(path)`: position of a list element
    ListIndex(PathExpression),
    /// `KEY(path)`: key of a map entry
    MapKey(PathExpression),
    Arithmetic {
        operator: ArithmeticOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Case(CaseExpression),
    Subquery(SubqueryExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Numeric(String),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    pub elements: Vec<PathElement>,
    /// Set once the path has been resolved against the join tree
    pub reference: Option<PathReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathElement {
    Property(String),
    /// `items[expr]`: a list index or map key qualifier
    Array { base: String, index: Box<Expression> },
}

impl PathElement {
    pub fn name(&self) -> &str {
        match self {
            PathElement::Property(name) => name,
            PathElement::Array { base, .. } => base,
        }
    }
}

/// Resolved form of a path: the node it is based on and the dotted field below it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathReference {
    pub base_node: JoinNodeId,
    pub field: Option<String>,
}

impl PathExpression {
    pub fn new(elements: Vec<PathElement>) -> Self {
        PathExpression {
            elements,
            reference: None,
        }
    }

    /// Build an unresolved path from plain dotted property names
    pub fn from_dotted(path: &str) -> Self {
        PathExpression::new(
            path.split('.')
                .map(|p| PathElement::Property(p.to_string()))
                .collect(),
        )
    }

    /// A path that refers to a join node directly, already resolved
    pub fn for_node(alias: &str, node: JoinNodeId) -> Self {
        PathExpression {
            elements: vec![PathElement::Property(alias.to_string())],
            reference: Some(PathReference {
                base_node: node,
                field: None,
            }),
        }
    }

    pub fn first_name(&self) -> Option<&str> {
        self.elements.first().map(|e| e.name())
    }

    /// Source text of the path, e.g. `o.items[1].price`
    pub fn path_text(&self) -> String {
        let mut out = String::new();
        render::write_path_elements(&mut out, self, &SourceText);
        out
    }

    pub fn has_array_elements(&self) -> bool {
        self.elements
            .iter()
            .any(|e| matches!(e, PathElement::Array { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpression {
    pub name: String,
    pub distinct: bool,
    pub arguments: Vec<Expression>,
    pub filter: Option<Box<Predicate>>,
    pub window: Option<WindowDefinition>,
}

impl FunctionExpression {
    pub fn new(name: impl Into<String>, arguments: Vec<Expression>) -> Self {
        FunctionExpression {
            name: name.into(),
            distinct: false,
            arguments,
            filter: None,
            window: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowDefinition {
    pub partition_by: Vec<Expression>,
    pub order_by: Vec<OrderByItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpression {
    pub when_clauses: Vec<(Predicate, Expression)>,
    pub default: Option<Box<Expression>>,
}

/// An already rendered subquery, used as a scalar or inside EXISTS
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpression {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: Expression,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOperator {
    pub fn symbol(&self, negated: bool) -> &'static str {
        match (self, negated) {
            (ComparisonOperator::Eq, false) => "=",
            (ComparisonOperator::Eq, true) => "<>",
            (ComparisonOperator::Gt, _) => ">",
            (ComparisonOperator::Ge, _) => ">=",
            (ComparisonOperator::Lt, _) => "<",
            (ComparisonOperator::Le, _) => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundPredicate {
    pub operator: BooleanOperator,
    pub children: Vec<Predicate>,
    pub negated: bool,
}

impl CompoundPredicate {
    pub fn and(children: Vec<Predicate>) -> Self {
        CompoundPredicate {
            operator: BooleanOperator::And,
            children,
            negated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compound(CompoundPredicate),
    Comparison {
        operator: ComparisonOperator,
        left: Expression,
        right: Expression,
        negated: bool,
    },
    In {
        left: Expression,
        right: Vec<Expression>,
        negated: bool,
    },
    IsNull {
        expression: Expression,
        negated: bool,
    },
    IsEmpty {
        expression: Expression,
        negated: bool,
    },
    Like {
        left: Expression,
        pattern: Expression,
        negated: bool,
    },
    Between {
        expression: Expression,
        lower: Expression,
        upper: Expression,
        negated: bool,
    },
    Exists {
        subquery: SubqueryExpression,
        negated: bool,
    },
}

impl Predicate {
    pub fn eq(left: Expression, right: Expression) -> Self {
        Predicate::Comparison {
            operator: ComparisonOperator::Eq,
            left,
            right,
            negated: false,
        }
    }

    /// Logical negation, folded into the predicate's own flag
    pub fn negate(self) -> Self {
        match self {
            Predicate::Compound(mut c) => {
                c.negated = !c.negated;
                Predicate::Compound(c)
            }
            Predicate::Comparison {
                operator,
                left,
                right,
                negated,
            } => Predicate::Comparison {
                operator,
                left,
                right,
                negated: !negated,
            },
            Predicate::In {
                left,
                right,
                negated,
            } => Predicate::In {
                left,
                right,
                negated: !negated,
            },
            Predicate::IsNull {
                expression,
                negated,
            } => Predicate::IsNull {
                expression,
                negated: !negated,
            },
            Predicate::IsEmpty {
                expression,
                negated,
            } => Predicate::IsEmpty {
                expression,
                negated: !negated,
            },
            Predicate::Like {
                left,
                pattern,
                negated,
            } => Predicate::Like {
                left,
                pattern,
                negated: !negated,
            },
            Predicate::Between {
                expression,
                lower,
                upper,
                negated,
            } => Predicate::Between {
                expression,
                lower,
                upper,
                negated: !negated,
            },
            Predicate::Exists { subquery, negated } => Predicate::Exists {
                subquery,
                negated: !negated,
            },
        }
    }

    /// Direct sub-expressions of this predicate, excluding nested predicates
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Predicate::Compound(_) | Predicate::Exists { .. } => Vec::new(),
            Predicate::Comparison { left, right, .. } => vec![left, right],
            Predicate::In { left, right, .. } => {
                let mut all = vec![left];
                all.extend(right.iter());
                all
            }
            Predicate::IsNull { expression, .. } | Predicate::IsEmpty { expression, .. } => {
                vec![expression]
            }
            Predicate::Like { left, pattern, .. } => vec![left, pattern],
            Predicate::Between {
                expression,
                lower,
                upper,
                ..
            } => vec![expression, lower, upper],
        }
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            Predicate::Compound(_) | Predicate::Exists { .. } => Vec::new(),
            Predicate::Comparison { left, right, .. } => vec![left, right],
            Predicate::In { left, right, .. } => {
                let mut all = vec![left];
                all.extend(right.iter_mut());
                all
            }
            Predicate::IsNull { expression, .. } | Predicate::IsEmpty { expression, .. } => {
                vec![expression]
            }
            Predicate::Like { left, pattern, .. } => vec![left, pattern],
            Predicate::Between {
                expression,
                lower,
                upper,
                ..
            } => vec![expression, lower, upper],
        }
    }

    /// Calls `f` for every path expression reachable from this predicate, in
    /// source order
    pub fn for_each_path<'a>(&'a self, f: &mut dyn FnMut(&'a PathExpression)) {
        if let Predicate::Compound(c) = self {
            for child in &c.children {
                child.for_each_path(f);
            }
            return;
        }
        for expr in self.expressions() {
            expr.for_each_path(f);
        }
    }
}

impl Expression {
    pub fn path(path: &str) -> Self {
        Expression::Path(PathExpression::from_dotted(path))
    }

    pub fn parameter(name: &str) -> Self {
        Expression::Parameter(name.to_string())
    }

    pub fn number(value: impl ToString) -> Self {
        Expression::Literal(Literal::Numeric(value.to_string()))
    }

    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Expression::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Parameters and literals; the values an equality can pin an attribute to
    pub fn is_constant(&self) -> bool {
        matches!(self, Expression::Parameter(_) | Expression::Literal(_))
    }

    /// Calls `f` for every path expression in this tree, including paths inside
    /// array index qualifiers and nested predicates
    pub fn for_each_path<'a>(&'a self, f: &mut dyn FnMut(&'a PathExpression)) {
        match self {
            Expression::Path(p) | Expression::ListIndex(p) | Expression::MapKey(p) => {
                for element in &p.elements {
                    if let PathElement::Array { index, .. } = element {
                        index.for_each_path(f);
                    }
                }
                f(p);
            }
            Expression::Parameter(_) | Expression::Literal(_) | Expression::Subquery(_) => {}
            Expression::Function(func) => {
                for arg in &func.arguments {
                    arg.for_each_path(f);
                }
                if let Some(filter) = &func.filter {
                    filter.for_each_path(f);
                }
                if let Some(window) = &func.window {
                    for expr in &window.partition_by {
                        expr.for_each_path(f);
                    }
                    for item in &window.order_by {
                        item.expression.for_each_path(f);
                    }
                }
            }
            Expression::Arithmetic { left, right, .. } => {
                left.for_each_path(f);
                right.for_each_path(f);
            }
            Expression::Case(case) => {
                for (when, then) in &case.when_clauses {
                    when.for_each_path(f);
                    then.for_each_path(f);
                }
                if let Some(default) = &case.default {
                    default.for_each_path(f);
                }
            }
        }
    }

    /// True when the expression contains an aggregate function call outside any
    /// window definition
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Function(func) => {
                (func.window.is_none() && function_registry::is_aggregate(&func.name))
                    || func.arguments.iter().any(|a| a.contains_aggregate())
            }
            Expression::Arithmetic { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expression::Case(case) => {
                case.when_clauses.iter().any(|(_, then)| then.contains_aggregate())
                    || case.default.as_ref().is_some_and(|d| d.contains_aggregate())
            }
            Expression::Path(_)
            | Expression::Parameter(_)
            | Expression::Literal(_)
            | Expression::ListIndex(_)
            | Expression::MapKey(_)
            | Expression::Subquery(_) => false,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_expression(&mut out, self, &SourceText);
        f.write_str(&out)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_predicate(&mut out, self, &SourceText);
        f.write_str(&out)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_folds_into_flag() {
        let p = Predicate::eq(Expression::path("o.id"), Expression::parameter("id"));
        assert_eq!(p.clone().negate().to_string(), "o.id <> :id");
        assert_eq!(p.clone().negate().negate(), p);
    }

    #[test]
    fn test_for_each_path_visits_index_paths_first() {
        let expr = parse_expression("o.items[o.customer.rank].price").unwrap();
        let mut seen = Vec::new();
        expr.for_each_path(&mut |p| seen.push(p.path_text()));
        assert_eq!(seen, vec!["o.customer.rank", "o.items[o.customer.rank].price"]);
    }

    #[test]
    fn test_contains_aggregate() {
        assert!(parse_expression("SUM(o.total) + 1").unwrap().contains_aggregate());
        assert!(!parse_expression("UPPER(o.number)").unwrap().contains_aggregate());
        assert!(!parse_expression("ROW_NUMBER() OVER (ORDER BY o.id)")
            .unwrap()
            .contains_aggregate());
    }

    #[test]
    fn test_constant_detection() {
        assert!(Expression::parameter("p").is_constant());
        assert!(Expression::number(3).is_constant());
        assert!(!Expression::path("o.id").is_constant());
    }
}
