//! Text rendering of expression and predicate trees.
//!
//! The only thing that differs between printing source text and printing the final
//! query is how path expressions come out, so that is the single hook.

use super::{
    BooleanOperator, CaseExpression, Expression, FunctionExpression, Literal, OrderByItem,
    PathElement, PathExpression, Predicate,
};

pub trait PathStyle {
    /// Write a path expression (also used for the argument of `KEY`/`INDEX`)
    fn write_path(&self, out: &mut String, path: &PathExpression);
}

/// Prints paths exactly as they were written
pub struct SourceText;

impl PathStyle for SourceText {
    fn write_path(&self, out: &mut String, path: &PathExpression) {
        write_path_elements(out, path, self);
    }
}

pub fn write_path_elements<S: PathStyle + ?Sized>(
    out: &mut String,
    path: &PathExpression,
    style: &S,
) {
    for (i, element) in path.elements.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        match element {
            PathElement::Property(name) => out.push_str(name),
            PathElement::Array { base, index } => {
                out.push_str(base);
                out.push('[');
                write_expression(out, index, style);
                out.push(']');
            }
        }
    }
}

pub fn write_expression<S: PathStyle + ?Sized>(out: &mut String, expr: &Expression, style: &S) {
    match expr {
        Expression::Path(p) => style.write_path(out, p),
        Expression::Parameter(name) => {
            out.push(':');
            out.push_str(name);
        }
        Expression::Literal(literal) => write_literal(out, literal),
        Expression::Function(func) => write_function(out, func, style),
        Expression::ListIndex(p) => {
            out.push_str("INDEX(");
            style.write_path(out, p);
            out.push(')');
        }
        Expression::MapKey(p) => {
            out.push_str("KEY(");
            style.write_path(out, p);
            out.push(')');
        }
        Expression::Arithmetic {
            operator,
            left,
            right,
        } => {
            write_operand(out, left, style);
            out.push(' ');
            out.push_str(operator.symbol());
            out.push(' ');
            write_operand(out, right, style);
        }
        Expression::Case(case) => write_case(out, case, style),
        Expression::Subquery(subquery) => {
            out.push('(');
            out.push_str(&subquery.text);
            out.push(')');
        }
    }
}

fn write_operand<S: PathStyle + ?Sized>(out: &mut String, expr: &Expression, style: &S) {
    if matches!(expr, Expression::Arithmetic { .. }) {
        out.push('(');
        write_expression(out, expr, style);
        out.push(')');
    } else {
        write_expression(out, expr, style);
    }
}

fn write_literal(out: &mut String, literal: &Literal) {
    match literal {
        Literal::Numeric(n) => out.push_str(n),
        Literal::String(s) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
        Literal::Boolean(true) => out.push_str("TRUE"),
        Literal::Boolean(false) => out.push_str("FALSE"),
        Literal::Null => out.push_str("NULL"),
    }
}

fn write_function<S: PathStyle + ?Sized>(out: &mut String, func: &FunctionExpression, style: &S) {
    out.push_str(&func.name);
    out.push('(');
    if func.distinct {
        out.push_str("DISTINCT ");
    }
    write_list(out, &func.arguments, style);
    out.push(')');
    if let Some(filter) = &func.filter {
        out.push_str(" FILTER (WHERE ");
        write_predicate(out, filter, style);
        out.push(')');
    }
    if let Some(window) = &func.window {
        out.push_str(" OVER (");
        if !window.partition_by.is_empty() {
            out.push_str("PARTITION BY ");
            write_list(out, &window.partition_by, style);
            if !window.order_by.is_empty() {
                out.push(' ');
            }
        }
        if !window.order_by.is_empty() {
            out.push_str("ORDER BY ");
            write_order_by_items(out, &window.order_by, style);
        }
        out.push(')');
    }
}

fn write_case<S: PathStyle + ?Sized>(out: &mut String, case: &CaseExpression, style: &S) {
    out.push_str("CASE");
    for (when, then) in &case.when_clauses {
        out.push_str(" WHEN ");
        write_predicate(out, when, style);
        out.push_str(" THEN ");
        write_expression(out, then, style);
    }
    if let Some(default) = &case.default {
        out.push_str(" ELSE ");
        write_expression(out, default, style);
    }
    out.push_str(" END");
}

pub fn write_list<S: PathStyle + ?Sized>(out: &mut String, exprs: &[Expression], style: &S) {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expression(out, expr, style);
    }
}

pub fn write_order_by_items<S: PathStyle + ?Sized>(
    out: &mut String,
    items: &[OrderByItem],
    style: &S,
) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expression(out, &item.expression, style);
        out.push_str(if item.ascending { " ASC" } else { " DESC" });
        match item.nulls_first {
            Some(true) => out.push_str(" NULLS FIRST"),
            Some(false) => out.push_str(" NULLS LAST"),
            None => {}
        }
    }
}

pub fn write_predicate<S: PathStyle + ?Sized>(out: &mut String, predicate: &Predicate, style: &S) {
    match predicate {
        Predicate::Compound(compound) => {
            if compound.negated {
                out.push_str("NOT (");
            }
            let separator = match compound.operator {
                BooleanOperator::And => " AND ",
                BooleanOperator::Or => " OR ",
            };
            for (i, child) in compound.children.iter().enumerate() {
                if i > 0 {
                    out.push_str(separator);
                }
                let nested = matches!(child, Predicate::Compound(c) if !c.negated && c.children.len() > 1);
                if nested {
                    out.push('(');
                }
                write_predicate(out, child, style);
                if nested {
                    out.push(')');
                }
            }
            if compound.negated {
                out.push(')');
            }
        }
        Predicate::Comparison {
            operator,
            left,
            right,
            negated,
        } => {
            let inverted = *negated && *operator != super::ComparisonOperator::Eq;
            if inverted {
                out.push_str("NOT ");
            }
            write_expression(out, left, style);
            out.push(' ');
            out.push_str(operator.symbol(*negated));
            out.push(' ');
            write_expression(out, right, style);
        }
        Predicate::In {
            left,
            right,
            negated,
        } => {
            write_expression(out, left, style);
            out.push_str(if *negated { " NOT IN (" } else { " IN (" });
            write_list(out, right, style);
            out.push(')');
        }
        Predicate::IsNull {
            expression,
            negated,
        } => {
            write_expression(out, expression, style);
            out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Predicate::IsEmpty {
            expression,
            negated,
        } => {
            write_expression(out, expression, style);
            out.push_str(if *negated { " IS NOT EMPTY" } else { " IS EMPTY" });
        }
        Predicate::Like {
            left,
            pattern,
            negated,
        } => {
            write_expression(out, left, style);
            out.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
            write_expression(out, pattern, style);
        }
        Predicate::Between {
            expression,
            lower,
            upper,
            negated,
        } => {
            write_expression(out, expression, style);
            out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
            write_expression(out, lower, style);
            out.push_str(" AND ");
            write_expression(out, upper, style);
        }
        Predicate::Exists { subquery, negated } => {
            out.push_str(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
            out.push_str(&subquery.text);
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse_predicate;

    #[test]
    fn test_nested_compound_parenthesized() {
        let p = parse_predicate("(o.id = 1 OR o.id = 2) AND o.number LIKE 'A%'").unwrap();
        assert_eq!(p.to_string(), "(o.id = 1 OR o.id = 2) AND o.number LIKE 'A%'");
    }

    #[test]
    fn test_negated_compound() {
        let p = parse_predicate("NOT (o.id = 1 AND o.total > 10)").unwrap();
        assert_eq!(p.to_string(), "NOT (o.id = 1 AND o.total > 10)");
    }

    #[test]
    fn test_string_literal_escaping() {
        let p = parse_predicate("o.number = 'it''s'").unwrap();
        assert_eq!(p.to_string(), "o.number = 'it''s'");
    }
}
