/// Function classification registry
///
/// Maps function names to the properties the planner cares about: whether a call
/// aggregates rows, and how its result relates to its arguments for uniqueness.
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// COUNT, SUM, AVG, ...
    Aggregate,
    /// MIN/MAX: aggregates whose result is one of the input values
    ValuePreservingAggregate,
    /// COALESCE/NULLIF: the result is the first argument wherever it is non-null
    FirstArgument,
    /// ROW_NUMBER: unique per row unless partitioned or filtered
    RowNumbering,
    /// RANK, DENSE_RANK, LAG, ...: window-only functions with ties
    Window,
    Scalar,
}

/// Classify a function by name (case-insensitive). Unknown functions are scalar.
pub fn function_kind(name: &str) -> FunctionKind {
    let upper = name.to_uppercase();
    FUNCTION_KINDS
        .get(upper.as_str())
        .copied()
        .unwrap_or(FunctionKind::Scalar)
}

pub fn is_aggregate(name: &str) -> bool {
    matches!(
        function_kind(name),
        FunctionKind::Aggregate | FunctionKind::ValuePreservingAggregate
    )
}

// Static function classification table
lazy_static::lazy_static! {
    static ref FUNCTION_KINDS: HashMap<&'static str, FunctionKind> = {
        let mut m = HashMap::new();

        // ===== AGGREGATES =====
        for name in ["COUNT", "SUM", "AVG", "STDDEV", "VARIANCE", "STRING_AGG", "LISTAGG",
                     "GROUP_CONCAT", "ARRAY_AGG", "EVERY", "BOOL_AND", "BOOL_OR"] {
            m.insert(name, FunctionKind::Aggregate);
        }
        m.insert("MIN", FunctionKind::ValuePreservingAggregate);
        m.insert("MAX", FunctionKind::ValuePreservingAggregate);

        // ===== NULL HANDLING =====
        m.insert("COALESCE", FunctionKind::FirstArgument);
        m.insert("NULLIF", FunctionKind::FirstArgument);

        // ===== WINDOW FUNCTIONS =====
        m.insert("ROW_NUMBER", FunctionKind::RowNumbering);
        for name in ["RANK", "DENSE_RANK", "PERCENT_RANK", "CUME_DIST", "NTILE", "LAG", "LEAD",
                     "FIRST_VALUE", "LAST_VALUE", "NTH_VALUE"] {
            m.insert(name, FunctionKind::Window);
        }

        m
    };
}
