use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::expression::ExpressionParseError;
use crate::join_manager::errors::JoinError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuilderError {
    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Parse(#[from] ExpressionParseError),

    #[error("The order by items of the query builder are not guaranteed to produce unique tuples! Consider also ordering by the entity identifier!")]
    NonUniquePaginationKey,

    #[error("Pagination requires at least one order by item")]
    MissingOrderBy,

    #[error("The query has no root, call from() first")]
    MissingRoot,

    #[error("Count queries over grouped results are not supported")]
    GroupedCount,
}
