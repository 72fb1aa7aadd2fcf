use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionParseError {
    #[error("Unable to parse `{input}` near `{remaining}`")]
    Syntax { input: String, remaining: String },
    #[error("Unexpected trailing input `{remaining}` in `{input}`")]
    TrailingInput { input: String, remaining: String },
}
