use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use criteria_planner::config::{self, PlannerConfig};
use criteria_planner::join_tree::JoinType;
use criteria_planner::schema_catalog::EntityMetamodel;
use criteria_planner::{BuilderError, CriteriaBuilder};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Text,
    Json,
}

/// Criteria Planner - render criteria queries against an entity schema
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML schema definition
    #[arg(long)]
    schema: String,

    /// Root entity of the query
    #[arg(long)]
    root: String,

    /// Alias of the root entity
    #[arg(long, default_value = "e")]
    alias: String,

    /// Explicit join as `path alias [inner|left|right]`, e.g. `o.items i left`
    #[arg(long = "join")]
    joins: Vec<String>,

    /// Select item, repeatable
    #[arg(long = "select")]
    select: Vec<String>,

    /// Where predicate, repeatable; all predicates are combined with AND
    #[arg(long = "where")]
    filters: Vec<String>,

    /// Order by item as `expr [ASC|DESC] [NULLS FIRST|LAST]`, repeatable
    #[arg(long = "order-by")]
    order_by: Vec<String>,

    /// Page as `first,max`
    #[arg(long)]
    page: Option<String>,

    /// Planner configuration file; replaces the planner flags below
    #[arg(long)]
    config: Option<String>,

    /// Read planner settings from CRITERIA_* environment variables (and `.env`)
    #[arg(long, conflicts_with = "config")]
    from_env: bool,

    /// Always join to-one associations for `a.owner.id`
    #[arg(long)]
    no_single_valued_id: bool,

    /// Do not derive GROUP BY items from the select list
    #[arg(long)]
    no_implicit_group_by: bool,

    /// Maximum join chain length below a root
    #[arg(long, default_value_t = 32)]
    max_join_depth: u32,

    /// Separator of generated aliases
    #[arg(long, default_value = "_")]
    alias_separator: String,

    /// Render fetch joins without the FETCH keyword
    #[arg(long)]
    no_fetches: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = Output::Text)]
    output: Output,
}

impl From<&Cli> for config::CliConfig {
    fn from(cli: &Cli) -> Self {
        config::CliConfig {
            no_single_valued_id: cli.no_single_valued_id,
            no_implicit_group_by: cli.no_implicit_group_by,
            max_join_depth: cli.max_join_depth,
            alias_separator: cli.alias_separator.clone(),
            no_fetches: cli.no_fetches,
        }
    }
}

fn parse_join(text: &str) -> anyhow::Result<(String, String, JoinType)> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let join_type = match parts.get(2).map(|s| s.to_ascii_lowercase()).as_deref() {
        None | Some("inner") => JoinType::Inner,
        Some("left") => JoinType::Left,
        Some("right") => JoinType::Right,
        Some(other) => return Err(anyhow!("unknown join type `{}` in `{}`", other, text)),
    };
    match parts.as_slice() {
        [path, alias] | [path, alias, _] => Ok((path.to_string(), alias.to_string(), join_type)),
        _ => Err(anyhow!("expected `path alias [type]`, got `{}`", text)),
    }
}

fn parse_page(text: &str) -> anyhow::Result<(usize, usize)> {
    let (first, max) = text
        .split_once(',')
        .ok_or_else(|| anyhow!("expected `first,max`, got `{}`", text))?;
    Ok((
        first.trim().parse().context("invalid first result")?,
        max.trim().parse().context("invalid max results")?,
    ))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let planner_config = match &cli.config {
        Some(path) => PlannerConfig::from_yaml_file(path)?,
        None if cli.from_env => PlannerConfig::from_env()?,
        None => PlannerConfig::from_cli((&cli).into())?,
    };
    let catalog = EntityMetamodel::from_yaml_file(&cli.schema)
        .with_context(|| format!("failed to load schema {}", cli.schema))?;
    log::info!("Loaded schema from {}", cli.schema);

    let mut builder = CriteriaBuilder::new(Arc::new(catalog), Arc::new(planner_config));
    builder.from(&cli.root, &cli.alias)?;
    for text in &cli.joins {
        let (path, alias, join_type) = parse_join(text)?;
        builder.join(&path, &alias, join_type, false, true)?;
    }
    for item in &cli.select {
        builder.select(item)?;
    }
    for filter in &cli.filters {
        builder.where_(filter)?;
    }
    for item in &cli.order_by {
        builder.order_by_item(item)?;
    }
    if let Some(text) = &cli.page {
        let (first, max) = parse_page(text)?;
        builder.page(first, max);
    }

    let unique = builder.is_order_by_unique()?;
    log::info!("Order by items unique: {}", unique);
    let query = builder.query_string()?;
    let count = match builder.count_query_string() {
        Ok(count) => Some(count),
        Err(BuilderError::GroupedCount) => None,
        Err(e) => return Err(e.into()),
    };
    let ids = match &cli.page {
        Some(_) => Some(builder.id_query_string()?),
        None => None,
    };

    match cli.output {
        Output::Text => {
            println!("{}", query);
            if let Some(count) = count {
                println!("{}", count);
            }
            if let Some(ids) = ids {
                println!("{}", ids);
            }
            println!("unique ordering: {}", unique);
        }
        Output::Json => {
            let value = serde_json::json!({
                "query": query,
                "count_query": count,
                "id_query": ids,
                "order_by_unique": unique,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        let (path, alias, join_type) = parse_join("o.items i left").unwrap();
        assert_eq!(path, "o.items");
        assert_eq!(alias, "i");
        assert_eq!(join_type, JoinType::Left);
        assert_eq!(parse_join("o.customer c").unwrap().2, JoinType::Inner);
        assert!(parse_join("o.items").is_err());
        assert!(parse_join("o.items i sideways").is_err());
    }

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page("20, 10").unwrap(), (20, 10));
        assert!(parse_page("20").is_err());
        assert!(parse_page("a,10").is_err());
    }
}
