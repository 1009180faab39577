//! Turns parsed CLI arguments into the values `main` needs to start a node.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cli::{Recipe, RunArgs};

pub struct GossipConfig {
    pub bind: String,
    pub seeds: Vec<String>,
    pub phi_threshold: f64,
    pub recipe: Recipe,
    pub priority: i64,
    pub attrs: Vec<(String, Value)>,
}

impl GossipConfig {
    pub fn from_args(args: RunArgs) -> Result<Self> {
        let attrs = args
            .attrs
            .iter()
            .map(|entry| parse_attr(entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(GossipConfig {
            bind: args.bind,
            seeds: args.seeds,
            phi_threshold: args.phi_threshold,
            recipe: args.recipe,
            priority: args.priority,
            attrs,
        })
    }
}

fn parse_attr(entry: &str) -> Result<(String, Value)> {
    let (key, raw_value) = entry
        .split_once('=')
        .with_context(|| format!("attribute `{entry}` is not in `key=value` form"))?;
    let value = serde_json::from_str(raw_value).unwrap_or_else(|_| Value::from(raw_value));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_and_string_values() {
        assert_eq!(parse_attr("role=\"primary\"").unwrap(), ("role".to_string(), Value::from("primary")));
        assert_eq!(parse_attr("weight=3").unwrap(), ("weight".to_string(), Value::from(3)));
        assert_eq!(parse_attr("region=us-east").unwrap(), ("region".to_string(), Value::from("us-east")));
    }

    #[test]
    fn rejects_missing_equals() {
        assert!(parse_attr("not-an-attr").is_err());
    }
}
