//! Positional arguments for dynamically assembled statements
//!
//! Both dialects accept `$N` placeholders, so statements are built with
//! numbered parameters and the values are bound in push order.

use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Text(String),
    Int(i64),
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

#[derive(Debug, Default)]
pub(crate) struct SqlArgs {
    args: Vec<Arg>,
}

impl SqlArgs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `value` and return its placeholder
    pub(crate) fn push(&mut self, value: impl Into<Arg>) -> String {
        self.args.push(value.into());
        format!("${}", self.args.len())
    }

    /// Record every value and return a comma-separated placeholder list
    pub(crate) fn push_list<I, T>(&mut self, values: I) -> String
    where
        I: IntoIterator<Item = T>,
        T: Into<Arg>,
    {
        values
            .into_iter()
            .map(|value| self.push(value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn len(&self) -> usize {
        self.args.len()
    }

    pub(crate) fn bind<'q>(
        self,
        mut query: Query<'q, Any, AnyArguments<'q>>,
    ) -> Query<'q, Any, AnyArguments<'q>> {
        for arg in self.args {
            query = match arg {
                Arg::Text(value) => query.bind(value),
                Arg::Int(value) => query.bind(value),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_numbered_in_push_order() {
        let mut args = SqlArgs::new();
        assert_eq!(args.push("a"), "$1");
        assert_eq!(args.push(5i64), "$2");
        assert_eq!(args.push_list(["x", "y", "z"]), "$3, $4, $5");
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn test_empty_list() {
        let mut args = SqlArgs::new();
        assert_eq!(args.push_list(Vec::<String>::new()), "");
        assert_eq!(args.len(), 0);
    }
}
