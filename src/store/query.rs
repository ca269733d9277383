//! Row filters and select queries, rendered as PostgREST parameters

use std::fmt;

/// A row predicate understood by every data service
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    In(String, Vec<String>),
    Gte(String, String),
    Lte(String, String),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl fmt::Display) -> Self {
        Filter::Eq(column.to_string(), value.to_string())
    }

    pub fn is_in<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: fmt::Display,
    {
        Filter::In(
            column.to_string(),
            values.into_iter().map(|v| v.to_string()).collect(),
        )
    }

    pub fn gte(column: &str, value: impl fmt::Display) -> Self {
        Filter::Gte(column.to_string(), value.to_string())
    }

    pub fn lte(column: &str, value: impl fmt::Display) -> Self {
        Filter::Lte(column.to_string(), value.to_string())
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Render as a top-level `(key, value)` query pair
    ///
    /// Simple operators take the rest of the value literally, so only list
    /// members and nested filters are quoted.
    pub fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq(col, v) => (col.clone(), format!("eq.{}", v)),
            Filter::In(col, vs) => (col.clone(), format!("in.({})", quote_list(vs))),
            Filter::Gte(col, v) => (col.clone(), format!("gte.{}", v)),
            Filter::Lte(col, v) => (col.clone(), format!("lte.{}", v)),
            Filter::Or(fs) => ("or".to_string(), format!("({})", nested_list(fs))),
            Filter::And(fs) => ("and".to_string(), format!("({})", nested_list(fs))),
        }
    }

    /// Render in the dotted form used inside `or=(...)` / `and=(...)`
    fn to_nested(&self) -> String {
        match self {
            Filter::Eq(col, v) => format!("{}.eq.{}", col, quote(v)),
            Filter::In(col, vs) => format!("{}.in.({})", col, quote_list(vs)),
            Filter::Gte(col, v) => format!("{}.gte.{}", col, quote(v)),
            Filter::Lte(col, v) => format!("{}.lte.{}", col, quote(v)),
            Filter::Or(fs) => format!("or({})", nested_list(fs)),
            Filter::And(fs) => format!("and({})", nested_list(fs)),
        }
    }
}

fn nested_list(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::to_nested)
        .collect::<Vec<_>>()
        .join(",")
}

fn quote_list(values: &[String]) -> String {
    values.iter().map(|v| quote(v)).collect::<Vec<_>>().join(",")
}

/// PostgREST reserves `,.:()` inside lists; such values must be double-quoted
fn quote(value: &str) -> String {
    if value.chars().any(|c| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | ' ')) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// A select: columns, AND-ed filters and an optional ordering
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            direction,
        });
        self
    }

    /// All query pairs for a PostgREST GET
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some(order) = &self.order {
            let dir = match order.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_in_render_as_postgrest_operators() {
        assert_eq!(
            Filter::eq("owner_id", "u1").to_param(),
            ("owner_id".to_string(), "eq.u1".to_string())
        );
        assert_eq!(
            Filter::is_in("id", ["a", "b"]).to_param(),
            ("id".to_string(), "in.(a,b)".to_string())
        );
    }

    #[test]
    fn or_nests_dotted_filters() {
        let f = Filter::or(vec![
            Filter::eq("owner_id", "u1"),
            Filter::is_in("id", ["r2", "r3"]),
        ]);
        assert_eq!(
            f.to_param(),
            ("or".to_string(), "(owner_id.eq.u1,id.in.(r2,r3))".to_string())
        );
    }

    #[test]
    fn top_level_values_are_sent_raw() {
        let (_, v) = Filter::eq("email", "a.b@example.com").to_param();
        assert_eq!(v, "eq.a.b@example.com");
        let (_, v) = Filter::lte("note", "a, b").to_param();
        assert_eq!(v, "lte.a, b");
    }

    #[test]
    fn reserved_characters_are_quoted_inside_lists() {
        let (_, v) = Filter::is_in("email", ["a.b@example.com", "c@d"]).to_param();
        assert_eq!(v, "in.(\"a.b@example.com\",c@d)");

        let f = Filter::or(vec![
            Filter::eq("email", "a.b@example.com"),
            Filter::eq("owner_id", "u1"),
        ]);
        assert_eq!(f.to_param().1, "(email.eq.\"a.b@example.com\",owner_id.eq.u1)");
    }

    #[test]
    fn query_params_include_select_and_order() {
        let q = Query::new()
            .select("id,name")
            .filter(Filter::gte("spent_on", "2024-01-01"))
            .order_by("created_at", Direction::Desc);
        let params = q.to_params();
        assert_eq!(params[0], ("select".to_string(), "id,name".to_string()));
        assert_eq!(params[1], ("spent_on".to_string(), "gte.2024-01-01".to_string()));
        assert_eq!(params[2], ("order".to_string(), "created_at.desc".to_string()));
    }
}
