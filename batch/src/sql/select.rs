use crate::sql::{quote_identifier, with_hint};
use crate::types::FieldMetaInfo;

/// Server-side sort of an export query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub columns: Vec<String>,
    pub ascending: bool,
}

/// Renders `[hint ]SELECT `a`,`b` FROM `t`[ WHERE w][ ORDER BY c1,c2 ASC|DESC];`.
pub fn render_select(
    hint: Option<&str>,
    table: &str,
    fields: &[FieldMetaInfo],
    where_condition: Option<&str>,
    order_by: Option<&OrderBy>,
) -> String {
    let columns: Vec<_> = fields
        .iter()
        .map(|field| quote_identifier(&field.name))
        .collect();

    let mut statement = format!(
        "SELECT {} FROM {}",
        columns.join(","),
        quote_identifier(table)
    );

    if let Some(condition) = where_condition {
        statement.push_str(" WHERE ");
        statement.push_str(condition);
    }

    if let Some(order_by) = order_by.filter(|order_by| !order_by.columns.is_empty()) {
        statement.push_str(" ORDER BY ");
        statement.push_str(&order_by.columns.join(","));
        statement.push_str(if order_by.ascending { " ASC" } else { " DESC" });
    }

    statement.push(';');

    with_hint(hint, statement)
}

/// Renders `[hint ]SELECT COUNT(*) FROM `t`[ WHERE w];`.
pub fn render_count(hint: Option<&str>, table: &str, where_condition: Option<&str>) -> String {
    let mut statement = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
    if let Some(condition) = where_condition {
        statement.push_str(" WHERE ");
        statement.push_str(condition);
    }
    statement.push(';');

    with_hint(hint, statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn fields() -> Vec<FieldMetaInfo> {
        vec![
            FieldMetaInfo::new("id", FieldType::Int, 0),
            FieldMetaInfo::new("name", FieldType::String, 1),
        ]
    }

    #[test]
    fn plain_select() {
        assert_eq!(
            render_select(None, "orders", &fields(), None, None),
            "SELECT `id`,`name` FROM `orders`;"
        );
    }

    #[test]
    fn ordered_select_with_where_and_hint() {
        let order_by = OrderBy {
            columns: vec!["name".to_string(), "id".to_string()],
            ascending: false,
        };

        assert_eq!(
            render_select(
                Some("/!TDDL:node='G0'*/"),
                "orders_00",
                &fields(),
                Some("id > 10"),
                Some(&order_by)
            ),
            "/!TDDL:node='G0'*/ SELECT `id`,`name` FROM `orders_00` WHERE id > 10 ORDER BY name,id DESC;"
        );
    }

    #[test]
    fn count_query() {
        assert_eq!(
            render_count(None, "orders", Some("a = 1")),
            "SELECT COUNT(*) FROM `orders` WHERE a = 1;"
        );
    }
}
