use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::sql::{push_quoted, quote_identifier, with_hint};
use crate::types::PrimaryKey;

/// Appends the primary key values of `row` as `v1,v2` (without parentheses).
///
/// Quoted key types are escaped. Fails when the row is shorter than a key's ordinal position.
pub fn append_pk_values(buffer: &mut String, keys: &[PrimaryKey], row: &[String]) -> BatchResult<()> {
    for (position, key) in keys.iter().enumerate() {
        let Some(value) = row.get(key.value_index()) else {
            bail!(
                ErrorKind::InvalidData,
                "Row has no value for a primary key column",
                format!(
                    "key `{}` is at position {} but the row has {} fields",
                    key.name,
                    key.ordinal_position,
                    row.len()
                )
            );
        };

        if position > 0 {
            buffer.push(',');
        }

        if key.field_type.needs_quote() {
            push_quoted(buffer, value, true);
        } else {
            buffer.push_str(value);
        }
    }

    Ok(())
}

/// Joins the key column names with `,`.
pub fn pk_column_list(keys: &[PrimaryKey]) -> String {
    keys.iter()
        .map(|key| key.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders `DELETE FROM `t` WHERE pk1=v1 AND pk2=v2[ AND where];` for one row.
pub fn render_single_delete(
    hint: Option<&str>,
    table: &str,
    keys: &[PrimaryKey],
    row: &[String],
    where_condition: Option<&str>,
) -> BatchResult<String> {
    let mut conditions = String::new();
    for (position, key) in keys.iter().enumerate() {
        if position > 0 {
            conditions.push_str(" AND ");
        }
        conditions.push_str(&key.name);
        conditions.push('=');
        append_pk_values(&mut conditions, std::slice::from_ref(key), row)?;
    }

    let mut statement = format!("DELETE FROM {} WHERE {conditions}", quote_identifier(table));
    push_where(&mut statement, where_condition);
    statement.push(';');

    Ok(with_hint(hint, statement))
}

/// Renders `DELETE FROM `t` WHERE (pk1,pk2) IN (<tuples>)[ AND where];`.
///
/// `tuples` is the already accumulated `(..),(..)` list without a trailing separator.
pub fn render_delete_in(
    hint: Option<&str>,
    table: &str,
    keys: &[PrimaryKey],
    tuples: &str,
    where_condition: Option<&str>,
) -> String {
    let mut statement = format!(
        "DELETE FROM {} WHERE ({}) IN ({tuples})",
        quote_identifier(table),
        pk_column_list(keys)
    );
    push_where(&mut statement, where_condition);
    statement.push(';');

    with_hint(hint, statement)
}

fn push_where(statement: &mut String, where_condition: Option<&str>) {
    if let Some(condition) = where_condition {
        statement.push_str(" AND ");
        statement.push_str(condition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn keys() -> Vec<PrimaryKey> {
        vec![
            PrimaryKey::new("id", FieldType::Int, 1),
            PrimaryKey::new("region", FieldType::String, 3),
        ]
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn pk_values_are_typed() {
        let mut buffer = String::new();
        append_pk_values(&mut buffer, &keys(), &row(&["7", "x", "o'neil"])).unwrap();

        assert_eq!(buffer, "7,'o\\'neil'");
    }

    #[test]
    fn short_rows_are_rejected() {
        let mut buffer = String::new();
        let err = append_pk_values(&mut buffer, &keys(), &row(&["7"])).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn single_delete_joins_conditions() {
        let sql = render_single_delete(None, "orders", &keys(), &row(&["7", "x", "eu"]), None)
            .unwrap();

        assert_eq!(sql, "DELETE FROM `orders` WHERE id=7 AND region='eu';");
    }

    #[test]
    fn delete_in_appends_where_and_hint() {
        let sql = render_delete_in(
            Some("/!TDDL:node='G1'*/"),
            "orders_01",
            &keys()[..1],
            "(1),(2)",
            Some("status = 'done'"),
        );

        assert_eq!(
            sql,
            "/!TDDL:node='G1'*/ DELETE FROM `orders_01` WHERE (id) IN ((1),(2)) AND status = 'done';"
        );
    }
}
