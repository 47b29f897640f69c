use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::sql::{push_quoted, quote_identifier, with_hint};
use crate::types::{FieldMetaInfo, is_null};

/// Appends `(v1,v2,...)` for one row.
///
/// `NULL` markers become `NULL`. Empty values of unquoted types become `NULL` as well, since an
/// empty string is not a valid number. The row must have exactly one value per field.
pub fn append_insert_values(
    buffer: &mut String,
    fields: &[FieldMetaInfo],
    row: &[String],
    sql_escape: bool,
) -> BatchResult<()> {
    if fields.len() != row.len() {
        bail!(
            ErrorKind::InvalidData,
            "Row does not match the table's column count",
            format!("required {} fields, got {}", fields.len(), row.len())
        );
    }

    buffer.push('(');
    for (position, (field, value)) in fields.iter().zip(row).enumerate() {
        if position > 0 {
            buffer.push(',');
        }

        if is_null(value) || (value.is_empty() && !field.field_type.needs_quote()) {
            buffer.push_str("NULL");
        } else if field.field_type.needs_quote() {
            push_quoted(buffer, value, sql_escape);
        } else {
            buffer.push_str(value);
        }
    }
    buffer.push(')');

    Ok(())
}

/// Renders `[hint ]INSERT [IGNORE] INTO `t` [(cols) ]VALUES <values>;`.
pub fn render_insert(
    hint: Option<&str>,
    table: &str,
    columns: &[String],
    values: &str,
    ignore: bool,
) -> String {
    let mut statement = String::with_capacity(values.len() + table.len() + 32);
    statement.push_str("INSERT ");
    if ignore {
        statement.push_str("IGNORE ");
    }
    statement.push_str("INTO ");
    statement.push_str(&quote_identifier(table));
    statement.push(' ');
    if !columns.is_empty() {
        let columns: Vec<_> = columns.iter().map(|c| quote_identifier(c)).collect();
        statement.push('(');
        statement.push_str(&columns.join(","));
        statement.push_str(") ");
    }
    statement.push_str("VALUES ");
    statement.push_str(values);
    statement.push(';');

    with_hint(hint, statement)
}
