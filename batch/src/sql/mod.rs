//! SQL text rendering.
//!
//! Statements are rendered as plain text with values inlined, the way batched statements are sent
//! to sharding proxies that route on a leading hint comment. Identifiers of tables are enclosed in
//! backticks; values are quoted according to their [`crate::types::FieldType`].

mod delete;
mod escape;
mod insert;
mod select;

pub use delete::*;
pub use escape::*;
pub use insert::*;
pub use select::*;

/// Encloses an identifier in backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Prepends `hint` and a space to `statement` when a hint is present.
pub(crate) fn with_hint(hint: Option<&str>, statement: String) -> String {
    match hint {
        Some(hint) if !hint.is_empty() => format!("{hint} {statement}"),
        _ => statement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_backticked() {
        assert_eq!(quote_identifier("orders"), "`orders`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn hint_is_optional() {
        assert_eq!(with_hint(None, "SELECT 1;".to_string()), "SELECT 1;");
        assert_eq!(
            with_hint(Some("/*+ x */"), "SELECT 1;".to_string()),
            "/*+ x */ SELECT 1;"
        );
    }
}
