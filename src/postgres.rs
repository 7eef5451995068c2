//! PostgreSQL identifier validation and error classification.
//!
//! Identifier validation is the first line of defense wherever table,
//! column, or function names are composed into DDL/DML by string
//! substitution. It is deliberately conservative: names must look like
//! plain PostgreSQL identifiers and must not collide with reserved
//! keywords. It is NOT an exhaustive SQL-injection guard; callers remain
//! responsible for never feeding untrusted input into identifier
//! positions.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use sqlx::PgPool;
use thiserror::Error;

/// Raised when a table or column name fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct InvalidTableOrColumnName {
    message: String,
}

impl InvalidTableOrColumnName {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Reserved names that cannot be used as column, table, or index names.
///
/// Incorporates PostgreSQL data type names, keywords marked reserved in the
/// PostgreSQL column of the SQL Key Words appendix, and keywords marked
/// reserved by SQL:2023, SQL:2016, or SQL-92. `TIMESTAMP` is intentionally
/// absent (the event store uses it as a column name). Cross-reference the
/// server version in use before relying on this list for anything beyond
/// naming hygiene.
pub static RESERVED_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    RESERVED_NAME_LIST.iter().copied().collect()
});

const RESERVED_NAME_LIST: &[&str] = &[
    // Data types ("Table 8.1. Data Types"), excluding TIMESTAMP
    "BIGINT", "INT8", "BIGSERIAL", "SERIAL8", "BIT", "VARBIT", "BOOLEAN", "BOOL",
    "BOX", "BYTEA", "CHARACTER", "CHAR", "VARYING", "VARCHAR", "CIDR",
    "CIRCLE", "DATE", "DOUBLE", "PRECISION", "FLOAT8", "INET", "INTEGER", "INT", "INT4",
    "INTERVAL", "JSON", "JSONB", "LINE", "LSEG", "MACADDR", "MACADDR8", "MONEY",
    "NUMERIC", "DECIMAL", "PATH", "PG_LSN", "POINT", "POLYGON", "REAL", "FLOAT4",
    "SMALLINT", "INT2", "SMALLSERIAL", "SERIAL2", "SERIAL", "SERIAL4", "TEXT",
    "TIME", "TIMETZ", "TIMESTAMPTZ", "TSQUERY", "TSVECTOR",
    "TXID_SNAPSHOT", "UUID", "XML",
    // Keywords marked reserved in the PostgreSQL column of the
    // SQL Key Words appendix
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC",
    "AUTHORIZATION", "BINARY", "BOTH", "CASE", "CAST", "CHECK", "COLLATE",
    "COLLATION", "COLUMN", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_CATALOG",
    "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_SCHEMA", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER",
    "DEFAULT", "DEFERRABLE", "DESC", "DISTINCT", "DO", "ELSE", "END", "EXCEPT",
    "FALSE", "FETCH", "FOR", "FOREIGN", "FREEZE", "FROM", "FULL", "GRANT", "GROUP",
    "HAVING", "ILIKE", "IN", "INITIALLY", "INNER", "INTERSECT", "INTO", "IS",
    "ISNULL", "JOIN", "LEADING", "LEFT", "LIKE", "LIMIT", "LOCALTIME", "LOCALTIMESTAMP",
    "NATURAL", "NOT", "NOTNULL", "NULL", "OFFSET", "ON", "ONLY", "OR", "ORDER",
    "OUTER", "OVERLAPS", "PLACING", "PRIMARY", "REFERENCES", "RETURNING", "RIGHT",
    "SELECT", "SESSION_USER", "SIMILAR", "SOME", "SYMMETRIC", "TABLE", "THEN",
    "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER", "USING", "VARIADIC",
    "VERBOSE", "WHEN", "WHERE", "WINDOW", "WITH",
    // Additional
    "DROP", "EXISTS", "EXPLAIN",
    "CLOB", "BLOB", "NBLOB", "NCHAR",
    "SAVEPOINT", "TIMESTAMPZ",
    "VACUUM", "VIEW",
    // Keywords marked reserved by the SQL:2023, SQL:2016, or SQL-92 columns
    "ABS", "ALLOCATE", "ALTER", "ARE", "ASENSITIVE", "AT", "ATOMIC", "BEGIN",
    "BETWEEN", "CALL", "CALLED", "CEIL", "CEILING", "CLOSE", "COALESCE", "COMMIT",
    "CONNECT", "CONNECTION", "CONVERT", "CORR", "CORRESPONDING", "COUNT", "COVAR_POP",
    "COVAR_SAMP", "CUBE", "CUME_DIST", "CURRENT", "CURRENT_DEFAULT_TRANSFORM_GROUP",
    "CURRENT_PATH", "CURRENT_ROW", "CURRENT_TRANSFORM_GROUP_FOR_TYPE", "CURSOR", "CYCLE",
    "DAY", "DEALLOCATE", "DECLARE", "DELETE", "DENSE_RANK", "DEREF", "DESCRIBE",
    "DETERMINISTIC", "DISCONNECT", "END-EXEC", "ESCAPE", "EVERY", "EXEC", "EXCEPTION", "EXECUTE",
    "EXIT", "EXP", "EXTERNAL", "EXTRACT", "FILTER", "FIRST", "FLOOR", "FOUND",
    "FUNCTION", "FUSION", "GET", "GLOBAL", "GROUPING", "HOLD", "HOUR",
    "IDENTITY", "IMMEDIATE", "INDICATOR", "INOUT", "INPUT", "INSENSITIVE", "INSERT",
    "KEY", "LAG", "LANGUAGE", "LARGE", "LAST", "LATERAL", "LEAD",
    "LEVEL", "LOCAL", "MATCH", "MAX", "MEMBER", "MERGE", "METHOD", "MIN", "MINUTE",
    "MOD", "MODIFIES", "MODULE", "MONTH", "MULTISET", "NCLOB", "NEW", "NO", "NONE",
    "NORMALIZE", "NULLIF", "OBJECT", "OCCURRENCES_REGEX", "OCTETS", "OF", "OLD",
    "OPEN", "OPERATION", "OPTIONS", "ORDINALITY", "OUT", "OUTPUT", "OVER", "OVERLAY",
    "PAD", "PARAMETER", "PARTITION", "PERCENT", "PERCENT_RANK", "PERCENTILE_CONT",
    "PERCENTILE_DISC", "POSITION", "POWER", "PRECEDING", "PREPARE",
    "PROCEDURE", "RANGE", "RANK", "READS", "RECURSIVE", "REF", "REFERENCING",
    "REGR_AVGX", "REGR_AVGY", "REGR_COUNT", "REGR_INTERCEPT", "REGR_R2", "REGR_SLOPE",
    "REGR_SXX", "REGR_SXY", "REGR_SYY", "RELATIVE", "RELEASE", "REPEAT", "RESIGNAL",
    "RESTRICT", "RESULT", "RETURN", "RETURNS", "REVOKE", "ROLE", "ROLLUP", "ROW",
    "ROW_NUMBER", "ROWS", "SCOPE", "SCROLL", "SEARCH", "SECOND", "SECTION", "SENSITIVE",
    "SET", "SIGNAL", "SPECIFIC", "SPECIFICTYPE", "SQL", "SQLEXCEPTION",
    "SQLSTATE", "SQLWARNING", "SQRT", "STACKED", "START", "STATIC", "STDDEV_POP",
    "STDDEV_SAMP", "SUBSTRING", "SUM", "SYSTEM", "SYSTEM_USER", "TABLESAMPLE",
    "TIMEZONE_HOUR", "TIMEZONE_MINUTE", "TRANSLATE",
    "TRANSLATE_REGEX", "TRANSLATION", "TREAT", "TRIGGER", "TRIM", "UESCAPE",
    "UNBOUNDED", "UNKNOWN", "UNNEST", "UNTIL", "UPDATE", "VALUE", "VALUES",
    "VAR_POP", "VAR_SAMP", "VARBINARY", "WIDTH_BUCKET", "WITHIN", "WITHOUT",
    "WORK", "WRITE", "XMLATTRIBUTES", "XMLBINARY", "XMLCAST", "XMLCOMMENT",
    "XMLCONCAT", "XMLELEMENT", "XMLEXISTS", "XMLFOREST", "XMLITERATE", "XMLNAMESPACES",
    "XMLPARSE", "XMLPI", "XMLQUERY", "XMLROOT", "XMLSCHEMA", "XMLSERIALIZE", "XMLTABLE",
    "YEAR", "ZONE",
];

/// Maximum identifier length PostgreSQL considers before truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Whether `s` looks like a plain PostgreSQL identifier: a letter or
/// underscore followed by letters, digits, or underscores.
fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_reserved(s: &str) -> bool {
    RESERVED_NAMES.contains(s.trim().to_ascii_uppercase().as_str())
}

/// Validates a table or column name against PostgreSQL naming conventions
/// and the reserved-keyword set.
///
/// A name that passes is safe to inline into DDL/DML built by string
/// substitution; a name that fails must never be passed through. `context`,
/// when given, is included in the error message to point at the offending
/// configuration.
pub fn check_is_valid_table_or_column_name(
    name: &str,
    context: Option<&str>,
) -> Result<(), InvalidTableOrColumnName> {
    if name.trim().is_empty() {
        return Err(InvalidTableOrColumnName::new(
            "Table or column name cannot be empty.",
        ));
    }
    let in_context = context
        .map(|c| format!(" in context: {c}"))
        .unwrap_or_default();
    if is_reserved(name) {
        return Err(InvalidTableOrColumnName::new(format!(
            "The name '{name}'{in_context} is a reserved keyword and cannot be used as a table or column name."
        )));
    }
    if !is_plain_identifier(name) {
        return Err(InvalidTableOrColumnName::new(format!(
            "Invalid table or column name: '{name}'{in_context}. Names must start with a letter or underscore, followed by letters, digits, or underscores."
        )));
    }
    Ok(())
}

/// Whether `function_name` is a valid SQL function name, either unqualified
/// (`my_function`) or schema-qualified (`my_schema.my_function`).
///
/// Each part must be a plain identifier of at most 63 characters and must
/// not be a reserved keyword.
pub fn is_valid_function_name(function_name: &str) -> bool {
    if function_name.trim().is_empty() {
        return false;
    }
    match function_name.split_once('.') {
        Some((schema, name)) => {
            if name.contains('.') {
                return false;
            }
            [schema, name].iter().all(|part| {
                part.len() <= MAX_IDENTIFIER_LEN && is_plain_identifier(part) && !is_reserved(part)
            })
        }
        None => {
            function_name.len() <= MAX_IDENTIFIER_LEN
                && is_plain_identifier(function_name)
                && !is_reserved(function_name)
        }
    }
}

/// Whether the given extension is installed in the connected database.
pub async fn is_extension_available(pool: &PgPool, extension: &str) -> sqlx::Result<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT exists(SELECT 1 FROM pg_extension WHERE extname = $1)",
    )
    .bind(extension)
    .fetch_one(pool)
    .await
}

/// The major version of the connected PostgreSQL server (13, 14, 15, ...).
pub async fn server_major_version(pool: &PgPool) -> sqlx::Result<i32> {
    // version() returns something like "PostgreSQL 16.3 on x86_64..."
    sqlx::query_scalar::<_, i32>(
        "SELECT (substring(version() from 'PostgreSQL ([0-9]+)'))::int",
    )
    .fetch_one(pool)
    .await
}

/// Whether the error indicates an extension that is installed but not
/// listed in `shared_preload_libraries`.
pub fn is_extension_not_loaded_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .message()
            .contains(r#"must be loaded via "shared_preload_libraries""#),
        _ => false,
    }
}

/// Whether the error is a connection/IO-class fault rather than a logical
/// one. IO-class faults during purge/unschedule paths are logged at DEBUG;
/// everything else at WARN.
pub fn is_io_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["orders", "order_items", "_private", "t1", "createdAt"] {
            assert!(
                check_is_valid_table_or_column_name(name, None).is_ok(),
                "{name} should be accepted"
            );
        }
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(check_is_valid_table_or_column_name("", None).is_err());
        assert!(check_is_valid_table_or_column_name("   ", None).is_err());
    }

    #[test]
    fn rejects_reserved_keywords_case_insensitively() {
        for name in ["select", "SELECT", "Select", "table", "user", "jsonb"] {
            assert!(
                check_is_valid_table_or_column_name(name, None).is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn timestamp_is_deliberately_not_reserved() {
        assert!(check_is_valid_table_or_column_name("timestamp", None).is_ok());
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["1starts_with_digit", "has space", "has-dash", "a;drop", "x'y"] {
            assert!(
                check_is_valid_table_or_column_name(name, None).is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn error_message_includes_context() {
        let err = check_is_valid_table_or_column_name("select", Some("ttl table")).unwrap_err();
        assert!(err.to_string().contains("ttl table"));
    }

    #[test]
    fn validates_unqualified_function_names() {
        assert!(is_valid_function_name("cleanup_expired_rows"));
        assert!(is_valid_function_name("_fn"));
        assert!(!is_valid_function_name(""));
        assert!(!is_valid_function_name("   "));
        assert!(!is_valid_function_name("1fn"));
        assert!(!is_valid_function_name("fn()"));
        assert!(!is_valid_function_name("select"));
        assert!(!is_valid_function_name(&"f".repeat(64)));
        assert!(is_valid_function_name(&"f".repeat(63)));
    }

    #[test]
    fn validates_qualified_function_names() {
        assert!(is_valid_function_name("my_schema.my_function"));
        assert!(!is_valid_function_name("my_schema.my.function"));
        assert!(!is_valid_function_name(".fn"));
        assert!(!is_valid_function_name("schema."));
        assert!(!is_valid_function_name("select.fn"));
        assert!(!is_valid_function_name("schema.select"));
        assert!(!is_valid_function_name(&format!("{}.fn", "s".repeat(64))));
    }

    #[test]
    fn extension_not_loaded_requires_database_error() {
        assert!(!is_extension_not_loaded_error(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn classifies_io_errors() {
        assert!(is_io_error(&sqlx::Error::PoolTimedOut));
        assert!(is_io_error(&sqlx::Error::PoolClosed));
        assert!(is_io_error(&sqlx::Error::WorkerCrashed));
        assert!(!is_io_error(&sqlx::Error::RowNotFound));
    }

    proptest! {
        /// Any well-formed, non-reserved identifier is accepted.
        #[test]
        fn well_formed_non_reserved_identifiers_are_accepted(
            name in "[A-Za-z_][A-Za-z0-9_]{0,30}"
        ) {
            prop_assume!(!is_reserved(&name));
            prop_assert!(check_is_valid_table_or_column_name(&name, None).is_ok());
        }

        /// Any well-formed identifier that IS reserved is rejected, in any
        /// casing.
        #[test]
        fn reserved_identifiers_are_rejected(idx in 0usize..RESERVED_NAME_LIST.len(), upper in any::<bool>()) {
            let word = RESERVED_NAME_LIST[idx];
            // END-EXEC is reserved but not a plain identifier; both checks
            // must still reject it.
            let name = if upper { word.to_string() } else { word.to_ascii_lowercase() };
            prop_assert!(check_is_valid_table_or_column_name(&name, None).is_err());
            prop_assert!(!is_valid_function_name(&name));
        }

        /// A qualified function name is valid iff both halves are valid on
        /// their own.
        #[test]
        fn qualified_function_name_is_conjunction_of_halves(
            schema in "[A-Za-z_][A-Za-z0-9_]{0,20}",
            name in "[A-Za-z_][A-Za-z0-9_]{0,20}",
        ) {
            let qualified = format!("{schema}.{name}");
            prop_assert_eq!(
                is_valid_function_name(&qualified),
                is_valid_function_name(&schema) && is_valid_function_name(&name)
            );
        }
    }
}
