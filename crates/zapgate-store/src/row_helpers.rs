use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Decode a JSON text column into a typed value.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapgate_core::{SessionStatus, WebhookConfig};

    #[test]
    fn parse_enum_success() {
        let status: SessionStatus = parse_enum("connecting", "sessions", "status").unwrap();
        assert_eq!(status, SessionStatus::Connecting);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<SessionStatus, _> = parse_enum("INVALID", "sessions", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "sessions", column: "status", .. })
        ));
    }

    #[test]
    fn parse_json_typed() {
        let config: WebhookConfig =
            parse_json(r#"{"url":"http://hook","events":["Message"]}"#, "sessions", "webhook")
                .unwrap();
        assert_eq!(config.url.as_deref(), Some("http://hook"));
        assert_eq!(config.events, vec!["Message".to_string()]);
        assert!(config.mirror_url.is_none());
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<WebhookConfig, _> = parse_json("not valid json", "sessions", "webhook");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "sessions", column: "webhook", .. })
        ));
    }
}
