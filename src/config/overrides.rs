use toml::Value;

use super::ConfigError;

/// Apply one `key.path=value` override to a parsed settings tree.
///
/// The value is read as a TOML literal (`16`, `1e-3`, `[1, 2]`, `true`,
/// `"text"`); anything that does not parse is kept as a bare string.
/// Missing intermediate tables are created.
pub fn apply_override(root: &mut Value, raw: &str) -> Result<(), ConfigError> {
    let fail = |reason: &str| ConfigError::Override {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };
    let (key, literal) = raw.split_once('=').ok_or_else(|| fail("expected key=value"))?;
    let segments: Vec<&str> = key.trim().split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(fail("empty key segment"));
    }
    let (leaf, parents) = segments
        .split_last()
        .ok_or_else(|| fail("missing key"))?;

    let mut table = root
        .as_table_mut()
        .ok_or_else(|| fail("settings root is not a table"))?;
    for segment in parents {
        let entry = table
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Default::default()));
        table = entry
            .as_table_mut()
            .ok_or_else(|| fail(&format!("`{segment}` is not a table")))?;
    }
    table.insert(leaf.to_string(), parse_literal(literal.trim()));
    Ok(())
}

fn parse_literal(literal: &str) -> Value {
    let wrapped = format!("value = {literal}");
    toml::from_str::<toml::Table>(&wrapped)
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| Value::String(literal.to_string()))
}
