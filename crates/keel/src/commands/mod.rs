//! Command handlers. Each module wraps one group of engine operations and
//! refreshes the summary after mutations.

pub mod admin;
pub mod claim;
pub mod comment;
pub mod completion;
pub mod create;
pub mod dep;
pub mod history;
pub mod init;
pub mod plan;
pub mod show;
pub mod types_cmd;
pub mod update;

use anyhow::{Result, bail};

use keel_core::fields::{FieldMap, FieldValue};

/// Parses repeated `--field name=value` flags into a patch map.
///
/// Values parse as JSON when they look like it (numbers, booleans, lists),
/// otherwise as plain text. `name=` (empty value) deletes the field on
/// update.
pub fn parse_field_args(args: &[String]) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    for arg in args {
        let Some((name, raw)) = arg.split_once('=') else {
            bail!("--field expects name=value, got {arg:?}");
        };
        if name.is_empty() {
            bail!("--field name must not be empty");
        }
        let value = match serde_json::from_str::<FieldValue>(raw) {
            Ok(v) if !raw.is_empty() => v,
            _ => FieldValue::Text(raw.to_owned()),
        };
        fields.insert(name.to_owned(), value);
    }
    Ok(fields)
}
