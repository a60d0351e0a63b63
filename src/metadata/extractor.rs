use std::path::Path;

use log::{info, warn};

use super::types::{ContainerFormat, FieldSet};
use crate::errors::ContainerParserResult;

/// A heavier parser for one format, used in place of the built-in decoder
/// when it is available.
///
/// Contract: path in, structured fields out. Any error makes the registry fall
/// back to the built-in decoder.
#[cfg_attr(test, mockall::automock)]
pub trait ExternalParser: Send + Sync {
    /// Short name for logs and error messages.
    fn name(&self) -> String;

    fn format(&self) -> ContainerFormat;

    fn parse(&self, path: &Path) -> ContainerParserResult<FieldSet>;
}

/// Outcome of handing a file to an external parser.
pub(crate) enum ExternalOutcome {
    Parsed(FieldSet),
    /// The parser failed; the message goes into the fallback's errors.
    Failed(String),
}

pub(crate) fn run_external(parser: &dyn ExternalParser, path: &Path) -> ExternalOutcome {
    let name = parser.name();
    match parser.parse(path) {
        Ok(mut fields) if fields.format() == parser.format() => {
            info!("{} parsed {} with {} fields", name, path.display(), fields.fields_extracted());
            fields.mark_valid();
            ExternalOutcome::Parsed(fields)
        }
        Ok(fields) => {
            let message = format!(
                "external parser {} returned {} fields for a {} file",
                name,
                fields.format(),
                parser.format()
            );
            warn!("{}", message);
            ExternalOutcome::Failed(message)
        }
        Err(e) => {
            warn!("external parser {} failed on {}: {}", name, path.display(), e);
            ExternalOutcome::Failed(format!("external parser {}: {}", name, e))
        }
    }
}
