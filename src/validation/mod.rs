//! Validation collaborators
//!
//! Schema validation itself is delegated: callers plug any validator
//! implementing [`DocumentValidator`] into the model configuration
//! (e.g. one backed by an external XSD validation tool). The built-in
//! [`WellFormedValidator`] only checks well-formedness and, optionally,
//! the root element name.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::errors::{Error, Result};

/// Validates a document's bytes before transcoding starts
pub trait DocumentValidator {
    /// Return an [`Error::Validation`] when the document does not
    /// conform
    fn validate(&self, xml: &[u8]) -> Result<()>;
}

/// Structural validation only: the document must parse, and the root
/// element must match `expected_root` when one is set.
#[derive(Debug, Default, Clone)]
pub struct WellFormedValidator {
    /// Required root element local name
    pub expected_root: Option<String>,
}

impl WellFormedValidator {
    pub fn new(expected_root: Option<&str>) -> WellFormedValidator {
        WellFormedValidator {
            expected_root: expected_root.map(|s| s.to_string()),
        }
    }
}

impl DocumentValidator for WellFormedValidator {
    fn validate(&self, xml: &[u8]) -> Result<()> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut saw_root = false;
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                    if !saw_root {
                        saw_root = true;
                        if let Some(expected) = &self.expected_root {
                            let local = start.local_name();
                            let local = String::from_utf8_lossy(local.as_ref());
                            if local != expected.as_str() {
                                return Err(Error::Validation(format!(
                                    "unexpected root element '{local}', expected '{expected}'"
                                )));
                            }
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::Validation(format!(
                        "document is not well-formed at position {}: {e}",
                        reader.error_position()
                    )));
                }
            }
            buf.clear();
        }

        if !saw_root {
            return Err(Error::Validation("document has no root element".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_passes() {
        let validator = WellFormedValidator::default();
        assert!(validator.validate(b"<a><b>1</b></a>").is_ok());
    }

    #[test]
    fn test_mismatched_tags_fail() {
        let validator = WellFormedValidator::default();
        let err = validator.validate(b"<a><b>1</c></a>").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_root_element_is_checked() {
        let validator = WellFormedValidator::new(Some("order"));
        assert!(validator.validate(b"<order/>").is_ok());
        let err = validator.validate(b"<invoice/>").unwrap_err();
        assert!(err.to_string().contains("unexpected root element"));
    }
}
