use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use errors::*;

const UTF8_BOM: &str = "\u{feff}";
const UNNAMED_SCRIPT: &str = "unnamed";

/// `SourceScript` is a named piece of script source code.
///
/// The qualified name fully identifies the script (e.g. an absolute file path) while the short
/// name is only informative (e.g. a file name). A `SourceScript` is never mutated once loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceScript {
    qualified_name: String,
    short_name: String,
    text: String,
}

impl SourceScript {
    pub fn new<S: Into<String>>(qualified_name: S, short_name: S, text: S) -> Self {
        let short_name = short_name.into();
        SourceScript {
            qualified_name: qualified_name.into(),
            short_name: if short_name.is_empty() {
                UNNAMED_SCRIPT.to_owned()
            } else {
                short_name
            },
            text: text.into(),
        }
    }

    /// Reads a script from a file. A leading UTF-8 byte order mark is removed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            ::std::env::current_dir()
                .chain_err(|| "Unable to determine the working directory")?
                .join(path)
        };

        let mut file = File::open(&absolute).chain_err(|| {
            format!("Unable to open script {}", absolute.display())
        })?;
        let mut text = String::new();
        file.read_to_string(&mut text).chain_err(|| {
            format!("Unable to read script {}", absolute.display())
        })?;
        if text.starts_with(UTF8_BOM) {
            text = text[UTF8_BOM.len()..].to_owned();
        }

        let short_name = absolute
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(SourceScript::new(
            absolute.to_string_lossy().into_owned(),
            short_name,
            text,
        ))
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for SourceScript {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<{}> (length: {})",
            self.qualified_name,
            self.text.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn from_file_strips_byte_order_mark() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all("\u{feff}emit(1, 2);".as_bytes()).unwrap();

        let script = SourceScript::from_file(file.path()).unwrap();

        assert_eq!("emit(1, 2);", script.text());
        assert_eq!(file.path().to_string_lossy(), script.qualified_name());
    }

    #[test]
    fn empty_short_name_becomes_unnamed() {
        let script = SourceScript::new("/tmp/x", "", "");

        assert_eq!("unnamed", script.short_name());
        assert_eq!("</tmp/x> (length: 0)", script.to_string());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SourceScript::from_file("/nonexistent/millstone/script.js").is_err());
    }
}
