use crate::bail;
use crate::error::{BatchResult, ErrorKind};

/// Splits data file lines into fields.
///
/// A field starting with `"` is quoted: it may contain the separator, and `""` inside it stands
/// for one `"`. After the closing quote only the separator or the end of the line may follow.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    separator: String,
    with_last_sep: bool,
}

impl LineSplitter {
    /// `with_last_sep` means every line ends with a separator that does not open a new field.
    pub fn new(separator: impl Into<String>, with_last_sep: bool) -> Self {
        Self {
            separator: separator.into(),
            with_last_sep,
        }
    }

    pub fn split(&self, line: &str) -> BatchResult<Vec<String>> {
        let sep = self.separator.as_str();
        let line = match self.with_last_sep {
            true => line.strip_suffix(sep).unwrap_or(line),
            false => line,
        };

        let mut fields = Vec::new();
        let mut rest = line;
        loop {
            let (field, remainder) = if let Some(quoted) = rest.strip_prefix('"') {
                self.split_quoted(line, quoted)?
            } else {
                match rest.find(sep) {
                    Some(end) => (rest[..end].to_string(), Some(&rest[end + sep.len()..])),
                    None => (rest.to_string(), None),
                }
            };

            fields.push(field);
            match remainder {
                Some(remainder) => rest = remainder,
                None => return Ok(fields),
            }
        }
    }

    /// Reads a quoted field from `quoted` (just after the opening quote).
    ///
    /// Returns the unescaped field and the text after the following separator, or `None` at end
    /// of line.
    fn split_quoted<'a>(
        &self,
        line: &str,
        quoted: &'a str,
    ) -> BatchResult<(String, Option<&'a str>)> {
        let mut field = String::new();
        let mut chars = quoted.char_indices().peekable();

        while let Some((index, c)) = chars.next() {
            if c != '"' {
                field.push(c);
                continue;
            }

            if let Some((_, '"')) = chars.peek() {
                field.push('"');
                chars.next();
                continue;
            }

            let after = &quoted[index + 1..];
            if after.is_empty() {
                return Ok((field, None));
            }
            if let Some(remainder) = after.strip_prefix(self.separator.as_str()) {
                return Ok((field, Some(remainder)));
            }

            bail!(
                ErrorKind::InvalidData,
                "Unexpected text after closing quote",
                format!("line: {line}")
            );
        }

        bail!(
            ErrorKind::InvalidData,
            "Unclosed quote",
            format!("line: {line}")
        )
    }
}
