use crate::codec::SYNC_MARKER;

/// A single client line after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BatchSync,
    Statement(String),
}

impl Command {
    /// Classifies a line. The trailing `\n`, if present, is not part of the statement.
    #[must_use]
    pub fn from_line(line: &[u8]) -> Self {
        if line.first() == Some(&SYNC_MARKER) {
            return Self::BatchSync;
        }

        let line = line.strip_suffix(b"\n").unwrap_or(line);

        Self::Statement(String::from_utf8_lossy(line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn group_separator_is_batch_sync() {
        assert_eq!(Command::from_line(b"\x1d\n"), Command::BatchSync);
        assert_eq!(Command::from_line(b"\x1dtrailing\n"), Command::BatchSync);
    }

    #[test]
    fn statement_has_newline_stripped() {
        assert_eq!(
            Command::from_line(b"SELECT 1;\n"),
            Command::Statement("SELECT 1;".into())
        );
    }

    #[test]
    fn only_the_newline_is_stripped() {
        assert_eq!(
            Command::from_line(b"SELECT 1 \r\n"),
            Command::Statement("SELECT 1 \r".into())
        );
    }

    #[test]
    fn empty_line_is_an_empty_statement() {
        assert_eq!(Command::from_line(b"\n"), Command::Statement(String::new()));
    }
}
