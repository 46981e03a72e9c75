use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The first line of every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub dbtype: String,
    pub connstring: String,
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ConnectionParams {
    /// # Errors
    ///
    /// * If the line is not a JSON object with string `dbtype` and `connstring` fields
    pub fn from_line(line: &[u8]) -> Result<Self, ParamsError> {
        Ok(serde_json::from_slice(trim_line_ending(line))?)
    }

    /// # Errors
    ///
    /// * If the params fail to serialize
    pub fn to_line(&self) -> Result<String, ParamsError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_params_line() {
        let params =
            ConnectionParams::from_line(b"{\"dbtype\":\"sqlite\",\"connstring\":\":memory:\"}\n")
                .unwrap();

        assert_eq!(
            params,
            ConnectionParams {
                dbtype: "sqlite".into(),
                connstring: ":memory:".into(),
            }
        );
    }

    #[test]
    fn rejects_missing_connstring() {
        assert!(ConnectionParams::from_line(b"{\"dbtype\":\"sqlite\"}\n").is_err());
    }

    #[test]
    fn rejects_non_json() {
        assert!(ConnectionParams::from_line(b"sqlite :memory:\n").is_err());
    }

    #[test]
    fn to_line_is_newline_terminated() {
        let line = ConnectionParams {
            dbtype: "postgres".into(),
            connstring: "host=localhost".into(),
        }
        .to_line()
        .unwrap();

        assert_eq!(
            line,
            "{\"dbtype\":\"postgres\",\"connstring\":\"host=localhost\"}\n"
        );
    }
}
