use clap::Parser;

pub const DEFAULT_PORT: u16 = 8080;

pub const USAGE: &str = "\
Usage:
  sqlrepl <dbtype> <connstring>  (Interactive mode)
  sqlrepl -p <port>               (Server mode)";

/// Runs SQL against Oracle, MySQL, PostgreSQL, SQLite or SQL Server, either
/// interactively or as a line protocol server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Database type (oracle, mysql, postgres, sqlite, sqlserver)
    #[arg(short = 't')]
    pub dbtype: Option<String>,

    /// Database connection string
    #[arg(short = 'c')]
    pub connstring: Option<String>,

    /// Port to listen on in server mode
    #[arg(short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// `<dbtype> <connstring>`
    #[arg(index = 1, num_args = 0..)]
    pub positional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Interactive { dbtype: String, connstring: String },
    Server { port: u16 },
}

impl Args {
    /// Two positionals win over the flags; both `-t` and `-c` come next; no
    /// positionals at all means server mode. Anything else is a usage error.
    #[must_use]
    pub fn mode(self) -> Option<Mode> {
        let Self {
            dbtype,
            connstring,
            port,
            positional,
        } = self;

        if let [dbtype, connstring] = positional.as_slice() {
            return Some(Mode::Interactive {
                dbtype: dbtype.clone(),
                connstring: connstring.clone(),
            });
        }

        match (dbtype, connstring) {
            (Some(dbtype), Some(connstring)) if !dbtype.is_empty() && !connstring.is_empty() => {
                Some(Mode::Interactive { dbtype, connstring })
            }
            _ if positional.is_empty() => Some(Mode::Server { port }),
            _ => None,
        }
    }
}
