use std::{borrow::Cow, fmt, str::FromStr};

use thiserror::Error;

/// The backends a session can be opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Oracle,
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
}

#[derive(Debug, Error)]
#[error("Invalid database type: {0}")]
pub struct EngineParseError(pub String);

impl Engine {
    pub const ALL: [Self; 5] = [
        Self::Oracle,
        Self::MySql,
        Self::Postgres,
        Self::Sqlite,
        Self::SqlServer,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::SqlServer => "sqlserver",
        }
    }

    #[must_use]
    pub const fn capabilities(self) -> &'static EngineCapabilities {
        match self {
            Self::Oracle => &ORACLE,
            Self::MySql | Self::Postgres | Self::Sqlite | Self::SqlServer => &DEFAULT,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = EngineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|engine| engine.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| EngineParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    pub max_open: u32,
    pub max_idle: u32,
}

pub const POOL_POLICY: PoolPolicy = PoolPolicy {
    max_open: 10,
    max_idle: 5,
};

/// Run once after the liveness ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInit {
    None,
    EnableServerOutput,
}

/// Run after every successful statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostQuery {
    None,
    DrainServerOutput,
}

/// Everything that differs between engines outside of the client library
/// itself, looked up once per session.
#[derive(Debug)]
pub struct EngineCapabilities {
    pub pool: PoolPolicy,
    pub session_init: SessionInit,
    pub pre_query: fn(&str) -> Cow<'_, str>,
    pub post_query: PostQuery,
}

static DEFAULT: EngineCapabilities = EngineCapabilities {
    pool: POOL_POLICY,
    session_init: SessionInit::None,
    pre_query: unchanged,
    post_query: PostQuery::None,
};

static ORACLE: EngineCapabilities = EngineCapabilities {
    pool: POOL_POLICY,
    session_init: SessionInit::EnableServerOutput,
    pre_query: oracle_pre_query,
    post_query: PostQuery::DrainServerOutput,
};

const fn unchanged(statement: &str) -> Cow<'_, str> {
    Cow::Borrowed(statement)
}

/// PL/SQL blocks need their closing `;` while plain statements must not
/// have one. Applying this twice is not a no-op: `END;` loses its `;`.
#[must_use]
pub fn oracle_pre_query(statement: &str) -> Cow<'_, str> {
    let trimmed = statement.trim_end();

    let ends_with_end = trimmed
        .len()
        .checked_sub(3)
        .and_then(|start| trimmed.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case("END"));

    if trimmed.len() > 3 && ends_with_end {
        Cow::Owned(format!("{trimmed};"))
    } else if trimmed.len() > 1 && trimmed.ends_with(';') {
        Cow::Borrowed(&trimmed[..trimmed.len() - 1])
    } else {
        Cow::Borrowed(trimmed)
    }
}
