use prost::Message as _;

/// One result row. Every value is already rendered as text.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Row {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// The envelope sent back for every statement and for bootstrap failures.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct QueryResult {
    #[prost(string, repeated, tag = "1")]
    pub columns: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "2")]
    pub rows: ::prost::alloc::vec::Vec<Row>,
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub error: ::prost::alloc::string::String,
}

impl Row {
    #[must_use]
    pub const fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

impl QueryResult {
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// # Errors
    ///
    /// * If the bytes are not a valid `QueryResult` envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}
