use thiserror::Error;

/// The fatal error surface of the dumper. Collected, per-worker errors are
/// folded into a single `AggregateWorker` variant once a dump finishes; every
/// other variant aborts the dump immediately.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("discovery: {0}")]
    Discovery(String),

    #[error("transform `{expr}`: {source}")]
    Transform {
        expr: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("writer: {0}")]
    Writer(String),

    #[error("{0} worker error(s):\n{1}")]
    AggregateWorker(usize, String),
}

pub type DumpResult<T> = Result<T, DumpError>;
