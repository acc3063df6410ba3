//! Error types for the AFQMC engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AfqmcError {
    #[error("unknown observable: {0}")]
    UnknownObservable(String),

    #[error("unknown population control policy: {0}")]
    UnknownPopulationControl(String),

    #[error("chunk layout mismatch: {0}")]
    ChunkLayoutMismatch(String),

    #[error("the Hamiltonian has been chunked, the full Cholesky factor is not available")]
    FullFactorUnavailable,

    #[error("the Hamiltonian is already chunked")]
    AlreadyChunked,

    #[error("trial wavefunction has not been half-rotated")]
    NotHalfRotated,

    #[error("half-rotated integrals were built against a different Hamiltonian")]
    HalfRotationMismatch,

    #[error("invalid Hamiltonian: {0}")]
    InvalidHamiltonian(String),

    #[error("invalid trial wavefunction: {0}")]
    InvalidTrial(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid worker grouping: {0}")]
    InvalidGrouping(String),

    #[error("communicator error: {0}")]
    Communicator(String),

    #[error("output failure on the coordinating worker: {0}")]
    CoordinatorIo(String),

    #[error("malformed estimator file: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, AfqmcError>;
