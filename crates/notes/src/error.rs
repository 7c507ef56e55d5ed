pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] monoid_graph::GraphError),
    #[error("settings error: {0}")]
    Settings(#[from] crate::settings::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("embedding provider error: {0}")]
    Embedding(String),
}
