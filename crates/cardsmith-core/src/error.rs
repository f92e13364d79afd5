use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported deck format: {} (expected .yml, .yaml, .json or .csv)", path.display())]
    UnsupportedDeckFormat { path: PathBuf },

    #[error("Invalid deck {}: {message}", path.display())]
    InvalidDeck { path: PathBuf, message: String },

    #[error("Invalid card `{id}`: {message}")]
    InvalidCard { id: String, message: String },

    #[error("No card configuration found in {} (expected config.yml, config.yaml, card.yml or config.json)", dir.display())]
    MissingCardConfig { dir: PathBuf },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_card(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCard {
            id: id.into(),
            message: message.into(),
        }
    }
}
