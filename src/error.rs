use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures at the sequencer and GPIO seams.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: ALSA error ({source})")]
    Alsa {
        op: &'static str,
        #[source]
        source: alsa::Error,
    },

    #[error("open GPIO chip {chip}: {source}")]
    ChipOpen {
        chip: String,
        #[source]
        source: gpio_cdev::Error,
    },

    #[error("request GPIO line {offset} as output: {source}")]
    LineRequest {
        offset: u32,
        #[source]
        source: gpio_cdev::Error,
    },

    #[error("set GPIO line {offset}: {source}")]
    LineSet {
        offset: u32,
        #[source]
        source: gpio_cdev::Error,
    },

    #[error("invalid port specifier '{0}'")]
    InvalidSpec(String),

    #[error("no client matches '{0}'")]
    ClientNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn alsa(op: &'static str) -> impl FnOnce(alsa::Error) -> Self {
        move |source| Error::Alsa { op, source }
    }
}
