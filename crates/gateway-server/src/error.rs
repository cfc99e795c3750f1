/// Failures while rendering a composite response into the requested `fmt`.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("rendered body was not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
