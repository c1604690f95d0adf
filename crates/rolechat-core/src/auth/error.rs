use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Token refresh is not supported by this backend")]
    RefreshUnsupported,

    #[error("Backend response did not contain an access token")]
    MissingToken,
}
