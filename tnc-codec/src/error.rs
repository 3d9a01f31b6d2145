use thiserror::Error;

use tnc_core::Mode;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec library returned a null handle for {0}")]
    NullHandle(Mode),
}
