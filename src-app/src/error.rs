use derive_more::{Display, From};

#[derive(Debug, Display, From)]
pub enum Error {
    #[from]
    Store(hushtype_model_prep::StoreError),

    #[from]
    Prep(hushtype_model_prep::PrepError),

    #[from]
    Io(std::io::Error),

    #[display("No application data directory available")]
    NoDataDir,
}

impl std::error::Error for Error {}
