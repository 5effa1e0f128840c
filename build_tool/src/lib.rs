use ::std::{io, path::PathBuf};
use eld::DatabaseError;
use thiserror::Error;

mod convert;
mod training;

pub use convert::{array_to_blob, default_stem, reencode, select_languages};
pub use training::{build_table, calibrate, train_dir, CorpusFrequencies, TrainOptions};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Read error at {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Unknown language {0:?}")]
    UnknownLanguage(String),
    #[error("No corpus files in {0:?}")]
    EmptyCorpus(PathBuf),
    #[error("Worker for {0:?} stopped without a result")]
    Worker(String),
}

impl BuildError {
    #[inline]
    pub(crate) fn read(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Read { path, source }
    }
}
