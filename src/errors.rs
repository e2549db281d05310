//! Errors which abort a whole conversion.
//!
//! Anything that goes wrong on a single page is turned into a placeholder
//! instead, so it never shows up here.

use std::{error, io};

use thiserror::Error;

use crate::prelude::*;

/// A conversion failed before, or after, processing its pages.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source document does not exist.
    #[error("source document not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The source document exists but could not be opened.
    #[error("could not open document {}", path.display())]
    DocumentOpen {
        path: PathBuf,
        #[source]
        source: Box<dyn error::Error + Send + Sync + 'static>,
    },

    /// We could not write the output file.
    #[error("could not write output file {}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    /// Wrap an [`anyhow::Error`] as a [`ConvertError::DocumentOpen`].
    pub fn document_open(path: &Path, source: anyhow::Error) -> Self {
        Self::DocumentOpen {
            path: path.to_owned(),
            source: source.into(),
        }
    }
}
