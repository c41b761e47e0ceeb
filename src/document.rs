use std::io::Write;

use crate::convert::OutputFeature;
use crate::domain::SpatialReferenceId;
use crate::error::AgsError;

const HEADER: &[u8] = br#"{"type":"FeatureCollection","features":["#;

// Separator state spans the whole document; batches may be empty.
pub struct FeatureCollectionWriter<W: Write> {
    inner: W,
    written: usize,
}

impl<W: Write> FeatureCollectionWriter<W> {
    pub fn begin(mut inner: W) -> Result<Self, AgsError> {
        inner.write_all(HEADER).map_err(io_error)?;
        Ok(Self { inner, written: 0 })
    }

    pub fn write_batch(&mut self, features: &[OutputFeature]) -> Result<(), AgsError> {
        for feature in features {
            if self.written > 0 {
                self.inner.write_all(b",").map_err(io_error)?;
            }
            serde_json::to_writer(&mut self.inner, feature)
                .map_err(|err| AgsError::Filesystem(err.to_string()))?;
            self.written += 1;
        }
        Ok(())
    }

    pub fn features_written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self, srid: SpatialReferenceId) -> Result<W, AgsError> {
        write!(
            self.inner,
            r#"],"crs":{{"type":"name","properties":{{"name":"EPSG:{srid}"}}}}}}"#
        )
        .map_err(io_error)?;
        self.inner.flush().map_err(io_error)?;
        Ok(self.inner)
    }
}

fn io_error(err: std::io::Error) -> AgsError {
    AgsError::Filesystem(err.to_string())
}
