use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input sequence contains no frames")]
    EmptySequence,

    #[error("got {frames} frames but {detections} detection lists")]
    FrameCountMismatch { frames: usize, detections: usize },

    #[error("frame {index} is {got:?}, expected {expected:?} (width, height)")]
    FrameSizeMismatch {
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("pitch vertices do not define a valid homography")]
    DegenerateHomography,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde Error: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
