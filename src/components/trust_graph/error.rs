use thiserror::Error;

/// Host primitives that must exist before anything is scheduled or drawn.
#[derive(Debug, Error)]
pub enum SetupError {
	#[error("no global window object")]
	MissingWindow,

	#[error("window.performance is unavailable")]
	MissingPerformance,

	#[error("canvas `{0}` has no 2d context")]
	MissingContext(&'static str),
}

pub type Result<T> = std::result::Result<T, SetupError>;
