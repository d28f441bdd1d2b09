//! Gate between generated text and the store.
//!
//! [`extract`] pulls a candidate statement out of generated text and
//! [`validate`] turns it into a [`ValidatedQuery`], the only type the
//! executor accepts.

mod lexer;

pub mod extract;
pub mod validate;

pub use extract::{CandidateQuery, ExtractionFailure, extract};
pub use validate::{ValidatedQuery, ValidationCheck, ValidationFailure, validate};
