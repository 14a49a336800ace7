mod dense;
mod dropout;
mod embedding;
mod gru;

pub use dense::Dense;
pub use dropout::{Dropout, normalize_rows};
pub use embedding::Embedding;
pub use gru::Gru;
