// Types and limits shared by the store and client crates.

pub mod attachment;
pub mod constants;
pub mod error;

pub use attachment::check_attachment;
pub use error::{AttachmentError, ValidationError};
