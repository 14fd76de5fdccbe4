pub mod id;
pub mod url;
