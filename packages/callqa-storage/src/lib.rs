pub mod calls;
pub mod campaigns;
pub mod db;
pub mod models;
pub mod organizations;
pub mod schema;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
