pub mod description;
pub mod monitor;
pub mod public;

pub use self::public::ServerInfo;
