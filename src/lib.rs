pub mod command;
pub mod dump;
pub mod header;
pub mod helpers;
pub mod machine;
pub mod macho;
pub mod reader;

#[cfg(test)]
mod testutil;

pub use command::LoadCommand;
pub use header::MachHeader64;
pub use macho::{MachO, MachOErr, MachOResult};
