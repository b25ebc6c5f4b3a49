pub mod labels;
#[allow(clippy::module_inception)]
pub mod linker;

pub use self::linker::{link, Hex2Config};
