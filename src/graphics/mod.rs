mod buffer;
mod codec;
mod composer;
mod importer;
mod server;

pub use buffer::*;
pub use codec::*;
pub use composer::*;
pub use importer::*;
pub use server::*;
